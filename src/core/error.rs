use std::fmt;
use thiserror::Error;

/// Error reported by the host engine, shaped like a DOM exception:
/// a stable `name` classifying the failure and a human readable `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub name: String,
    pub message: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Raised when an operation is issued against a transaction that is no longer active.
    pub fn transaction_inactive(operation: &str, interface: &str) -> Self {
        Self::new(
            "TransactionInactiveError",
            format!(
                "Failed to execute '{}' on '{}': The transaction has finished.",
                operation, interface
            ),
        )
    }

    /// Raised by `commit`/`abort` on a transaction that already reached a terminal state.
    pub fn transaction_finished(operation: &str) -> Self {
        Self::new(
            "InvalidStateError",
            format!(
                "Failed to execute '{}' on 'IDBTransaction': The transaction has finished.",
                operation
            ),
        )
    }

    pub fn connection_closing(operation: &str) -> Self {
        Self::new(
            "InvalidStateError",
            format!(
                "Failed to execute '{}' on 'IDBDatabase': The database connection is closing.",
                operation
            ),
        )
    }

    pub fn read_only(operation: &str, interface: &str) -> Self {
        Self::new(
            "ReadOnlyError",
            format!(
                "Failed to execute '{}' on '{}': The transaction is read-only.",
                operation, interface
            ),
        )
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new("ConstraintError", message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new("DataError", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn aborted() -> Self {
        Self::new(
            "AbortError",
            "The transaction was aborted, so the request cannot be fulfilled.",
        )
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for HostError {}

#[derive(Error, Debug, Clone)]
pub enum IdbError {
    /// The transaction ended before the operation could apply. Recoverable by
    /// re-running the operation against a fresh transaction.
    #[error("{0}")]
    TransactionFinished(HostError),

    #[error("{0}")]
    Host(HostError),

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Wait deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object store '{0}' not available in this transaction")]
    StoreNotInScope(String),

    #[error("Stop cursor iteration")]
    StopIteration,

    #[error("Failed resolving request results: listener panicked: {0}")]
    ListenerPanic(String),

    #[error("Not part of a transaction")]
    NotInTransaction,

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl IdbError {
    /// Whether this error means the transaction finished before the operation landed.
    pub fn is_txn_finished(&self) -> bool {
        matches!(self, IdbError::TransactionFinished(_))
    }

    /// The host error carried by this error, if any.
    pub fn host_error(&self) -> Option<&HostError> {
        match self {
            IdbError::TransactionFinished(err) | IdbError::Host(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IdbError>;

/// Reports whether an error corresponds to a transaction finishing prematurely.
///
/// See [`crate::retry_txn`] for details.
pub fn is_txn_finished_err<T>(result: &Result<T>) -> bool {
    matches!(result, Err(err) if err.is_txn_finished())
}
