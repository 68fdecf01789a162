use std::fmt;

use serde::{Deserialize, Serialize};

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    pub fn is_read_write(&self) -> bool {
        matches!(self, TransactionMode::ReadWrite)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "readonly"),
            TransactionMode::ReadWrite => write!(f, "readwrite"),
        }
    }
}

/// Lifecycle of a transaction as tracked by the host.
///
/// ```text
/// Active ──commit──> Committing ──drained──> Committed
///   │
///   ├──abort──> Aborted
///   │
///   └──idle──> Finished   (host completed it on its own)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Committing,
    Committed,
    Aborted,
    Finished,
}

impl TransactionState {
    /// Whether new requests may still be issued.
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted | TransactionState::Finished
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committing => write!(f, "COMMITTING"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
            TransactionState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Direction of traversal of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CursorDirection {
    /// Opens at the start of the source.
    #[default]
    Next,
    /// Opens at the start of the source; for duplicate keys only the first record is yielded.
    NextUnique,
    /// Opens at the end of the source.
    Prev,
    /// Opens at the end of the source; for duplicate keys only the first record is yielded.
    PrevUnique,
}

impl CursorDirection {
    pub fn is_forward(&self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "nextunique" => CursorDirection::NextUnique,
            "prev" => CursorDirection::Prev,
            "prevunique" => CursorDirection::PrevUnique,
            _ => CursorDirection::Next,
        }
    }
}

impl fmt::Display for CursorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorDirection::Next => write!(f, "next"),
            CursorDirection::NextUnique => write!(f, "nextunique"),
            CursorDirection::Prev => write!(f, "prev"),
            CursorDirection::PrevUnique => write!(f, "prevunique"),
        }
    }
}

/// State of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}
