use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{HostError, IdbError};

/// Message suffixes the host uses when an operation lands on a transaction that
/// already finished.
pub const TXN_FINISHED_SUFFIXES: [&str; 2] = [
    "The transaction has finished.",
    "The database connection is closing.",
];

/// Bounds on transparent retries after a transaction finished prematurely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per operation. `None` retries until a non-recoverable outcome.
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Whether another attempt may follow the given (1-based) attempt.
    pub fn allows_retry(&self, attempt: usize) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Settings shared by every handle derived from a [`crate::Database`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound applied to every request wait, in addition to the caller's context.
    pub wait_timeout: Option<Duration>,

    pub retry: RetryPolicy,

    /// Extra message suffixes classified as "transaction finished", on top of
    /// [`TXN_FINISHED_SUFFIXES`].
    pub finished_phrases: Vec<String>,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait timeout
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register an additional host phrase meaning "transaction finished"
    pub fn finished_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.finished_phrases.push(phrase.into());
        self
    }

    pub fn is_finished_message(&self, message: &str) -> bool {
        TXN_FINISHED_SUFFIXES
            .iter()
            .copied()
            .chain(self.finished_phrases.iter().map(String::as_str))
            .any(|suffix| message.ends_with(suffix))
    }

    /// Translates a host error into the crate taxonomy. This is the only place
    /// where message text is inspected.
    pub fn classify(&self, err: HostError) -> IdbError {
        if self.is_finished_message(&err.message) {
            IdbError::TransactionFinished(err)
        } else {
            IdbError::Host(err)
        }
    }
}
