pub mod error;
pub mod key;
pub mod types;

pub use error::{HostError, IdbError, Result, is_txn_finished_err};
pub use key::Key;
pub use types::{CursorDirection, ReadyState, TransactionMode, TransactionState};
