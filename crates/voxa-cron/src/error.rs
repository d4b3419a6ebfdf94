//! Error type for the scheduler subsystem.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Schedule type or value rejected at validation time.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// Action payload rejected against its action type.
    #[error("invalid action payload: {0}")]
    InvalidPayload(String),
    #[error("unknown action_type: {0:?}")]
    UnknownActionType(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The task store has been closed.
    #[error("task store is closed")]
    StoreClosed,
}
