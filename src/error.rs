//! Error taxonomy for the data layer.
//!
//! CRUD mutations fail fast with one of these variants. The single deliberate
//! exception is activity logging, which is swallowed by `log_activity` so a
//! ledger append can never sink the mutation it accompanies.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No active user scope has been set on this session. Recoverable by
    /// re-authenticating and calling `set_active_user_scope` again.
    #[error("no active user scope")]
    NoActiveScope,

    /// The row does not exist, or exists but fails the access predicate for
    /// the active scope. The two cases are indistinguishable on purpose.
    #[error("{0} not found")]
    NotFoundForUser(&'static str),

    /// A required field was empty or malformed.
    #[error("{0}")]
    Validation(String),

    /// The operation would break a structural invariant. The message is
    /// suitable for showing to the user verbatim.
    #[error("{0}")]
    InvariantViolation(String),

    /// Underlying store failure not anticipated by the variants above.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("metadata encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Filesystem failure while opening or creating the database.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        StoreError::InvariantViolation(msg.into())
    }
}
