//! Error taxonomy for pool operations
//!
//! The exposure layer maps these to HTTP statuses; nothing here ever
//! carries token material.

/// Errors from account store and pool manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller error; not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A uniqueness invariant would be violated. Carries the id of the
    /// pre-existing record so callers can treat the operation as
    /// idempotent instead of erroring loudly.
    #[error("duplicate account, already registered as {existing_id}")]
    Duplicate { existing_id: String },

    /// The stored refresh token is dead; the account needs
    /// re-authentication. Never auto-retried.
    #[error("credential expired, account requires re-authentication")]
    CredentialExpired,

    /// Provider or network hiccup; the caller may retry with backoff.
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// The eligible set for selection is empty.
    #[error("no account available")]
    NoAccountAvailable,

    #[error("account not found: {0}")]
    NotFound(String),

    /// Ownership or admin precondition failed.
    #[error("forbidden")]
    Forbidden,

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
