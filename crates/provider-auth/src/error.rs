//! Error classification for the refresh-token exchange

/// Outcome classes for a failed refresh exchange.
///
/// `EmptyCredential` and `InvalidGrant` are terminal for the stored refresh
/// token: retrying with the same token will never succeed, so the account
/// must be surfaced for re-authentication. `Transient` and
/// `MalformedResponse` are safe to retry with backoff.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("refresh token is empty")]
    EmptyCredential,

    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("transient refresh failure: {0}")]
    Transient(String),

    #[error("token endpoint returned success without a usable access token: {0}")]
    MalformedResponse(String),
}

impl Error {
    /// Whether the stored refresh token is dead and must not be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::EmptyCredential | Error::InvalidGrant(_))
    }
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, Error>;
