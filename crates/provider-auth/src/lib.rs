//! Provider OAuth refresh and usage extraction
//!
//! Standalone library for the provider-facing half of the account pool:
//! the refresh-token exchange against each provider's OAuth token endpoint
//! (with error classification) and the tolerant parser that turns a
//! provider's opaque usage payload into a normalized snapshot. No
//! persistence here; callers own all state.
//!
//! Refresh flow:
//! 1. Caller holds a stored refresh token for some [`Provider`]
//! 2. `token::refresh_access_token()` performs the exchange
//! 3. Terminal failures ([`Error::InvalidGrant`], [`Error::EmptyCredential`])
//!    mean the token needs operator re-authentication; everything else is
//!    retryable by the caller

pub mod error;
pub mod provider;
pub mod token;
pub mod usage;

pub use error::{Error, Result};
pub use provider::Provider;
pub use token::{RefreshResponse, refresh_access_token};
pub use usage::{UsagePayload, UsageSnapshot, extract_usage};
