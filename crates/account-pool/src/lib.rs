//! Credential pool for OAuth-backed provider accounts
//!
//! Manages shared pools of Kiro and Qwen accounts: a durable account store,
//! the refresh lifecycle (staleness, per-account refresh locking, failure
//! classification), and selection of a healthy account for a request.
//!
//! Account lifecycle:
//! 1. Registered via import (single credential or bulk legacy batch)
//! 2. `PoolManager::ensure_fresh()` renews the access token when stale
//! 3. `invalid_grant` from the provider marks the account `need_refresh`
//!    until an operator re-registers it with a working token
//! 4. `PoolManager::select()` hands out an eligible account, spreading
//!    load by remaining token lifetime and quota headroom
//! 5. Deleted by its owner or an admin; hard delete

pub mod account;
pub mod error;
pub mod manager;
pub mod refresh;
pub mod store;

pub use account::{
    Account, AccountStatus, AccountView, NewAccount, ProviderIdentity, normalize_resource_url,
    now_millis,
};
pub use error::{Error, Result};
pub use manager::{Caller, PoolManager};
pub use refresh::{HttpRefresher, TokenRefresher};
pub use store::AccountStore;
