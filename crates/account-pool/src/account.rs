//! Account data model
//!
//! One `Account` is one OAuth-backed credential slot for one provider.
//! `refresh_token` is the durable credential; `access_token` is short-lived
//! and derived from it. `expires_at`, `created_at`, `updated_at` and
//! `last_refresh` are epoch milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use provider_auth::{Provider, UsageSnapshot};
use serde::{Deserialize, Serialize};

/// Administrative on/off switch, independent of token validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
}

/// Provider-assigned stable identity fields, used for de-duplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub remote_user_id: Option<String>,
    pub machine_id: Option<String>,
    pub email: Option<String>,
}

impl ProviderIdentity {
    /// Whether `other` collides with this identity on either unique axis.
    ///
    /// A partial match (same machine id, different remote user) still
    /// counts as a collision: imports reject rather than merge.
    pub fn collides_with(&self, other: &ProviderIdentity) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
        same(&self.remote_user_id, &other.remote_user_id)
            || same(&self.machine_id, &other.machine_id)
    }
}

/// A pooled OAuth account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub owner_user_id: Option<String>,
    pub account_name: String,
    pub provider: Provider,
    pub is_shared: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<u64>,
    pub status: AccountStatus,
    pub need_refresh: bool,
    pub usage: UsageSnapshot,
    pub identity: ProviderIdentity,
    pub resource_url: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_refresh: Option<u64>,
}

impl Account {
    /// Whether the access token needs renewal before use.
    ///
    /// Unknown expiry counts as stale: an access token we cannot vouch for
    /// is treated the same as one already past its margin.
    pub fn is_stale(&self, now_millis: u64, safety_margin: Duration) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => expires_at <= now_millis + safety_margin.as_millis() as u64,
        }
    }

    /// Selection eligibility for a requesting user.
    ///
    /// `shared_only` restricts to pool-wide shared accounts; otherwise a
    /// caller may also be served their own private accounts.
    pub fn eligible_for(&self, requesting_user: Option<&str>, shared_only: bool) -> bool {
        if self.status != AccountStatus::Active || self.need_refresh {
            return false;
        }
        if self.is_shared {
            return true;
        }
        if shared_only {
            return false;
        }
        match (requesting_user, self.owner_user_id.as_deref()) {
            (Some(user), Some(owner)) => user == owner,
            _ => false,
        }
    }
}

/// Fields supplied when registering an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub provider: Provider,
    pub is_shared: bool,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<u64>,
    pub last_refresh: Option<u64>,
    pub resource_url: Option<String>,
    pub identity: ProviderIdentity,
    pub usage: UsageSnapshot,
}

impl NewAccount {
    /// Minimal registration with everything optional left empty.
    pub fn new(provider: Provider, refresh_token: impl Into<String>) -> Self {
        Self {
            account_id: None,
            account_name: None,
            provider,
            is_shared: false,
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_at: None,
            last_refresh: None,
            resource_url: None,
            identity: ProviderIdentity::default(),
            usage: UsageSnapshot::default(),
        }
    }
}

/// Sanitized account view for display. Never carries tokens.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub account_id: String,
    pub owner_user_id: Option<String>,
    pub account_name: String,
    pub provider: Provider,
    pub is_shared: bool,
    pub status: AccountStatus,
    pub need_refresh: bool,
    pub expires_at: Option<u64>,
    pub email: Option<String>,
    pub resource_url: Option<String>,
    pub usage: UsageSnapshot,
    pub last_refresh: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.account_id.clone(),
            owner_user_id: account.owner_user_id.clone(),
            account_name: account.account_name.clone(),
            provider: account.provider,
            is_shared: account.is_shared,
            status: account.status,
            need_refresh: account.need_refresh,
            expires_at: account.expires_at,
            email: account.identity.email.clone(),
            resource_url: account.resource_url.clone(),
            usage: account.usage.clone(),
            last_refresh: account.last_refresh,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Normalize a provider resource URL to a bare host.
///
/// Accepts `portal.qwen.ai` or `https://portal.qwen.ai`; blank input falls
/// back to the Qwen portal default.
pub fn normalize_resource_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "portal.qwen.ai".to_string();
    }
    let trimmed = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    trimmed.to_string()
}
