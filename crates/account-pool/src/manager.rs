//! Pool manager: registration, refresh lifecycle, selection
//!
//! The stateful core. Refresh de-duplication uses one async lock per
//! account id: at most one exchange is in flight per account, and waiters
//! re-read the store after acquiring the lock so they are served the
//! just-completed result instead of issuing a second exchange (a duplicate
//! exchange risks the provider rotating the refresh token twice and
//! invalidating the first rotation). Deletion takes the same lock, so a
//! finishing refresh can never resurrect a deleted row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use provider_auth::Provider;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{
    Account, AccountStatus, AccountView, NewAccount, normalize_resource_url, now_millis,
};
use crate::error::{Error, Result};
use crate::refresh::TokenRefresher;
use crate::store::AccountStore;

/// Assumed access-token lifetime when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// An authenticated caller of administrative operations.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            user_id: "admin".into(),
            is_admin: true,
        }
    }

    /// Owner-or-admin precondition for mutations and single-account reads.
    fn may_manage(&self, account: &Account) -> bool {
        self.is_admin || account.owner_user_id.as_deref() == Some(self.user_id.as_str())
    }
}

/// Credential pool manager.
pub struct PoolManager {
    store: Arc<AccountStore>,
    refresher: Arc<dyn TokenRefresher>,
    safety_margin: Duration,
    refresh_timeout: Duration,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PoolManager {
    pub fn new(
        store: Arc<AccountStore>,
        refresher: Arc<dyn TokenRefresher>,
        safety_margin: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            safety_margin,
            refresh_timeout,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Shared store handle (for the exposure layer's health endpoint).
    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }

    /// Register a new account for an owner.
    ///
    /// The refresh token is mandatory: an account that cannot renew itself
    /// has no place in the pool. Identity collisions return
    /// [`Error::Duplicate`] with the existing id.
    pub async fn register(&self, new: NewAccount, owner: Option<&str>) -> Result<Account> {
        if new.refresh_token.trim().is_empty() {
            return Err(Error::InvalidInput("refresh_token is required".into()));
        }

        let account_id = new
            .account_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let account_name = new
            .account_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| new.identity.email.clone())
            .unwrap_or_else(|| format!("{} account", new.provider.label()));

        let now = now_millis();
        let account = Account {
            account_id: account_id.clone(),
            owner_user_id: owner.map(str::to_string),
            account_name,
            provider: new.provider,
            is_shared: new.is_shared,
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            expires_at: new.expires_at,
            status: AccountStatus::Active,
            need_refresh: false,
            usage: new.usage,
            identity: new.identity,
            resource_url: new.resource_url,
            created_at: now,
            updated_at: now,
            last_refresh: new.last_refresh,
        };

        self.store.insert(account.clone()).await?;
        metrics::counter!("account_registered_total", "provider" => account.provider.label())
            .increment(1);
        info!(account_id = %account.account_id, provider = %account.provider, "account registered");
        Ok(account)
    }

    /// Return the account with a usable access token, refreshing if stale.
    ///
    /// On `invalid_grant` (or a blank stored refresh token) the account is
    /// flagged `need_refresh`, the stale access token stays in place, and
    /// the caller gets [`Error::CredentialExpired`], never auto-retried.
    /// Transient failures and timeouts leave the account untouched and
    /// surface [`Error::TemporarilyUnavailable`].
    pub async fn ensure_fresh(&self, account_id: &str) -> Result<Account> {
        let account = self
            .store
            .get(account_id)
            .await
            .ok_or_else(|| Error::NotFound(account_id.to_string()))?;
        if !account.is_stale(now_millis(), self.safety_margin) {
            return Ok(account);
        }

        let lock = self.refresh_lock(account_id).await;
        let outcome = {
            let _guard = lock.lock().await;

            // Re-read under the lock: a concurrent caller may have just
            // refreshed, or the account may have been deleted.
            let account = self
                .store
                .get(account_id)
                .await
                .ok_or_else(|| Error::NotFound(account_id.to_string()))?;
            if !account.is_stale(now_millis(), self.safety_margin) {
                debug!(account_id, "served just-refreshed credential");
                Ok(account)
            } else {
                self.refresh_locked(&account).await
            }
        };
        drop(lock);
        self.prune_lock(account_id).await;
        outcome
    }

    /// Perform the provider exchange for a stale account. Caller holds the
    /// account's refresh lock.
    async fn refresh_locked(&self, account: &Account) -> Result<Account> {
        let provider = account.provider;
        let exchange = self
            .refresher
            .refresh(provider, &account.refresh_token);

        match tokio::time::timeout(self.refresh_timeout, exchange).await {
            Ok(Ok(response)) => {
                let now = now_millis();
                let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
                let updated = self
                    .store
                    .update(&account.account_id, |acct| {
                        acct.access_token = response.access_token.clone();
                        if let Some(rotated) = response
                            .refresh_token
                            .as_deref()
                            .filter(|t| !t.trim().is_empty())
                        {
                            acct.refresh_token = rotated.to_string();
                        }
                        if let Some(url) = response.resource_url.as_deref() {
                            acct.resource_url = Some(normalize_resource_url(url));
                        }
                        // Provider-supplied figure; saturate instead of
                        // trusting it not to overflow.
                        acct.expires_at = Some(now.saturating_add(expires_in.saturating_mul(1000)));
                        acct.last_refresh = Some(now);
                        acct.need_refresh = false;
                        acct.updated_at = now;
                    })
                    .await?;
                metrics::counter!("account_refresh_total",
                    "provider" => provider.label(), "outcome" => "success")
                .increment(1);
                info!(account_id = %account.account_id, provider = %provider, "token refresh succeeded");
                Ok(updated)
            }
            Ok(Err(e)) if e.is_terminal() => {
                // Redacted summary only: error class + provider.
                warn!(
                    account_id = %account.account_id,
                    provider = %provider,
                    class = "invalid_grant",
                    "refresh token rejected, flagging for re-authentication"
                );
                metrics::counter!("account_refresh_total",
                    "provider" => provider.label(), "outcome" => "invalid_grant")
                .increment(1);
                self.store
                    .update(&account.account_id, |acct| {
                        acct.need_refresh = true;
                        acct.updated_at = now_millis();
                    })
                    .await?;
                Err(Error::CredentialExpired)
            }
            Ok(Err(e)) => {
                let class = match e {
                    provider_auth::Error::MalformedResponse(_) => "malformed_response",
                    _ => "transient",
                };
                warn!(
                    account_id = %account.account_id,
                    provider = %provider,
                    class,
                    "refresh failed, leaving account unchanged"
                );
                metrics::counter!("account_refresh_total",
                    "provider" => provider.label(), "outcome" => class)
                .increment(1);
                Err(Error::TemporarilyUnavailable(format!(
                    "{provider} refresh failed ({class})"
                )))
            }
            Err(_) => {
                warn!(
                    account_id = %account.account_id,
                    provider = %provider,
                    timeout_secs = self.refresh_timeout.as_secs(),
                    "refresh timed out"
                );
                metrics::counter!("account_refresh_total",
                    "provider" => provider.label(), "outcome" => "timeout")
                .increment(1);
                Err(Error::TemporarilyUnavailable(format!(
                    "{provider} refresh timed out"
                )))
            }
        }
    }

    /// Select one eligible account for a request.
    ///
    /// Eligible: Active, not `need_refresh`, and shared (or owned by the
    /// requesting user unless `shared_only`). Preference goes to the
    /// account with the furthest expiry among those with known quota
    /// headroom; otherwise least-recently-refreshed wins, so no single
    /// account is starved when telemetry is missing.
    pub async fn select(
        &self,
        provider: Provider,
        requesting_user: Option<&str>,
        shared_only: bool,
    ) -> Result<Account> {
        let candidates: Vec<Account> = self
            .store
            .list_by_provider(provider)
            .await
            .into_iter()
            .filter(|a| a.eligible_for(requesting_user, shared_only))
            .collect();

        if candidates.is_empty() {
            metrics::counter!("account_select_total",
                "provider" => provider.label(), "outcome" => "exhausted")
            .increment(1);
            return Err(Error::NoAccountAvailable);
        }

        let preferred = candidates
            .iter()
            .filter(|a| a.usage.below_known_limit() && a.expires_at.is_some())
            .max_by_key(|a| a.expires_at);

        let chosen = match preferred {
            Some(account) => account.clone(),
            None => candidates
                .iter()
                .min_by_key(|a| a.last_refresh.unwrap_or(0))
                .cloned()
                .ok_or(Error::NoAccountAvailable)?,
        };

        metrics::counter!("account_select_total",
            "provider" => provider.label(), "outcome" => "selected")
        .increment(1);
        debug!(account_id = %chosen.account_id, provider = %provider, "account selected");
        Ok(chosen)
    }

    /// Enable or disable an account. Owner or admin only.
    ///
    /// Re-enabling does not touch token state: the account stays stale
    /// until the next `ensure_fresh` validates it.
    pub async fn update_status(
        &self,
        account_id: &str,
        caller: &Caller,
        status: AccountStatus,
    ) -> Result<Account> {
        let account = self.get_managed(account_id, caller).await?;
        let updated = self
            .store
            .update(&account.account_id, |acct| {
                acct.status = status;
                acct.updated_at = now_millis();
            })
            .await?;
        info!(account_id, status = ?status, "account status updated");
        Ok(updated)
    }

    /// Rename an account. Owner or admin only.
    pub async fn rename(&self, account_id: &str, caller: &Caller, name: &str) -> Result<Account> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("account_name must not be blank".into()));
        }
        let account = self.get_managed(account_id, caller).await?;
        self.store
            .update(&account.account_id, |acct| {
                acct.account_name = name.to_string();
                acct.updated_at = now_millis();
            })
            .await
    }

    /// Hard-delete an account. Owner or admin only.
    ///
    /// Takes the account's refresh lock first, so an in-flight refresh
    /// completes its write before the row disappears and can never write
    /// it back afterwards.
    pub async fn delete(&self, account_id: &str, caller: &Caller) -> Result<()> {
        let account = self.get_managed(account_id, caller).await?;

        let lock = self.refresh_lock(&account.account_id).await;
        {
            let _guard = lock.lock().await;
            self.store.delete(&account.account_id).await?;
        }
        drop(lock);
        self.prune_lock(account_id).await;

        info!(account_id, "account deleted");
        Ok(())
    }

    /// Sanitized view of one account. Owner or admin only.
    pub async fn get_for_user(&self, account_id: &str, caller: &Caller) -> Result<AccountView> {
        let account = self.get_managed(account_id, caller).await?;
        Ok(AccountView::from(&account))
    }

    /// Sanitized views of the caller's own accounts.
    pub async fn list_for_user(&self, user_id: &str) -> Vec<AccountView> {
        self.store
            .list_by_owner(user_id)
            .await
            .iter()
            .map(AccountView::from)
            .collect()
    }

    /// Sanitized views of every account (admin listing).
    pub async fn list_all(&self) -> Vec<AccountView> {
        self.store
            .list_all()
            .await
            .iter()
            .map(AccountView::from)
            .collect()
    }

    /// Fetch an account and enforce the owner-or-admin precondition.
    async fn get_managed(&self, account_id: &str, caller: &Caller) -> Result<Account> {
        let account = self
            .store
            .get(account_id)
            .await
            .ok_or_else(|| Error::NotFound(account_id.to_string()))?;
        if !caller.may_manage(&account) {
            return Err(Error::Forbidden);
        }
        Ok(account)
    }

    /// Get or create the per-account refresh lock.
    async fn refresh_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no caller holds a clone of it.
    async fn prune_lock(&self, account_id: &str) {
        let mut locks = self.refresh_locks.lock().await;
        if let Some(lock) = locks.get(account_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(account_id);
            }
        }
    }
}
