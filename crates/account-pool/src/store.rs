//! Durable account store
//!
//! A JSON file mapping account ids to accounts. All writes use atomic
//! temp-file + rename, and the file is chmod 0600 because it holds OAuth
//! tokens. A tokio Mutex serializes access, so every update is
//! all-or-nothing: readers never observe an account with a new access
//! token but a stale expiry.
//!
//! Uniqueness is enforced at insert: `account_id` globally, and
//! `(provider, remote_user_id)` / `(provider, machine_id)` when present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use provider_auth::Provider;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::{Account, ProviderIdentity};
use crate::error::{Error, Result};

/// Thread-safe account file manager.
pub struct AccountStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Account>>,
}

impl AccountStore {
    /// Load accounts from the given file path.
    ///
    /// A missing file is created as `{}` so the pool can cold-start with
    /// zero accounts and be populated through the import endpoints.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading account file: {e}")))?;
            let accounts: HashMap<String, Account> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing account file: {e}")))?;
            info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
            accounts
        } else {
            info!(path = %path.display(), "account file not found, starting empty");
            let accounts = HashMap::new();
            write_atomic(&path, &accounts).await?;
            accounts
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of one account.
    pub async fn get(&self, account_id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.get(account_id).cloned()
    }

    /// Find an account colliding with the given identity for a provider.
    pub async fn find_by_identity(
        &self,
        provider: Provider,
        identity: &ProviderIdentity,
    ) -> Option<Account> {
        let state = self.state.lock().await;
        state
            .values()
            .find(|a| a.provider == provider && a.identity.collides_with(identity))
            .cloned()
    }

    /// Insert a new account, enforcing the uniqueness invariants.
    ///
    /// Returns [`Error::Duplicate`] with the pre-existing id instead of
    /// overwriting; the conflicting record is left untouched.
    pub async fn insert(&self, account: Account) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.contains_key(&account.account_id) {
            return Err(Error::Duplicate {
                existing_id: account.account_id,
            });
        }
        if let Some(existing) = state
            .values()
            .find(|a| a.provider == account.provider && a.identity.collides_with(&account.identity))
        {
            return Err(Error::Duplicate {
                existing_id: existing.account_id.clone(),
            });
        }
        debug!(account_id = %account.account_id, provider = %account.provider, "inserted account");
        state.insert(account.account_id.clone(), account);
        write_atomic(&self.path, &state).await
    }

    /// Apply a mutation to an existing account and persist.
    ///
    /// The closure runs under the store lock, so the whole mutation lands
    /// atomically. Returns the updated account, or [`Error::NotFound`] when
    /// the id no longer exists; a deleted row is never resurrected.
    pub async fn update<F>(&self, account_id: &str, mutate: F) -> Result<Account>
    where
        F: FnOnce(&mut Account),
    {
        let mut state = self.state.lock().await;
        let account = state
            .get_mut(account_id)
            .ok_or_else(|| Error::NotFound(account_id.to_string()))?;
        mutate(account);
        let updated = account.clone();
        write_atomic(&self.path, &state).await?;
        Ok(updated)
    }

    /// Hard-delete an account. Returns whether it existed.
    pub async fn delete(&self, account_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.remove(account_id);
        if removed.is_some() {
            debug!(account_id, "deleted account");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed.is_some())
    }

    /// All accounts for one provider.
    pub async fn list_by_provider(&self, provider: Provider) -> Vec<Account> {
        let state = self.state.lock().await;
        state
            .values()
            .filter(|a| a.provider == provider)
            .cloned()
            .collect()
    }

    /// All accounts owned by a user.
    pub async fn list_by_owner(&self, owner_user_id: &str) -> Vec<Account> {
        let state = self.state.lock().await;
        state
            .values()
            .filter(|a| a.owner_user_id.as_deref() == Some(owner_user_id))
            .cloned()
            .collect()
    }

    /// Every account (admin view).
    pub async fn list_all(&self) -> Vec<Account> {
        let state = self.state.lock().await;
        state.values().cloned().collect()
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the account map to disk atomically (temp file + rename, 0600).
async fn write_atomic(path: &Path, data: &HashMap<String, Account>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing accounts: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("account path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".accounts.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), "persisted accounts");
    Ok(())
}
