//! Bulk import of exported Kiro account records
//!
//! Desktop exports are JSON arrays of loosely-typed records. Parsing is
//! tolerant: every field is optional and records that fail the
//! importability pre-pass (inactive status, blank refresh token) are
//! filtered before any store write is attempted.

use account_pool::{NewAccount, PoolManager, ProviderIdentity, now_millis};
use chrono::{DateTime, NaiveDateTime};
use provider_auth::{Provider, UsagePayload};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// Expiry format used by the desktop export, local-time naive.
const LEGACY_EXPIRY_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Assumed remaining lifetime when the export carries no usable expiry.
const FALLBACK_LIFETIME_MILLIS: u64 = 3_600_000;

/// One record from a desktop account export.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyAccountRecord {
    pub id: Option<String>,
    pub label: Option<String>,
    pub email: Option<String>,
    /// `"BuilderId"` means the IdC flow; anything else is the social flow.
    pub provider: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    /// `"YYYY/MM/DD HH:MM:SS"`
    pub expires_at: Option<String>,
    pub machine_id: Option<String>,
    pub user_id: Option<String>,
    pub usage_data: Option<Value>,
    /// `"正常"` (healthy) or `"active"` count as importable.
    pub status: Option<String>,
}

/// Tally of one batch import.
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchOutcome {
    pub imported: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub filtered: usize,
}

impl LegacyAccountRecord {
    /// Pre-pass filter: only healthy records with a refresh token are
    /// worth attempting.
    pub fn is_importable(&self) -> bool {
        let status_ok = matches!(self.status.as_deref(), Some("正常") | Some("active"));
        let token_ok = self
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        status_ok && token_ok
    }

    /// Convert to a registration request. Caller has already checked
    /// [`is_importable`](Self::is_importable).
    pub fn into_new_account(self) -> NewAccount {
        let provider = match self.provider.as_deref() {
            Some("BuilderId") => Provider::KiroIdc,
            _ => Provider::KiroSocial,
        };

        let usage_payload = UsagePayload::parse(self.usage_data.as_ref());
        let email = self
            .email
            .or_else(|| usage_payload.email().map(str::to_string));
        let remote_user_id = self
            .user_id
            .or_else(|| usage_payload.user_id().map(str::to_string));

        let mut new = NewAccount::new(provider, self.refresh_token.unwrap_or_default());
        new.account_id = self.id;
        new.account_name = self.label.or_else(|| email.clone());
        new.access_token = self.access_token.unwrap_or_default();
        new.expires_at = Some(
            self.expires_at
                .as_deref()
                .and_then(parse_legacy_expiry_millis)
                .unwrap_or_else(|| now_millis() + FALLBACK_LIFETIME_MILLIS),
        );
        new.identity = ProviderIdentity {
            remote_user_id,
            // Exports predating machine ids get a generated one so later
            // imports of the same file still de-duplicate by user id.
            machine_id: Some(
                self.machine_id
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ),
            email,
        };
        new.usage = usage_payload.snapshot();
        new
    }
}

/// Import a batch of export records for one owner.
pub async fn import_legacy_batch(
    manager: &PoolManager,
    owner: Option<&str>,
    records: Vec<LegacyAccountRecord>,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for record in records {
        if !record.is_importable() {
            outcome.filtered += 1;
            continue;
        }
        match manager.register(record.into_new_account(), owner).await {
            Ok(_) => outcome.imported += 1,
            Err(account_pool::Error::Duplicate { existing_id }) => {
                info!(existing_id = %existing_id, "skipped duplicate import record");
                outcome.skipped_duplicate += 1;
            }
            Err(e) => {
                warn!(error = %e, "import record rejected");
                outcome.failed += 1;
            }
        }
    }

    outcome
}

/// Parse the desktop export's expiry format into epoch milliseconds.
pub fn parse_legacy_expiry_millis(raw: &str) -> Option<u64> {
    let parsed = NaiveDateTime::parse_from_str(raw.trim(), LEGACY_EXPIRY_FORMAT).ok()?;
    u64::try_from(parsed.and_utc().timestamp_millis()).ok()
}

/// Parse an RFC 3339 expiry (Qwen CLI credential format) into epoch
/// milliseconds.
pub fn parse_rfc3339_millis(raw: &str) -> Option<u64> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    u64::try_from(parsed.timestamp_millis()).ok()
}
