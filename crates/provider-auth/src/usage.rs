//! Usage/quota payload extraction
//!
//! Providers return an opaque account-status document with subscription and
//! quota figures. Extraction is total: the payload is advisory telemetry,
//! so every missing, null, or mistyped field degrades to a documented
//! default instead of failing the surrounding operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized quota snapshot stored on an account.
///
/// Defaults: zero usage, `"unknown"` subscription, null dates. Timestamps
/// are epoch milliseconds; zero or negative provider timestamps normalize
/// to `None`, never to "now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub subscription: String,
    pub current_usage: f64,
    pub usage_limit: f64,
    pub reset_at: Option<i64>,
    pub free_trial_active: bool,
    pub free_trial_usage: Option<f64>,
    pub free_trial_limit: Option<f64>,
    pub free_trial_expires_at: Option<i64>,
}

impl Default for UsageSnapshot {
    fn default() -> Self {
        Self {
            subscription: "unknown".to_string(),
            current_usage: 0.0,
            usage_limit: 0.0,
            reset_at: None,
            free_trial_active: false,
            free_trial_usage: None,
            free_trial_limit: None,
            free_trial_expires_at: None,
        }
    }
}

impl UsageSnapshot {
    /// Whether the snapshot carries a usable limit and is still under it.
    ///
    /// A zero limit means the provider never reported one; selection treats
    /// such accounts as having unknown quota rather than as exhausted.
    pub fn below_known_limit(&self) -> bool {
        self.usage_limit > 0.0 && self.current_usage < self.usage_limit
    }
}

/// The provider usage document, modeled as explicit optional fields.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsagePayload {
    subscription_info: SubscriptionInfo,
    usage_breakdown_list: Option<Vec<UsageBreakdown>>,
    next_date_reset: Option<i64>,
    user_info: UserInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SubscriptionInfo {
    subscription_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageBreakdown {
    resource_type: Option<String>,
    current_usage: Option<f64>,
    current_usage_with_precision: Option<f64>,
    usage_limit: Option<f64>,
    usage_limit_with_precision: Option<f64>,
    free_trial_info: Option<FreeTrialInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FreeTrialInfo {
    free_trial_status: Option<String>,
    current_usage: Option<f64>,
    current_usage_with_precision: Option<f64>,
    usage_limit: Option<f64>,
    usage_limit_with_precision: Option<f64>,
    free_trial_expiry: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserInfo {
    user_id: Option<String>,
    email: Option<String>,
}

impl UsagePayload {
    /// Parse a raw payload, tolerating null, non-objects, and mistyped
    /// fields. Anything unusable parses as the empty payload.
    pub fn parse(payload: Option<&Value>) -> Self {
        match payload {
            Some(value) if !value.is_null() => {
                serde_json::from_value(value.clone()).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }

    /// Provider-assigned stable user id, when present.
    pub fn user_id(&self) -> Option<&str> {
        self.user_info.user_id.as_deref()
    }

    /// Account email, when present.
    pub fn email(&self) -> Option<&str> {
        self.user_info.email.as_deref()
    }

    /// Build the normalized snapshot from the CREDIT breakdown entry.
    pub fn snapshot(&self) -> UsageSnapshot {
        let credit = self
            .usage_breakdown_list
            .iter()
            .flatten()
            .find(|b| b.resource_type.as_deref() == Some("CREDIT"));

        let subscription = self
            .subscription_info
            .subscription_title
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        let mut snapshot = UsageSnapshot {
            subscription,
            reset_at: epoch_secs_to_millis(self.next_date_reset),
            ..UsageSnapshot::default()
        };

        let Some(credit) = credit else {
            return snapshot;
        };

        snapshot.current_usage =
            with_precision(credit.current_usage_with_precision, credit.current_usage).unwrap_or(0.0);
        snapshot.usage_limit =
            with_precision(credit.usage_limit_with_precision, credit.usage_limit).unwrap_or(0.0);

        if let Some(trial) = &credit.free_trial_info {
            snapshot.free_trial_active = trial.free_trial_status.as_deref() == Some("ACTIVE");
            snapshot.free_trial_usage =
                with_precision(trial.current_usage_with_precision, trial.current_usage);
            snapshot.free_trial_limit =
                with_precision(trial.usage_limit_with_precision, trial.usage_limit);
            snapshot.free_trial_expires_at = epoch_secs_to_millis(trial.free_trial_expiry);
        }

        snapshot
    }
}

/// Extract a normalized usage snapshot from a raw provider payload.
pub fn extract_usage(payload: Option<&Value>) -> UsageSnapshot {
    UsagePayload::parse(payload).snapshot()
}

/// Prefer the precise figure when the provider supplies both.
fn with_precision(precise: Option<f64>, rounded: Option<f64>) -> Option<f64> {
    precise.or(rounded)
}

/// Epoch seconds to epoch milliseconds; invalid or zero becomes `None`.
fn epoch_secs_to_millis(secs: Option<i64>) -> Option<i64> {
    match secs {
        Some(s) if s > 0 => Some(s * 1000),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn none_payload_yields_defaults() {
        let snapshot = extract_usage(None);
        assert_eq!(snapshot, UsageSnapshot::default());
        assert_eq!(snapshot.subscription, "unknown");
        assert_eq!(snapshot.current_usage, 0.0);
        assert!(snapshot.reset_at.is_none());
    }

    #[test]
    fn null_payload_yields_defaults() {
        assert_eq!(extract_usage(Some(&Value::Null)), UsageSnapshot::default());
    }

    #[test]
    fn empty_object_yields_defaults() {
        assert_eq!(extract_usage(Some(&json!({}))), UsageSnapshot::default());
    }

    #[test]
    fn missing_breakdown_list_yields_defaults_with_subscription() {
        let payload = json!({
            "subscriptionInfo": { "subscriptionTitle": "Pro" },
            "nextDateReset": 1767225600
        });
        let snapshot = extract_usage(Some(&payload));
        assert_eq!(snapshot.subscription, "Pro");
        assert_eq!(snapshot.reset_at, Some(1_767_225_600_000));
        assert_eq!(snapshot.current_usage, 0.0);
        assert_eq!(snapshot.usage_limit, 0.0);
    }

    #[test]
    fn credit_breakdown_prefers_precision_variants() {
        let payload = json!({
            "usageBreakdownList": [
                { "resourceType": "REQUEST", "currentUsage": 999.0 },
                {
                    "resourceType": "CREDIT",
                    "currentUsage": 12.0,
                    "currentUsageWithPrecision": 12.34,
                    "usageLimit": 50.0,
                    "usageLimitWithPrecision": 50.25
                }
            ]
        });
        let snapshot = extract_usage(Some(&payload));
        assert_eq!(snapshot.current_usage, 12.34);
        assert_eq!(snapshot.usage_limit, 50.25);
    }

    #[test]
    fn rounded_figures_used_when_precision_absent() {
        let payload = json!({
            "usageBreakdownList": [
                { "resourceType": "CREDIT", "currentUsage": 12.0, "usageLimit": 50.0 }
            ]
        });
        let snapshot = extract_usage(Some(&payload));
        assert_eq!(snapshot.current_usage, 12.0);
        assert_eq!(snapshot.usage_limit, 50.0);
    }

    #[test]
    fn free_trial_fields_extracted() {
        let payload = json!({
            "usageBreakdownList": [{
                "resourceType": "CREDIT",
                "freeTrialInfo": {
                    "freeTrialStatus": "ACTIVE",
                    "currentUsageWithPrecision": 1.5,
                    "usageLimit": 10.0,
                    "freeTrialExpiry": 1767225600
                }
            }]
        });
        let snapshot = extract_usage(Some(&payload));
        assert!(snapshot.free_trial_active);
        assert_eq!(snapshot.free_trial_usage, Some(1.5));
        assert_eq!(snapshot.free_trial_limit, Some(10.0));
        assert_eq!(snapshot.free_trial_expires_at, Some(1_767_225_600_000));
    }

    #[test]
    fn inactive_trial_status_is_not_active() {
        let payload = json!({
            "usageBreakdownList": [{
                "resourceType": "CREDIT",
                "freeTrialInfo": { "freeTrialStatus": "EXPIRED" }
            }]
        });
        assert!(!extract_usage(Some(&payload)).free_trial_active);
    }

    #[test]
    fn zero_timestamp_normalizes_to_none() {
        let payload = json!({ "nextDateReset": 0 });
        assert!(extract_usage(Some(&payload)).reset_at.is_none());

        let payload = json!({ "nextDateReset": -5 });
        assert!(extract_usage(Some(&payload)).reset_at.is_none());
    }

    #[test]
    fn mistyped_payload_degrades_to_defaults() {
        let payload = json!("not an object");
        assert_eq!(extract_usage(Some(&payload)), UsageSnapshot::default());

        let payload = json!([1, 2, 3]);
        assert_eq!(extract_usage(Some(&payload)), UsageSnapshot::default());
    }

    #[test]
    fn user_identity_accessors() {
        let payload = json!({
            "userInfo": { "userId": "remote-1", "email": "a@b.c" }
        });
        let parsed = UsagePayload::parse(Some(&payload));
        assert_eq!(parsed.user_id(), Some("remote-1"));
        assert_eq!(parsed.email(), Some("a@b.c"));

        let empty = UsagePayload::parse(None);
        assert!(empty.user_id().is_none());
        assert!(empty.email().is_none());
    }

    #[test]
    fn below_known_limit_semantics() {
        let mut s = UsageSnapshot::default();
        assert!(!s.below_known_limit(), "zero limit means unknown quota");
        s.usage_limit = 10.0;
        s.current_usage = 5.0;
        assert!(s.below_known_limit());
        s.current_usage = 10.0;
        assert!(!s.below_known_limit());
    }
}
