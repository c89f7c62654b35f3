//! Refresh-token exchange
//!
//! POSTs `grant_type=refresh_token` to the provider's token endpoint and
//! classifies the outcome. The exchange is pure: no persistence happens
//! here, and nothing token-shaped ever reaches a log line; log lines
//! carry only the error class, HTTP status, and provider.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::Provider;

/// Normalized success response from a token endpoint.
///
/// Only `access_token` is guaranteed. Providers may or may not rotate the
/// refresh token; callers must keep the old one when `refresh_token` is
/// absent. `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub resource_url: Option<String>,
    pub expires_in: Option<u64>,
}

/// Error body shape shared by the providers' token endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchange a refresh token for a new access token.
///
/// Classification:
/// - blank token → [`Error::EmptyCredential`], no network call
/// - provider reports `invalid_grant` → [`Error::InvalidGrant`] (terminal)
/// - network error or other non-2xx → [`Error::Transient`]
/// - 2xx without a non-blank `access_token` → [`Error::MalformedResponse`]
pub async fn refresh_access_token(
    client: &reqwest::Client,
    provider: Provider,
    refresh_token: &str,
) -> Result<RefreshResponse> {
    let refresh_token = refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(Error::EmptyCredential);
    }

    let response = client
        .post(provider.token_endpoint())
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", provider.client_id()),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await
        .map_err(|e| Error::Transient(format!("{provider} token request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Transient(format!("{provider} token response read failed: {e}")))?;

    if !status.is_success() {
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let error_code = parsed.error.unwrap_or_default();
        if error_code == "invalid_grant" {
            warn!(%provider, %status, class = "invalid_grant", "refresh token rejected");
            let description = parsed.error_description.unwrap_or_default();
            return Err(Error::InvalidGrant(format!(
                "invalid_grant (HTTP {status}) {description}"
            )));
        }
        warn!(%provider, %status, class = "transient", "token endpoint error");
        return Err(Error::Transient(format!(
            "{provider} token endpoint returned {status}"
        )));
    }

    let parsed: Option<RefreshResponse> = serde_json::from_str(&body).ok();
    match parsed {
        Some(r) if !r.access_token.trim().is_empty() => {
            debug!(%provider, "token exchange succeeded");
            Ok(r)
        }
        Some(_) => {
            warn!(%provider, %status, class = "malformed_response", "blank access_token");
            Err(Error::MalformedResponse(format!(
                "{provider} returned HTTP {status} with blank access_token"
            )))
        }
        None => {
            warn!(%provider, %status, class = "malformed_response", "unparseable body");
            Err(Error::MalformedResponse(format!(
                "{provider} returned HTTP {status} with unparseable body"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_token_fails_before_any_network_call() {
        // If the exchange attempted a request, the error would classify
        // as Transient, not EmptyCredential.
        let client = reqwest::Client::new();
        for token in ["", "   ", "\t\n"] {
            let err = refresh_access_token(&client, Provider::Qwen, token)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::EmptyCredential), "token {token:?}");
        }
    }

    #[test]
    fn success_body_with_all_optionals_absent() {
        let json = r#"{"access_token":"at_new"}"#;
        let r: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.access_token, "at_new");
        assert!(r.refresh_token.is_none());
        assert!(r.token_type.is_none());
        assert!(r.resource_url.is_none());
        assert!(r.expires_in.is_none());
    }

    #[test]
    fn success_body_with_rotation_and_expiry() {
        let json = r#"{
            "access_token": "at_new",
            "refresh_token": "rt_rotated",
            "token_type": "Bearer",
            "resource_url": "portal.qwen.ai",
            "expires_in": 3600
        }"#;
        let r: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.refresh_token.as_deref(), Some("rt_rotated"));
        assert_eq!(r.expires_in, Some(3600));
        assert_eq!(r.resource_url.as_deref(), Some("portal.qwen.ai"));
    }

    #[test]
    fn error_body_parses_oauth_error_fields() {
        let json = r#"{"error":"invalid_grant","error_description":"Token revoked"}"#;
        let b: ErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(b.error.as_deref(), Some("invalid_grant"));
        assert_eq!(b.error_description.as_deref(), Some("Token revoked"));
    }

    #[test]
    fn error_body_tolerates_garbage() {
        let b: ErrorBody = serde_json::from_str("not json").unwrap_or_default();
        assert!(b.error.is_none());
    }
}
