//! Provider registry
//!
//! Each supported provider has a fixed token endpoint and public OAuth
//! client identifier. These are not secrets; they identify the client
//! application, the same values the providers' own desktop tooling ships.

use serde::{Deserialize, Serialize};

/// Qwen OAuth token endpoint (Qwen Code device flow).
pub const QWEN_TOKEN_ENDPOINT: &str = "https://chat.qwen.ai/api/v1/oauth2/token";

/// Qwen Code public OAuth client ID.
pub const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

/// Kiro social-login refresh endpoint.
pub const KIRO_SOCIAL_TOKEN_ENDPOINT: &str =
    "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken";

/// Kiro social-login client ID (desktop app).
pub const KIRO_SOCIAL_CLIENT_ID: &str = "kiro-desktop";

/// Kiro IdC (AWS Identity Center) OIDC token endpoint.
pub const KIRO_IDC_TOKEN_ENDPOINT: &str = "https://oidc.us-east-1.amazonaws.com/token";

/// Kiro IdC registered client ID.
pub const KIRO_IDC_CLIENT_ID: &str = "kiro-idc";

/// A supported AI-service provider, determining which refresh protocol
/// and client identifier an account uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    KiroIdc,
    KiroSocial,
    Qwen,
}

impl Provider {
    /// Token endpoint for the refresh-token exchange.
    pub fn token_endpoint(&self) -> &'static str {
        match self {
            Provider::KiroIdc => KIRO_IDC_TOKEN_ENDPOINT,
            Provider::KiroSocial => KIRO_SOCIAL_TOKEN_ENDPOINT,
            Provider::Qwen => QWEN_TOKEN_ENDPOINT,
        }
    }

    /// Public OAuth client identifier sent with the exchange.
    pub fn client_id(&self) -> &'static str {
        match self {
            Provider::KiroIdc => KIRO_IDC_CLIENT_ID,
            Provider::KiroSocial => KIRO_SOCIAL_CLIENT_ID,
            Provider::Qwen => QWEN_CLIENT_ID,
        }
    }

    /// Label for logs and default account names.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::KiroIdc => "kiro_idc",
            Provider::KiroSocial => "kiro_social",
            Provider::Qwen => "qwen",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
