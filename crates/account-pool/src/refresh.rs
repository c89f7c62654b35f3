//! Token refresher capability
//!
//! The pool manager depends on this trait rather than on concrete provider
//! clients, so tests can inject a refresher and the manager never knows
//! which OAuth protocol variant is behind an account.

use async_trait::async_trait;
use provider_auth::{Provider, RefreshResponse, refresh_access_token};

/// Performs the refresh-token exchange for a provider.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> provider_auth::Result<RefreshResponse>;
}

/// Production refresher backed by a shared reqwest client.
pub struct HttpRefresher {
    client: reqwest::Client,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> provider_auth::Result<RefreshResponse> {
        refresh_access_token(&self.client, provider, refresh_token).await
    }
}
