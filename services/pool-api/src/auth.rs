//! API-key authentication
//!
//! Callers present `Authorization: Bearer <key>`. Keys map to internal
//! user ids from the config; the admin key grants the admin caller. Keys
//! are compared but never logged.

use std::collections::HashMap;

use account_pool::Caller;
use axum::http::HeaderMap;

use crate::config::Config;

/// Resolved key table, built once from the config at startup.
pub struct AuthKeys {
    admin_key: Option<String>,
    user_keys: HashMap<String, String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// No Authorization header, or it is not a Bearer scheme.
    MissingCredentials,
    /// Key presented but not known.
    UnknownKey,
}

impl AuthKeys {
    /// Build a key table from `(api_key, user_id)` pairs plus an optional
    /// admin key.
    pub fn new(
        admin_key: Option<String>,
        users: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            admin_key,
            user_keys: users.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.admin_api_key.as_ref().map(|k| k.expose().to_owned()),
            config
                .users
                .iter()
                .map(|u| (u.api_key.clone(), u.user_id.clone())),
        )
    }

    /// Resolve the caller from request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        let key = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
        if self.admin_key.as_deref() == Some(key) {
            return Ok(Caller::admin());
        }
        match self.user_keys.get(key) {
            Some(user_id) => Ok(Caller::user(user_id.clone())),
            None => Err(AuthError::UnknownKey),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}
