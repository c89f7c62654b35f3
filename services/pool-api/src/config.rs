//! Configuration types and loading
//!
//! Config precedence: CLI arg > CONFIG_PATH env var > default path.
//! The admin API key is loaded from the ADMIN_API_KEY env var or
//! `admin_api_key_file`, never stored in the TOML directly to avoid
//! leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub users: Vec<UserKey>,
    #[serde(skip)]
    pub admin_api_key: Option<Secret<String>>,
    /// Path to a file containing the admin key (alternative to ADMIN_API_KEY)
    #[serde(default)]
    pub admin_api_key_file: Option<PathBuf>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

/// Pool behavior settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Account store JSON file
    pub store_path: PathBuf,
    /// A token expiring within this margin counts as stale
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: u64,
    /// Upper bound on one provider token exchange
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

/// One internal user's API key binding
#[derive(Debug, Clone, Deserialize)]
pub struct UserKey {
    pub user_id: String,
    pub api_key: String,
}

fn default_safety_margin() -> u64 {
    60
}

fn default_refresh_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Admin key resolution order:
    /// 1. ADMIN_API_KEY env var
    /// 2. admin_api_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.pool.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        let mut seen_keys = HashSet::new();
        for user in &config.users {
            if user.user_id.trim().is_empty() || user.api_key.trim().is_empty() {
                return Err(common::Error::Config(
                    "users entries need a non-empty user_id and api_key".into(),
                ));
            }
            if !seen_keys.insert(user.api_key.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate api_key for user {}",
                    user.user_id
                )));
            }
        }

        // Resolve admin key: env var takes precedence over file
        if let Ok(key) = std::env::var("ADMIN_API_KEY") {
            config.admin_api_key = Some(Secret::new(key));
        } else if let Some(ref key_file) = config.admin_api_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read admin_api_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                config.admin_api_key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("config.toml")
    }
}
