use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::models::UserType;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local accounts and profiles, for development and tests
    Memory,
    /// Hosted auth/storage service reached over HTTP
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    /// Base URL of the hosted service (required for `rest`)
    pub url: Option<String>,
    /// Public key sent with auth requests
    pub anon_key: Option<String>,
    /// Privileged key used for profile table access
    pub service_role_key: Option<String>,
    /// Timeout applied to every request against the service
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How often the profile insert feed polls for new rows
    #[serde(default = "default_feed_poll_interval")]
    pub feed_poll_interval_secs: u64,
    /// Accounts created at startup by the in-memory backend
    #[serde(default)]
    pub seed_accounts: Vec<SeedAccount>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            url: None,
            anon_key: None,
            service_role_key: None,
            request_timeout_secs: default_request_timeout(),
            feed_poll_interval_secs: default_feed_poll_interval(),
            seed_accounts: Vec::new(),
        }
    }
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Memory
}

fn default_request_timeout() -> u64 {
    15
}

fn default_feed_poll_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Ceiling on the initial session/profile lookup before loading is forced off
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
    /// Delay before an authenticated visitor is sent from the landing page to a dashboard
    #[serde(default = "default_landing_redirect_delay")]
    pub landing_redirect_delay_ms: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub secure_cookie: bool,
    /// Browser sessions untouched for this long are torn down
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_session_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl SessionConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn landing_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.landing_redirect_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout(),
            landing_redirect_delay_ms: default_landing_redirect_delay(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
            idle_timeout_secs: default_idle_timeout(),
            cleanup_interval_secs: default_session_cleanup_interval(),
        }
    }
}

fn default_init_timeout() -> u64 {
    10
}

fn default_landing_redirect_delay() -> u64 {
    1000
}

fn default_cookie_name() -> String {
    "marketplace_session".to_string()
}

fn default_idle_timeout() -> u64 {
    // 7 days
    7 * 24 * 60 * 60
}

fn default_session_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Requests per window for JSON API endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests per window for credential submissions (login, sign-up)
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests() -> u32 {
    120
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Secrets are usually injected through the environment rather than the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MARKETPLACE_BACKEND_URL") {
            self.backend.url = Some(url);
        }
        if let Ok(key) = std::env::var("MARKETPLACE_BACKEND_ANON_KEY") {
            self.backend.anon_key = Some(key);
        }
        if let Ok(key) = std::env::var("MARKETPLACE_BACKEND_SERVICE_ROLE_KEY") {
            self.backend.service_role_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.kind == BackendKind::Rest {
            if self.backend.url.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("backend.url is required for the rest backend");
            }
            if self.backend.anon_key.is_none() || self.backend.service_role_key.is_none() {
                anyhow::bail!("backend.anon_key and backend.service_role_key are required for the rest backend");
            }
        }
        if self.session.cookie_name.is_empty() {
            anyhow::bail!("session.cookie_name must not be empty");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.backend.kind, BackendKind::Memory);
        assert_eq!(config.session.init_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.landing_redirect_delay(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_seed_accounts() {
        let config = Config::from_toml(
            r#"
            [backend]
            kind = "memory"

            [[backend.seed_accounts]]
            email = "root@example.com"
            password = "correct-horse"
            full_name = "Root"
            user_type = "super_admin"
            is_verified = true

            [session]
            landing_redirect_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.seed_accounts.len(), 1);
        assert_eq!(
            config.backend.seed_accounts[0].user_type,
            Some(UserType::SuperAdmin)
        );
        assert_eq!(config.session.landing_redirect_delay_ms, 250);
        assert_eq!(config.session.init_timeout_secs, 10);
    }

    #[test]
    fn test_rest_backend_requires_url_and_keys() {
        let mut config = Config::from_toml("[backend]\nkind = \"rest\"\n").unwrap();
        assert!(config.validate().is_err());

        config.backend.url = Some("https://example.supabase.co".to_string());
        assert!(config.validate().is_err());

        config.backend.anon_key = Some("anon".to_string());
        config.backend.service_role_key = Some("service".to_string());
        assert!(config.validate().is_ok());
    }
}
