use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete chatbridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl ServerConfig {
    pub fn oauth_redirect_uri(&self) -> String {
        format!(
            "{}/oauth/slack/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

/// Slack endpoints and app credentials.
///
/// `client_id` / `client_secret` are never read from the file; they come from
/// `SLACK_CLIENT_ID` / `SLACK_CLIENT_SECRET` (see [`BridgeConfig::apply_env`]).
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub user_scopes: Vec<String>,
    #[serde(skip)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: String,
}

fn default_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_authorize_url() -> String {
    "https://slack.com/oauth/v2/authorize".to_string()
}

fn default_scopes() -> Vec<String> {
    ["chat:write", "channels:history", "channels:read", "groups:read", "users:read"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            authorize_url: default_authorize_url(),
            scopes: default_scopes(),
            user_scopes: Vec::new(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

/// OAuth transaction and token lifecycle timings
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a state token stays redeemable
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
    /// Tokens expiring within this margin are refreshed before use
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_seconds: i64,
    /// Re-check non-expiring tokens with the platform at most this often.
    /// Unset means non-expiring tokens are trusted as-is.
    #[serde(default)]
    pub revalidate_interval_seconds: Option<u64>,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

fn default_refresh_margin() -> i64 {
    90
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
            refresh_margin_seconds: default_refresh_margin(),
            revalidate_interval_seconds: None,
        }
    }
}

/// Platform call timeout and retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Total attempts for retryable failures (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    /// Upper bound on any single wait, including server-provided Retry-After
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_seconds: default_max_backoff(),
        }
    }
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Tool dispatch limits
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Per-user tool calls per minute; 0 disables local throttling
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u64,
}

fn default_calls_per_minute() -> u64 {
    600
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
        }
    }
}

/// Credential database location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "chatbridge.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl BridgeConfig {
    /// Overlay environment variables onto a parsed config.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SLACK_CLIENT_ID") {
            self.slack.client_id = v;
        }
        if let Ok(v) = std::env::var("SLACK_CLIENT_SECRET") {
            self.slack.client_secret = v;
        }
        if let Ok(v) = std::env::var("CHATBRIDGE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CHATBRIDGE_DATABASE") {
            self.storage.database_path = v;
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. Environment overrides are applied either way.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?
    } else {
        BridgeConfig::default()
    };
    config.apply_env();
    Ok(config)
}
