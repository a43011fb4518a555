//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::api::ApiConfig;
use crate::gateway::{HandshakeConfig, HandshakeFailurePolicy, LinkConfig, SeqGapPolicy};
use crate::websocket::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream gateway identity and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// http(s) or ws(s) base URL
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Shared token; empty sends no auth block
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_client_mode")]
    pub client_mode: String,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default = "default_protocol")]
    pub min_protocol: u32,

    #[serde(default = "default_protocol")]
    pub max_protocol: u32,

    /// Generated once per process when unset
    pub device_id: Option<String>,

    /// Session targeted by chat messages without an explicit key
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:18789".to_string()
}

fn default_client_id() -> String {
    "mission-control".to_string()
}

fn default_client_mode() -> String {
    "ui".to_string()
}

fn default_role() -> String {
    "operator".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["operator.read".to_string(), "operator.write".to_string()]
}

fn default_protocol() -> u32 {
    3
}

fn default_session_key() -> String {
    "main".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: String::new(),
            client_id: default_client_id(),
            client_mode: default_client_mode(),
            role: default_role(),
            scopes: default_scopes(),
            min_protocol: default_protocol(),
            max_protocol: default_protocol(),
            device_id: None,
            session_key: default_session_key(),
        }
    }
}

/// Link timing and failure policies
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_ms: u64,

    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,

    #[serde(default)]
    pub on_handshake_failure: HandshakeFailurePolicy,

    #[serde(default)]
    pub on_seq_gap: SeqGapPolicy,
}

fn default_request_timeout() -> u64 {
    15_000
}

fn default_challenge_timeout() -> u64 {
    3_000
}

fn default_reconnect_initial() -> u64 {
    1_000
}

fn default_reconnect_max() -> u64 {
    30_000
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            challenge_timeout_ms: default_challenge_timeout(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
            on_handshake_failure: HandshakeFailurePolicy::default(),
            on_seq_gap: SeqGapPolicy::default(),
        }
    }
}

/// HTTP / dashboard server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_clients() -> usize {
    1000
}

fn default_status_interval() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_clients: default_max_clients(),
            status_interval_secs: default_status_interval(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("mission-control").join("config.toml")),
            Some(PathBuf::from("/etc/mission-control/config.toml")),
            Some(PathBuf::from("./mission-control.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// An explicit path must load; otherwise search the default locations
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                Ok(config)
            }
            None => Ok(Self::load_default()),
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; prefixed names win over the short ones
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        if let Some(url) = first(&["MISSION_CONTROL_GATEWAY_URL", "CLAWDBOT_GATEWAY"]) {
            self.gateway.url = url;
        }
        if let Some(token) = first(&["MISSION_CONTROL_GATEWAY_TOKEN", "GATEWAY_TOKEN"]) {
            self.gateway.token = token;
        }

        if let Some(host) = lookup("MISSION_CONTROL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = first(&["MISSION_CONTROL_PORT", "PORT"]) {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid port override"),
            }
        }

        if let Some(level) = lookup("MISSION_CONTROL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("MISSION_CONTROL_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings the link cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway_ws_url()?;

        if self.gateway.min_protocol > self.gateway.max_protocol {
            return Err(ConfigError::Invalid(format!(
                "gateway.min_protocol ({}) exceeds gateway.max_protocol ({})",
                self.gateway.min_protocol, self.gateway.max_protocol
            )));
        }
        if self.link.request_timeout_ms == 0 || self.link.challenge_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link timeouts must be greater than zero".to_string(),
            ));
        }
        if self.link.reconnect_initial_ms == 0
            || self.link.reconnect_initial_ms > self.link.reconnect_max_ms
        {
            return Err(ConfigError::Invalid(format!(
                "link.reconnect_initial_ms ({}) must be non-zero and at most link.reconnect_max_ms ({})",
                self.link.reconnect_initial_ms, self.link.reconnect_max_ms
            )));
        }
        if self.server.status_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.status_interval_secs must be greater than zero".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got \"{}\"",
                other
            ))),
        }
    }

    /// Gateway URL with http(s) rewritten to ws(s)
    pub fn gateway_ws_url(&self) -> Result<String, ConfigError> {
        let mut url = Url::parse(&self.gateway.url).map_err(|e| {
            ConfigError::Invalid(format!("gateway.url {:?}: {}", self.gateway.url, e))
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConfigError::Invalid(format!(
                    "gateway.url has unsupported scheme {:?}",
                    other
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            ConfigError::Invalid(format!("gateway.url {:?} cannot use {}", self.gateway.url, scheme))
        })?;

        Ok(url.to_string())
    }

    pub fn link_config(&self) -> Result<LinkConfig, ConfigError> {
        let defaults = HandshakeConfig::default();
        let handshake = HandshakeConfig {
            min_protocol: self.gateway.min_protocol,
            max_protocol: self.gateway.max_protocol,
            client_id: self.gateway.client_id.clone(),
            mode: self.gateway.client_mode.clone(),
            role: self.gateway.role.clone(),
            scopes: self.gateway.scopes.clone(),
            token: Some(self.gateway.token.clone()).filter(|t| !t.is_empty()),
            device_id: self.gateway.device_id.clone().unwrap_or(defaults.device_id),
            client_version: defaults.client_version,
            platform: defaults.platform,
        };

        Ok(LinkConfig {
            url: self.gateway_ws_url()?,
            handshake,
            request_timeout: Duration::from_millis(self.link.request_timeout_ms),
            challenge_timeout: Duration::from_millis(self.link.challenge_timeout_ms),
            reconnect_initial: Duration::from_millis(self.link.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.link.reconnect_max_ms),
            on_handshake_failure: self.link.on_handshake_failure,
            on_seq_gap: self.link.on_seq_gap,
            session_key: self.gateway.session_key.clone(),
        })
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.server.max_clients,
            status_interval: Duration::from_secs(self.server.status_interval_secs),
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            cors_origins: self.server.cors_origins.clone(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Mission Control Configuration
#
# Environment variables override these settings:
# - MISSION_CONTROL_GATEWAY_URL (or CLAWDBOT_GATEWAY)
# - MISSION_CONTROL_GATEWAY_TOKEN (or GATEWAY_TOKEN)
# - MISSION_CONTROL_HOST
# - MISSION_CONTROL_PORT (or PORT)
# - MISSION_CONTROL_LOG_LEVEL
# - MISSION_CONTROL_LOG_FORMAT

[gateway]
# Gateway base URL; http/https are rewritten to ws/wss
url = "http://127.0.0.1:18789"

# Shared gateway token (empty = no auth block)
token = ""

# Client identity presented during the handshake
client_id = "mission-control"
client_mode = "ui"
role = "operator"
scopes = ["operator.read", "operator.write"]

# Supported protocol range
min_protocol = 3
max_protocol = 3

# Stable device id (generated per process when unset)
# device_id = "mission-control-desk"

# Session used for chat messages without an explicit key
session_key = "main"

[link]
# Deadline for every gateway request (ms)
request_timeout_ms = 15000

# Wait this long for connect.challenge before authenticating without a nonce (ms)
challenge_timeout_ms = 3000

# Reconnect backoff: doubles from initial up to max (ms)
reconnect_initial_ms = 1000
reconnect_max_ms = 30000

# After a rejected or timed-out handshake: wait_for_close or reconnect
on_handshake_failure = "wait_for_close"

# On an event sequence gap: ignore or resync
on_seq_gap = "ignore"

[server]
host = "0.0.0.0"
port = 3001

# Maximum concurrent dashboard connections
max_clients = 1000

# Liveness status broadcast period (seconds)
status_interval_secs = 10

# Allowed CORS origins (empty = any)
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.url, "http://127.0.0.1:18789");
        assert_eq!(config.gateway.session_key, "main");
        assert_eq!(config.link.request_timeout_ms, 15_000);
        assert_eq!(config.link.on_handshake_failure, HandshakeFailurePolicy::WaitForClose);
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.status_interval_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            r#"
[gateway]
url = "https://gw.example.com:8443"
token = "abc"

[link]
on_seq_gap = "resync"
on_handshake_failure = "reconnect"

[server]
port = 4000
"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gateway.token, "abc");
        assert_eq!(config.gateway.client_id, "mission-control");
        assert_eq!(config.link.on_seq_gap, SeqGapPolicy::Resync);
        assert_eq!(config.link.on_handshake_failure, HandshakeFailurePolicy::Reconnect);
        assert_eq!(config.link.reconnect_max_ms, 30_000);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/mission-control.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = write_config("[server\nport = ");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_default_config_template_parses() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gateway.url, default_gateway_url());
        assert_eq!(config.link.challenge_timeout_ms, 3_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CLAWDBOT_GATEWAY", "http://legacy:1"),
            ("MISSION_CONTROL_GATEWAY_URL", "ws://preferred:2"),
            ("GATEWAY_TOKEN", "tok"),
            ("PORT", "5000"),
            ("MISSION_CONTROL_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.gateway.url, "ws://preferred:2");
        assert_eq!(config.gateway.token, "tok");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_port_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "PORT").then(|| "abc".to_string()));
        assert_eq!(config.server.port, 3001);
    }

    #[test]
    fn test_ws_url_rewrite() {
        let mut config = Config::default();
        assert_eq!(config.gateway_ws_url().unwrap(), "ws://127.0.0.1:18789/");

        config.gateway.url = "https://gw.example.com".to_string();
        assert_eq!(config.gateway_ws_url().unwrap(), "wss://gw.example.com/");

        config.gateway.url = "wss://gw.example.com/socket".to_string();
        assert_eq!(config.gateway_ws_url().unwrap(), "wss://gw.example.com/socket");

        config.gateway.url = "ftp://gw.example.com".to_string();
        assert!(matches!(config.gateway_ws_url(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.gateway.min_protocol = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.link.reconnect_initial_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_link_config_mapping() {
        let mut config = Config::default();
        config.gateway.device_id = Some("desk".to_string());
        let link = config.link_config().unwrap();

        assert_eq!(link.url, "ws://127.0.0.1:18789/");
        assert_eq!(link.handshake.device_id, "desk");
        assert_eq!(link.handshake.token, None);
        assert_eq!(link.request_timeout, Duration::from_secs(15));
        assert_eq!(link.reconnect_max, Duration::from_secs(30));

        config.gateway.token = "secret".to_string();
        let link = config.link_config().unwrap();
        assert_eq!(link.handshake.token.as_deref(), Some("secret"));
    }
}
