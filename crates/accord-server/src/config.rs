//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Federation protocol tunables.
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name announced by the discovery endpoint that partners query.
    #[serde(default = "default_public_name")]
    pub public_name: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "accord_federation=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Budget for an outbound connectivity test.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Accepted clock skew for HMAC-signed requests.
    #[serde(default = "default_signature_window_secs")]
    pub signature_window_secs: i64,

    /// Days of audit history kept by a purge.
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,
}

impl FederationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_public_name() -> String {
    "Accord".to_string()
}

fn default_db_path() -> String {
    "accord.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    accord_db::DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    accord_db::DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    accord_federation::external::DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_signature_window_secs() -> i64 {
    accord_federation::auth::DEFAULT_SIGNATURE_WINDOW_SECS
}

fn default_audit_retention_days() -> u32 {
    365
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_name: default_public_name(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            signature_window_secs: default_signature_window_secs(),
            audit_retention_days: default_audit_retention_days(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ACCORD_HOST`, `ACCORD_PORT`, `ACCORD_PUBLIC_NAME`
/// - `ACCORD_DB_PATH`
/// - `ACCORD_LOG_LEVEL`, `ACCORD_LOG_JSON` ("true" or "1")
/// - `ACCORD_CONNECT_TIMEOUT_SECS`, `ACCORD_SIGNATURE_WINDOW_SECS`,
///   `ACCORD_AUDIT_RETENTION_DAYS`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if a timeout or retention value is zero.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("ACCORD_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("ACCORD_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(name) = var("ACCORD_PUBLIC_NAME") {
        config.server.public_name = name;
    }
    if let Some(db_path) = var("ACCORD_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("ACCORD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("ACCORD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(parsed) = var("ACCORD_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.federation.connect_timeout_secs = parsed;
    }
    if let Some(parsed) = var("ACCORD_SIGNATURE_WINDOW_SECS").and_then(|v| v.parse().ok()) {
        config.federation.signature_window_secs = parsed;
    }
    if let Some(parsed) = var("ACCORD_AUDIT_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
        config.federation.audit_retention_days = parsed;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.federation.connect_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "federation.connect_timeout_secs must be positive".to_string(),
        ));
    }
    if config.federation.signature_window_secs <= 0 {
        return Err(ConfigError::Invalid(
            "federation.signature_window_secs must be positive".to_string(),
        ));
    }
    if config.federation.audit_retention_days == 0 {
        return Err(ConfigError::Invalid(
            "federation.audit_retention_days must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/nonexistent/accord.toml")).expect("defaults");
        assert_eq!(config.database.path, "accord.db");
        assert_eq!(config.federation.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.federation.signature_window_secs, 300);
    }

    #[test]
    fn file_values_are_read_per_section() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[server]\nport = 8081\npublic_name = \"Riverside\"\n\n[federation]\nconnect_timeout_secs = 3"
        )
        .expect("write");

        let config = load_config(file.path().to_str()).expect("parse");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.public_name, "Riverside");
        assert_eq!(config.federation.connect_timeout_secs, 3);
        assert_eq!(config.federation.audit_retention_days, 365);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("ACCORD_PORT", "9000"),
            ("ACCORD_LOG_JSON", "1"),
            ("ACCORD_SIGNATURE_WINDOW_SECS", "60"),
            ("ACCORD_HOST", "not-an-ip"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.port, 9000);
        assert!(config.logging.json);
        assert_eq!(config.federation.signature_window_secs, 60);
        assert_eq!(config.server.host, default_host(), "unparsable values are ignored");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.federation.connect_timeout_secs = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }
}
