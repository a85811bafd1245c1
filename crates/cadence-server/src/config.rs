//! Server configuration loading from file and environment variables.

use cadence_types::RuntimeMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
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

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub primary: PrimaryProviderConfig,

    #[serde(default)]
    pub secondary: SecondaryProviderConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    /// Chat delegate services keyed by agent identifier.
    #[serde(default)]
    pub delegates: HashMap<String, ServiceEndpoint>,

    /// Admin task executor service.
    #[serde(default)]
    pub admin: Option<ServiceEndpoint>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name reported in startup logs.
    #[serde(default = "default_server_name")]
    pub name: String,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Open the store read-only and skip migrations.
    #[serde(default)]
    pub read_only: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cadence_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// `production` withholds credential diagnostics from logs and errors.
    #[serde(default)]
    pub mode: RuntimeMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Cookie carrying the session token.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Upgrade attempts allowed per client IP per minute.
    #[serde(default = "default_max_upgrades_per_minute")]
    pub max_upgrades_per_minute: u32,
}

/// Primary provider (Gemini Live) settings.
#[derive(Clone, Deserialize)]
pub struct PrimaryProviderConfig {
    #[serde(default = "default_primary_model")]
    pub model: String,

    #[serde(default = "default_primary_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Try the pre-shared key before delegated identity.
    #[serde(default)]
    pub force_api_key: bool,

    /// Use the pre-shared key exclusively.
    #[serde(default)]
    pub disable_oauth: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Service account key file for the signed-assertion exchange.
    #[serde(default)]
    pub service_account_path: Option<PathBuf>,

    #[serde(default = "default_metadata_host")]
    pub metadata_host: String,
}

/// Secondary provider (OpenAI Realtime protocol) settings.
#[derive(Clone, Deserialize)]
pub struct SecondaryProviderConfig {
    #[serde(default = "default_secondary_model")]
    pub model: String,

    #[serde(default = "default_secondary_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// Relay session tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Re-establish against the secondary provider when the primary fails
    /// before the session opens.
    #[serde(default = "default_true")]
    pub enable_failover: bool,

    #[serde(default = "default_credential_timeout_ms")]
    pub credential_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between the error frame and the close frame after an upstream drop.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,

    /// Per-direction frame buffer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_server_name() -> String {
    "cadence".to_string()
}

fn default_db_path() -> String {
    "cadence.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cookie_name() -> String {
    "session_token".to_string()
}

fn default_max_upgrades_per_minute() -> u32 {
    30
}

fn default_primary_model() -> String {
    "models/gemini-2.0-flash-live-001".to_string()
}

fn default_primary_endpoint() -> String {
    cadence_realtime::DEFAULT_PRIMARY_ENDPOINT.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/cloud-platform".to_string(),
        "https://www.googleapis.com/auth/generative-language".to_string(),
    ]
}

fn default_metadata_host() -> String {
    cadence_credentials::DEFAULT_METADATA_HOST.to_string()
}

fn default_secondary_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_secondary_endpoint() -> String {
    cadence_realtime::DEFAULT_SECONDARY_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_credential_timeout_ms() -> u64 {
    8_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_close_grace_ms() -> u64 {
    250
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: default_server_name(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            read_only: false,
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

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_upgrades_per_minute: default_max_upgrades_per_minute(),
        }
    }
}

impl Default for PrimaryProviderConfig {
    fn default() -> Self {
        Self {
            model: default_primary_model(),
            endpoint: default_primary_endpoint(),
            scopes: default_scopes(),
            force_api_key: false,
            disable_oauth: false,
            api_key: None,
            service_account_path: None,
            metadata_host: default_metadata_host(),
        }
    }
}

impl Default for SecondaryProviderConfig {
    fn default() -> Self {
        Self {
            model: default_secondary_model(),
            endpoint: default_secondary_endpoint(),
            api_key: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enable_failover: true,
            credential_timeout_ms: default_credential_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl std::fmt::Debug for PrimaryProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryProviderConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("scopes", &self.scopes)
            .field("force_api_key", &self.force_api_key)
            .field("disable_oauth", &self.disable_oauth)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("service_account_path", &self.service_account_path)
            .field("metadata_host", &self.metadata_host)
            .finish()
    }
}

impl std::fmt::Debug for SecondaryProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryProviderConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override held a value of the wrong shape.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if an override cannot be parsed.
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

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

/// Applies environment overrides read through `lookup`.
///
/// - `CADENCE_HOST`, `CADENCE_PORT`, `CADENCE_SERVER_NAME`
/// - `CADENCE_DB_PATH`
/// - `CADENCE_LOG_LEVEL`, `CADENCE_LOG_JSON`
/// - `CADENCE_ENV` (`production` / `development`)
/// - `CADENCE_SESSION_COOKIE`
/// - `CADENCE_MODEL`, `CADENCE_OAUTH_SCOPES` (comma separated)
/// - `CADENCE_FORCE_API_KEY`, `CADENCE_DISABLE_OAUTH`, `CADENCE_PRIMARY_API_KEY`
/// - `GOOGLE_APPLICATION_CREDENTIALS`, `GCE_METADATA_HOST`
/// - `CADENCE_SECONDARY_API_KEY`, `CADENCE_ENABLE_FAILOVER`
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnv` for unparseable flags, ports or modes.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    if let Some(host) = lookup("CADENCE_HOST") {
        config.server.host = host.parse().map_err(|_| ConfigError::InvalidEnv {
            var: "CADENCE_HOST",
            value: host.clone(),
        })?;
    }
    if let Some(port) = lookup("CADENCE_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
            var: "CADENCE_PORT",
            value: port.clone(),
        })?;
    }
    if let Some(name) = lookup("CADENCE_SERVER_NAME") {
        config.server.name = name;
    }
    if let Some(db_path) = lookup("CADENCE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("CADENCE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CADENCE_LOG_JSON") {
        config.logging.json = parse_flag("CADENCE_LOG_JSON", &json)?;
    }
    if let Some(mode) = lookup("CADENCE_ENV") {
        config.runtime.mode = mode.parse().map_err(|_| ConfigError::InvalidEnv {
            var: "CADENCE_ENV",
            value: mode.clone(),
        })?;
    }
    if let Some(cookie) = lookup("CADENCE_SESSION_COOKIE") {
        config.auth.cookie_name = cookie;
    }

    if let Some(model) = lookup("CADENCE_MODEL").filter(|m| !m.trim().is_empty()) {
        config.primary.model = model;
    }
    if let Some(scopes) = lookup("CADENCE_OAUTH_SCOPES") {
        let scopes: Vec<String> = scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !scopes.is_empty() {
            config.primary.scopes = scopes;
        }
    }
    if let Some(flag) = lookup("CADENCE_FORCE_API_KEY") {
        config.primary.force_api_key = parse_flag("CADENCE_FORCE_API_KEY", &flag)?;
    }
    if let Some(flag) = lookup("CADENCE_DISABLE_OAUTH") {
        config.primary.disable_oauth = parse_flag("CADENCE_DISABLE_OAUTH", &flag)?;
    }
    if let Some(key) = lookup("CADENCE_PRIMARY_API_KEY") {
        config.primary.api_key = Some(key);
    }
    if let Some(path) = lookup("GOOGLE_APPLICATION_CREDENTIALS").filter(|p| !p.trim().is_empty()) {
        config.primary.service_account_path = Some(PathBuf::from(path));
    }
    if let Some(host) = lookup("GCE_METADATA_HOST").filter(|h| !h.trim().is_empty()) {
        config.primary.metadata_host = host;
    }

    if let Some(key) = lookup("CADENCE_SECONDARY_API_KEY") {
        config.secondary.api_key = Some(key);
    }
    if let Some(flag) = lookup("CADENCE_ENABLE_FAILOVER") {
        config.relay.enable_failover = parse_flag("CADENCE_ENABLE_FAILOVER", &flag)?;
    }

    Ok(())
}
