//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default gateway REST base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

/// Default bind address for the ingest, health and metrics server.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default path of the JSON mapping file.
pub const DEFAULT_MAPPING_PATH: &str = "data/room_mappings.json";

/// Default per-request timeout for gateway calls in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default pause between two work items in milliseconds.
pub const DEFAULT_ITEM_SPACING_MS: u64 = 1000;

/// Default delay before re-checking a room for reclaim in milliseconds.
pub const DEFAULT_RECLAIM_SETTLE_MS: u64 = 2000;

/// Default name of the managed group (category).
pub const DEFAULT_GROUP_NAME: &str = "VOICES";

/// Default name of the trigger room.
pub const DEFAULT_TRIGGER_ROOM_NAME: &str = "➕︱voice";

/// Room name used when a display name sanitizes to nothing.
pub const DEFAULT_FALLBACK_ROOM_NAME: &str = "voice";

/// Where the trigger/owner mapping is persisted.
#[derive(Clone)]
pub enum StoreConfig {
    /// JSON file on local disk.
    File(PathBuf),
    /// Redis hash; the URL may embed credentials.
    Redis(SecretString),
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::File(path) => f.debug_tuple("File").field(path).finish(),
            StoreConfig::Redis(_) => f.debug_tuple("Redis").field(&"[REDACTED]").finish(),
        }
    }
}

/// Room Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Bot credential used for every gateway call.
    pub bot_token: SecretString,

    /// Shared secret the gateway relay presents as a bearer token on ingest.
    pub ingest_token: SecretString,

    /// Mapping store location.
    pub store: StoreConfig,

    /// Gateway REST base URL.
    pub api_base_url: String,

    /// Ingest/health/metrics server bind address.
    pub http_bind_address: String,

    /// Per-request timeout for gateway calls.
    pub http_timeout: Duration,

    /// Pause between two work items.
    pub item_spacing: Duration,

    /// Delay before re-checking a room for reclaim.
    pub reclaim_settle_delay: Duration,

    /// Name of the managed group.
    pub group_name: String,

    /// Name of the trigger room.
    pub trigger_room_name: String,

    /// Room name used when sanitization yields an empty string.
    pub fallback_room_name: String,

    /// Emit logs as JSON.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"[REDACTED]")
            .field("ingest_token", &"[REDACTED]")
            .field("store", &self.store)
            .field("api_base_url", &self.api_base_url)
            .field("http_bind_address", &self.http_bind_address)
            .field("http_timeout", &self.http_timeout)
            .field("item_spacing", &self.item_spacing)
            .field("reclaim_settle_delay", &self.reclaim_settle_delay)
            .field("group_name", &self.group_name)
            .field("trigger_room_name", &self.trigger_room_name)
            .field("fallback_room_name", &self.fallback_room_name)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bot_token = vars
            .get("DISCORD_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_TOKEN".to_string()))?;
        let bot_token = SecretString::from(bot_token.clone());

        let ingest_token = vars
            .get("RC_INGEST_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RC_INGEST_TOKEN".to_string()))?;
        let ingest_token = SecretString::from(ingest_token.clone());

        let store = match vars.get("RC_STORE_URL").filter(|v| !v.is_empty()) {
            Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
                StoreConfig::Redis(SecretString::from(url.clone()))
            }
            Some(_) => {
                // Do not echo the URL, it may carry a password
                return Err(ConfigError::InvalidValue(
                    "RC_STORE_URL must use the redis:// or rediss:// scheme".to_string(),
                ));
            }
            None => StoreConfig::File(PathBuf::from(
                vars.get("RC_MAPPING_PATH")
                    .map_or(DEFAULT_MAPPING_PATH, String::as_str),
            )),
        };

        let api_base_url = vars
            .get("RC_API_BASE_URL")
            .map_or(DEFAULT_API_BASE_URL, String::as_str)
            .trim_end_matches('/')
            .to_string();

        let http_bind_address = vars
            .get("RC_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let http_timeout = Duration::from_secs(parse_or(
            vars,
            "RC_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);
        let item_spacing =
            Duration::from_millis(parse_or(vars, "RC_ITEM_SPACING_MS", DEFAULT_ITEM_SPACING_MS)?);
        let reclaim_settle_delay = Duration::from_millis(parse_or(
            vars,
            "RC_RECLAIM_SETTLE_MS",
            DEFAULT_RECLAIM_SETTLE_MS,
        )?);

        let group_name = vars
            .get("RC_GROUP_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());
        let trigger_room_name = vars
            .get("RC_TRIGGER_ROOM_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRIGGER_ROOM_NAME.to_string());
        let fallback_room_name = vars
            .get("RC_FALLBACK_ROOM_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FALLBACK_ROOM_NAME.to_string());

        let log_json = parse_or(vars, "RC_LOG_JSON", false)?;

        Ok(Config {
            bot_token,
            ingest_token,
            store,
            api_base_url,
            http_bind_address,
            http_timeout,
            item_spacing,
            reclaim_settle_delay,
            group_name,
            trigger_room_name,
            fallback_room_name,
            log_json,
        })
    }

    /// Returns the bot token for the gateway client.
    #[must_use]
    pub fn bot_token(&self) -> &str {
        self.bot_token.expose_secret()
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("DISCORD_TOKEN".to_string(), "test-bot-token".to_string()),
            ("RC_INGEST_TOKEN".to_string(), "test-ingest-token".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bot_token(), "test-bot-token");
        assert!(
            matches!(&config.store, StoreConfig::File(p) if p == &PathBuf::from(DEFAULT_MAPPING_PATH))
        );
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.item_spacing, Duration::from_secs(1));
        assert_eq!(config.reclaim_settle_delay, Duration::from_secs(2));
        assert_eq!(config.group_name, "VOICES");
        assert_eq!(config.trigger_room_name, "➕︱voice");
        assert_eq!(config.fallback_room_name, "voice");
        assert!(!config.log_json);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "RC_API_BASE_URL".to_string(),
            "http://localhost:9999/api/".to_string(),
        );
        vars.insert("RC_HTTP_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("RC_HTTP_TIMEOUT_SECONDS".to_string(), "3".to_string());
        vars.insert("RC_ITEM_SPACING_MS".to_string(), "250".to_string());
        vars.insert("RC_RECLAIM_SETTLE_MS".to_string(), "5000".to_string());
        vars.insert("RC_GROUP_NAME".to_string(), "LOBBIES".to_string());
        vars.insert("RC_TRIGGER_ROOM_NAME".to_string(), "join-here".to_string());
        vars.insert("RC_FALLBACK_ROOM_NAME".to_string(), "room".to_string());
        vars.insert("RC_MAPPING_PATH".to_string(), "/var/lib/rc/map.json".to_string());
        vars.insert("RC_LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.api_base_url, "http://localhost:9999/api");
        assert_eq!(config.http_bind_address, "127.0.0.1:9000");
        assert_eq!(config.http_timeout, Duration::from_secs(3));
        assert_eq!(config.item_spacing, Duration::from_millis(250));
        assert_eq!(config.reclaim_settle_delay, Duration::from_secs(5));
        assert_eq!(config.group_name, "LOBBIES");
        assert_eq!(config.trigger_room_name, "join-here");
        assert_eq!(config.fallback_room_name, "room");
        assert!(
            matches!(&config.store, StoreConfig::File(p) if p == &PathBuf::from("/var/lib/rc/map.json"))
        );
        assert!(config.log_json);
    }

    #[test]
    fn test_redis_store_selected_by_url() {
        let mut vars = base_vars();
        vars.insert(
            "RC_STORE_URL".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert!(matches!(config.store, StoreConfig::Redis(_)));
    }

    #[test]
    fn test_unsupported_store_scheme_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "RC_STORE_URL".to_string(),
            "mongodb://user:pw@localhost".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(ref msg)) if !msg.contains("pw@")));
    }

    #[test]
    fn test_from_vars_missing_token() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "DISCORD_TOKEN"));
    }

    #[test]
    fn test_from_vars_blank_token_is_missing() {
        let mut vars = base_vars();
        vars.insert("DISCORD_TOKEN".to_string(), "   ".to_string());
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_from_vars_missing_ingest_token() {
        let mut vars = base_vars();
        vars.remove("RC_INGEST_TOKEN");
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "RC_INGEST_TOKEN"));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_ITEM_SPACING_MS".to_string(), "soon".to_string());
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(v)) if v.starts_with("RC_ITEM_SPACING_MS"))
        );
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let mut vars = base_vars();
        vars.insert(
            "RC_STORE_URL".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
        );
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("test-bot-token"));
        assert!(!debug_output.contains("test-ingest-token"));
        assert!(!debug_output.contains("hunter2"));
    }
}
