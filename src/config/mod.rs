use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub mod query;
pub use query::{DateWindow, QueryConfig};

use crate::constants::{mqtt, provider, relay, storage, transport, usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    pub session: SessionConfig,
    pub query: QueryConfig,
    /// Meter identifiers (consNo or consNo_dst) to process, empty means all
    pub meter_filter: Vec<String>,
    pub mqtt: MqttConfig,
    pub history: HistoryConfig,
    pub storage: StorageConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl AccountConfig {
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cached session lifetime in hours (TOKEN_CACHE_HOURS)
    pub cache_hours: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_hours: usage::DEFAULT_CACHE_HOURS,
        }
    }
}

impl SessionConfig {
    pub fn cache_lifetime_millis(&self) -> i64 {
        (self.cache_hours * 60.0 * 60.0 * 1000.0) as i64
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: mqtt::DEFAULT_PORT,
            username: None,
            password: None,
            topic_prefix: mqtt::DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SAVE_HISTORY_DATA, anything but "false" enables it
    pub enabled: bool,
    pub retention_days: u32,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Use redis for credentials instead of key files
    pub credential_redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub relay_host: String,
    pub provider_base: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: transport::DEFAULT_TIMEOUT_SECS,
            relay_host: relay::HOST.to_string(),
            provider_base: provider::BASE_URL.to_string(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub debug: bool,
    pub json: bool,
}

impl LoggingConfig {
    /// Read on its own so tracing is up before the rest of the config warns
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            debug: get("WSGW_LOG_DEBUG").map(|v| is_true(&v)).unwrap_or(false),
            json: get("LOG_FORMAT")
                .map(|v| v.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

/// `true`, `1` (any case) are true; everything else is false
pub fn is_true(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let account = AccountConfig {
            username: get("WSGW_USERNAME").unwrap_or_default(),
            password: get("WSGW_PASSWORD").unwrap_or_default(),
        };

        let mut session = SessionConfig::default();
        if let Some(val) = get("TOKEN_CACHE_HOURS") {
            match val.trim().parse::<f64>() {
                Ok(hours) if hours > 0.0 => {
                    session.cache_hours = hours;
                    info!("Using custom token cache hours: {}", hours);
                }
                Ok(_) => warn!("Invalid TOKEN_CACHE_HOURS: {}, must be > 0, using default", val),
                Err(_) => warn!("Failed to parse TOKEN_CACHE_HOURS: {}, using default", val),
            }
        }

        let query = QueryConfig::from_lookup(&get)?;

        let meter_filter = get("QUERY_CONS_NO")
            .map(|val| {
                val.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut mqtt = MqttConfig {
            enabled: get("MQTT_ENABLED").map(|v| is_true(&v)).unwrap_or(false),
            host: get("WSGW_mqtt_host"),
            username: get("WSGW_mqtt_username"),
            password: get("WSGW_mqtt_password"),
            ..MqttConfig::default()
        };
        if let Some(val) = get("WSGW_mqtt_port") {
            match val.trim().parse::<u16>() {
                Ok(port) if port > 0 => mqtt.port = port,
                _ => warn!("Invalid WSGW_mqtt_port: {}, using {}", val, mqtt.port),
            }
        }
        if let Some(prefix) = get("MQTT_TOPIC_PREFIX") {
            mqtt.topic_prefix = prefix.trim_end_matches('/').to_string();
        }

        let data_dir = get("DATA_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(storage::DEFAULT_DATA_DIR));

        let mut retention_days = usage::DEFAULT_RETENTION_DAYS;
        if let Some(val) = get("HISTORY_RETENTION_DAYS") {
            match val.trim().parse::<u32>() {
                Ok(days) if days >= 1 => retention_days = days,
                Ok(_) => {
                    return Err(anyhow!(
                        "HISTORY_RETENTION_DAYS must be >= 1, got {}",
                        val
                    ))
                }
                Err(_) => warn!(
                    "Failed to parse HISTORY_RETENTION_DAYS: {}, using default",
                    val
                ),
            }
        }

        let history = HistoryConfig {
            enabled: get("SAVE_HISTORY_DATA")
                .map(|v| v.trim() != "false")
                .unwrap_or(true),
            retention_days,
            file: data_dir.join(usage::HISTORY_FILE),
        };

        let storage = StorageConfig {
            data_dir,
            credential_redis_url: get("CREDENTIAL_REDIS_URL"),
        };

        let mut transport = TransportConfig::default();
        if let Some(val) = get("REQUEST_TIMEOUT_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) if secs >= 1 => transport.timeout_secs = secs,
                _ => warn!("Invalid REQUEST_TIMEOUT_SECS: {}, using default", val),
            }
        }
        if let Some(host) = get("WSGW_RELAY_HOST") {
            transport.relay_host = host.trim_end_matches('/').to_string();
        }
        if let Some(base) = get("WSGW_PROVIDER_BASE") {
            transport.provider_base = base.trim_end_matches('/').to_string();
        }

        let logging = LoggingConfig::from_lookup(&lookup);

        Ok(Config {
            account,
            session,
            query,
            meter_filter,
            mqtt,
            history,
            storage,
            transport,
            logging,
        })
    }
}
