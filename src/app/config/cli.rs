use super::serde_helpers::{
    load_env_path_list, load_env_path_opt, load_env_string, load_env_string_list,
    load_env_string_opt, load_env_value_enum, load_env_var,
};
use super::{ConfigError, DeviceIdStrategy, LogFormat, LogLevel, Mode};
use crate::sender::ClientConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://rask-telemetry-collector:9700";
pub const DEFAULT_EVENT_PATH: &str = "a";
pub const DEFAULT_APP_VERSION: &str = "1.0";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Application key identifying this app to the collector
    #[arg(long, env = "RASK_APP_KEY", default_value = "")]
    pub app_key: String,

    /// Collector endpoint URL
    #[arg(long, env = "RASK_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Path appended to the endpoint for every request
    #[arg(long, env = "RASK_EVENT_PATH", default_value = DEFAULT_EVENT_PATH)]
    pub event_path: String,

    /// Directory of the durable request store (in-memory when omitted)
    #[arg(long, env = "RASK_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// PEM certificates to pin; requires an https endpoint
    #[arg(
        long = "pinned-certificate",
        env = "RASK_PINNED_CERTIFICATES",
        value_delimiter = ','
    )]
    pub pinned_certificates: Vec<PathBuf>,

    /// Flag analytics traffic as test traffic
    #[arg(long, env = "RASK_MODE", default_value = "production")]
    pub mode: Mode,

    /// Flag push-token registrations as test traffic
    #[arg(long, env = "RASK_MESSAGING_MODE", default_value = "production")]
    pub messaging_mode: Mode,

    /// Developer-supplied device identifier
    #[arg(long, env = "RASK_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Device identifier strategy
    #[arg(long, env = "RASK_DEVICE_ID_TYPE", default_value = "open-udid")]
    pub device_id_type: DeviceIdStrategy,

    /// Application version reported in device metrics
    #[arg(long, env = "RASK_APP_VERSION", default_value = DEFAULT_APP_VERSION)]
    pub app_version: String,

    /// Seconds between session duration updates
    #[arg(long, env = "SESSION_UPDATE_INTERVAL_SECS", default_value = "60")]
    pub session_update_interval_secs: u64,

    /// Seconds to hold back a push-token registration
    #[arg(long, env = "TOKEN_SESSION_DELAY_SECS", default_value = "10")]
    pub token_session_delay_secs: u64,

    /// Number of buffered events that triggers a flush
    #[arg(long, env = "EVENT_FLUSH_THRESHOLD", default_value = "10")]
    pub event_flush_threshold: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Extra `target=level` logging directives
    #[arg(long = "log-directive", env = "LOG_DIRECTIVES", value_delimiter = ',')]
    pub log_directives: Vec<String>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub session_update_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub token_session_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            event_path: DEFAULT_EVENT_PATH.to_string(),
            store_path: None,
            pinned_certificates: Vec::new(),
            mode: Mode::Production,
            messaging_mode: Mode::Production,
            device_id: None,
            device_id_type: DeviceIdStrategy::OpenUdid,
            app_version: DEFAULT_APP_VERSION.to_string(),
            session_update_interval_secs: 60,
            token_session_delay_secs: 10,
            event_flush_threshold: 10,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            log_directives: Vec::new(),
            config_file: None,
            session_update_interval: Duration::from_secs(60),
            token_session_delay: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Shorthand for embedding applications that only know their key and endpoint.
    pub fn new(app_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        let mut config = Config {
            app_key: app_key.into(),
            endpoint: endpoint.into(),
            ..Config::default()
        };
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(rask_config) = std::env::var("RASK_CONFIG") {
            return Self::from_toml_str(&rask_config);
        }

        let mut config = Config::default();

        load_env_string("RASK_APP_KEY", &mut config.app_key);
        load_env_string("RASK_ENDPOINT", &mut config.endpoint);
        load_env_string("RASK_EVENT_PATH", &mut config.event_path);
        load_env_path_opt("RASK_STORE_PATH", &mut config.store_path);
        load_env_path_list("RASK_PINNED_CERTIFICATES", &mut config.pinned_certificates);
        load_env_string_opt("RASK_DEVICE_ID", &mut config.device_id);
        load_env_value_enum("RASK_DEVICE_ID_TYPE", &mut config.device_id_type)?;
        load_env_string("RASK_APP_VERSION", &mut config.app_version);
        load_env_var("SESSION_UPDATE_INTERVAL_SECS", &mut config.session_update_interval_secs)?;
        load_env_var("TOKEN_SESSION_DELAY_SECS", &mut config.token_session_delay_secs)?;
        load_env_var("EVENT_FLUSH_THRESHOLD", &mut config.event_flush_threshold)?;
        load_env_var("LOG_LEVEL", &mut config.log_level)?;
        load_env_value_enum("LOG_FORMAT", &mut config.log_format)?;
        load_env_string_list("LOG_DIRECTIVES", &mut config.log_directives);
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);
        load_env_value_enum("RASK_MODE", &mut config.mode)?;
        load_env_value_enum("RASK_MESSAGING_MODE", &mut config.messaging_mode)?;

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses CLI args on top of an optional `RASK_CONFIG` TOML document.
    /// Explicit CLI values win; values left at their defaults fall back to
    /// the document.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let base_config = match std::env::var("RASK_CONFIG") {
            Ok(rask_config) => toml::from_str::<Config>(&rask_config)?,
            Err(_) => Config::default(),
        };

        let mut config = Config::parse_from(args);
        let defaults = Config::default();

        if config.app_key.is_empty() {
            config.app_key = base_config.app_key;
        }
        if config.endpoint == defaults.endpoint {
            config.endpoint = base_config.endpoint;
        }
        if config.store_path.is_none() {
            config.store_path = base_config.store_path;
        }
        if config.pinned_certificates.is_empty() {
            config.pinned_certificates = base_config.pinned_certificates;
        }
        if config.device_id.is_none() {
            config.device_id = base_config.device_id;
        }
        if config.log_directives.is_empty() {
            config.log_directives = base_config.log_directives;
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.session_update_interval = Duration::from_secs(self.session_update_interval_secs);
        self.token_session_delay = Duration::from_secs(self.token_session_delay_secs);
        self.endpoint = self.endpoint.trim_end_matches('/').to_string();
        Ok(())
    }

    pub fn pinning_enabled(&self) -> bool {
        !self.pinned_certificates.is_empty()
    }

    /// Builds the transmitter's client settings, loading pinned certificates
    /// from disk.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let pinned_certificates = self
            .pinned_certificates
            .iter()
            .map(|path| {
                std::fs::read(path).map_err(|e| {
                    ConfigError::Certificate(format!(
                        "Cannot read pinned certificate {}: {}",
                        path.display(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClientConfig {
            endpoint: self.endpoint.clone(),
            event_path: self.event_path.clone(),
            pinned_certificates,
            ..ClientConfig::default()
        })
    }
}
