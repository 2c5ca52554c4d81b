use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_internal_state()?;

        if self.event_path.contains('?') {
            return Err(ConfigError::InvalidConfig(format!(
                "Event path must not carry a query: '{}'",
                self.event_path
            )));
        }

        if self.session_update_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Session update interval must be greater than 0".to_string(),
            ));
        }

        if self.event_flush_threshold == 0 {
            return Err(ConfigError::InvalidConfig(
                "Event flush threshold must be greater than 0".to_string(),
            ));
        }

        if let Some(store_path) = &self.store_path
            && let Some(parent) = store_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Store parent directory does not exist: {}",
                parent.display()
            )));
        }

        Ok(())
    }

    /// Preconditions checked before every enqueue: an application key, a
    /// syntactically valid endpoint, and a secure scheme when certificates
    /// are pinned.
    pub fn check_internal_state(&self) -> Result<(), ConfigError> {
        if self.app_key.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "App key has not been set".to_string(),
            ));
        }

        let url = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must be an http(s) URL with a host: '{}'",
                self.endpoint
            )));
        }

        if self.pinning_enabled() && url.scheme() != "https" {
            return Err(ConfigError::InvalidConfig(
                "Endpoint must use https once certificates are pinned".to_string(),
            ));
        }

        Ok(())
    }
}
