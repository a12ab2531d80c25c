use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must be http or https: {}",
                self.endpoint
            )));
        }

        if self.heartbeat_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.transmit_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Transmit interval must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_request_lines == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max request lines must be greater than 0".to_string(),
            ));
        }

        if self.low_water_bytes >= self.high_water_bytes {
            return Err(ConfigError::InvalidConfig(format!(
                "Low water ({}) must be below high water ({})",
                self.low_water_bytes, self.high_water_bytes
            )));
        }

        if self.stall_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        if !self.disable_monitor && (self.monitor_sampling_ms == 0 || self.samples_to_average == 0)
        {
            return Err(ConfigError::InvalidConfig(
                "Monitor sampling interval and sample count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let mut config = Config::default();
        config.post_process().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_water_marks() {
        let config = Config {
            high_water_bytes: 1024,
            low_water_bytes: 1024,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let config = Config {
            endpoint: "ftp://example.com/".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let config = Config {
            endpoint: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_zero_sampling_allowed_when_monitor_disabled() {
        let config = Config {
            disable_monitor: true,
            monitor_sampling_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
