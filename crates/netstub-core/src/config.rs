//! Engine configuration
//!
//! Configuration is layered with figment: built-in defaults, then an optional
//! `netstub.toml`, then `NETSTUB_*` environment variables.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default origin used to resolve relative route patterns
pub const DEFAULT_BASE_URL: &str = "http://localhost";

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Tunables shared by every facade over one network state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin that relative route patterns and client URLs resolve against
    pub base_url: String,
    /// Delay applied before a matched response completes
    pub response_delay_ms: u64,
    /// Upper bound on waiting for quiescence before leaked requests are dropped
    pub idle_failsafe_ms: u64,
    /// Default deadline for the polling assertions
    pub expect_timeout_ms: u64,
    /// Emit debug-level logs from the pipeline
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            response_delay_ms: 0,
            idle_failsafe_ms: 5_000,
            expect_timeout_ms: 1_000,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// No response delay and a short failsafe, for unit tests
    pub fn instant() -> Self {
        Self {
            response_delay_ms: 0,
            idle_failsafe_ms: 500,
            ..Self::default()
        }
    }

    /// Every matched response takes `delay_ms` to arrive
    pub fn slow_network(delay_ms: u64) -> Self {
        Self {
            response_delay_ms: delay_ms,
            expect_timeout_ms: 1_000u64.max(delay_ms.saturating_mul(4)),
            ..Self::default()
        }
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }

    pub fn idle_failsafe(&self) -> Duration {
        Duration::from_millis(self.idle_failsafe_ms)
    }

    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    /// Load defaults, then `netstub.toml` if present, then `NETSTUB_*` variables
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file("netstub.toml"))
            .merge(Env::prefixed("NETSTUB_"));

        let config: EngineConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));

        let config: EngineConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!(
                "Failed to load from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(source))
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path.as_ref(), contents).map_err(|e| {
            ConfigError::Serialization(format!(
                "Failed to write {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.base_url).map_err(|e| {
            ConfigError::Invalid(format!("base_url '{}' is not a URL: {}", self.base_url, e))
        })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url must use http or https, got '{}'",
                base.scheme()
            )));
        }

        if self.idle_failsafe_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_failsafe_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.base_url, "http://localhost");
        assert_eq!(config.response_delay(), Duration::ZERO);
        assert_eq!(config.idle_failsafe(), Duration::from_secs(5));
        assert_eq!(config.expect_timeout(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            base_url = "https://api.example.com"
            response_delay_ms = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.response_delay_ms, 25);
        assert_eq!(config.expect_timeout_ms, 1000);
    }

    #[test]
    fn test_toml_output_reloads() {
        let config = EngineConfig::slow_network(300);
        let text = config.to_toml().unwrap();
        assert!(text.contains("response_delay_ms = 300"));
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_non_http_base() {
        let config = EngineConfig::default().with_base_url("ftp://files.example.com");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig::default().with_base_url("not a url");
        assert!(config.validate().is_err());

        let config = EngineConfig {
            idle_failsafe_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_layers_env_over_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "netstub.toml",
                r#"
                base_url = "https://file.example.com"
                response_delay_ms = 40
                "#,
            )?;
            jail.set_env("NETSTUB_RESPONSE_DELAY_MS", "75");

            let config = EngineConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.base_url, "https://file.example.com");
            assert_eq!(config.response_delay_ms, 75);
            assert_eq!(config.idle_failsafe_ms, 5_000);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_env_override() {
        Jail::expect_with(|jail| {
            jail.set_env("NETSTUB_IDLE_FAILSAFE_MS", "0");
            assert!(matches!(EngineConfig::load(), Err(ConfigError::Invalid(_))));

            jail.set_env("NETSTUB_IDLE_FAILSAFE_MS", "soon");
            assert!(matches!(EngineConfig::load(), Err(ConfigError::Loading(_))));
            Ok(())
        });
    }

    #[test]
    fn test_save_then_load_from_file() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("saved.toml");
            let config = EngineConfig::slow_network(120).with_base_url("https://saved.example.com");
            config.save_to_file(&path).map_err(|e| e.to_string())?;

            let loaded = EngineConfig::load_from_file(&path).map_err(|e| e.to_string())?;
            assert_eq!(loaded, config);

            jail.create_file("broken.toml", "response_delay_ms = \"fast\"")?;
            let err = EngineConfig::load_from_file("broken.toml").unwrap_err();
            assert!(err.to_string().contains("broken.toml"));
            Ok(())
        });
    }
}
