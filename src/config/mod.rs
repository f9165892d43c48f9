//! Configuration management for the security middleware.
//!
//! This module loads the application configuration from a TOML file and
//! environment variables, and defines the settings source the middleware
//! re-reads on every check.

use std::env;
use std::sync::{Arc, PoisonError, RwLock};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use thiserror::Error;
use crate::models::{Config, Profile, SecuritySettings};

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Source(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Source of the security settings, consulted on every rate-limit check
#[cfg_attr(test, mockall::automock)]
pub trait SettingsSource: Send + Sync {
    /// Current settings
    fn snapshot(&self) -> SecuritySettings;
}

impl SettingsSource for SecuritySettings {
    fn snapshot(&self) -> SecuritySettings {
        self.clone()
    }
}

/// Settings that can be replaced while the middleware is running
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<SecuritySettings>>,
}

impl SharedSettings {
    pub fn new(settings: SecuritySettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace the settings; the next check sees the new values
    pub fn replace(&self, settings: SecuritySettings) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
    }
}

impl SettingsSource for SharedSettings {
    fn snapshot(&self) -> SecuritySettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Profile selected by `APP_ENV`, production when unset or unknown
pub fn active_profile() -> Profile {
    env::var("APP_ENV")
        .ok()
        .and_then(|name| Profile::from_name(&name))
        .unwrap_or_default()
}

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigLoadError> {
    dotenv::dotenv().ok();

    let profile = active_profile();
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    let defaults = Config::for_profile(profile);

    let config = ConfigBuilder::builder()
        .set_default("environment", profile.as_str())?
        .set_default("server.host", defaults.server.host.clone())?
        .set_default("server.port", defaults.server.port as i64)?
        .set_default("security.rate_limit.max_attempts", defaults.security.rate_limit.max_attempts as i64)?
        .set_default("security.rate_limit.window_ms", defaults.security.rate_limit.window_ms as i64)?
        .set_default("security.rate_limit.block_duration_ms", defaults.security.rate_limit.block_duration_ms as i64)?
        .set_default("security.rate_limit.max_concurrent", defaults.security.rate_limit.max_concurrent as i64)?
        .set_default("security.api.max_request_size", defaults.security.api.max_request_size as i64)?
        .set_default("monitoring.cleanup_interval_seconds", defaults.monitoring.cleanup_interval_seconds as i64)?
        .set_default("monitoring.recent_events_default", defaults.monitoring.recent_events_default as i64)?
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::with_prefix("CMMC").separator("__").try_parsing(true))
        .build()?;

    let config: Config = config.try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject settings the middleware cannot operate on
pub fn validate_config(config: &Config) -> Result<(), ConfigLoadError> {
    let rate_limit = &config.security.rate_limit;
    if rate_limit.max_attempts == 0 {
        return Err(ConfigLoadError::Invalid("rate_limit.max_attempts must be at least 1".into()));
    }
    if rate_limit.window_ms == 0 {
        return Err(ConfigLoadError::Invalid("rate_limit.window_ms must be positive".into()));
    }
    if rate_limit.block_duration_ms == 0 {
        return Err(ConfigLoadError::Invalid("rate_limit.block_duration_ms must be positive".into()));
    }
    if config.security.api.max_request_size == 0 {
        return Err(ConfigLoadError::Invalid("api.max_request_size must be positive".into()));
    }
    if config.monitoring.cleanup_interval_seconds == 0 {
        return Err(ConfigLoadError::Invalid("monitoring.cleanup_interval_seconds must be positive".into()));
    }
    Ok(())
}
