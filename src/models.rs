use serde::{Deserialize, Serialize};
use crate::core::monitoring::DEFAULT_RECENT_EVENTS;

/// Deployment profile, selects default security settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Production,
    Development,
    Test,
}

impl Profile {
    /// Parse a profile name as found in `APP_ENV`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Profile::Production),
            "development" | "dev" => Some(Profile::Development),
            "test" => Some(Profile::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Production => "production",
            Profile::Development => "development",
            Profile::Test => "test",
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    /// Requests allowed per window before the key is blocked
    pub max_attempts: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Block length in milliseconds
    pub block_duration_ms: u64,
    /// Concurrent request ceiling advertised to upstream dispatchers
    pub max_concurrent: u32,
}

/// Request limits for the API surface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    /// Maximum request (and upload) size in bytes
    pub max_request_size: u64,
}

/// Settings consumed by the security middleware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecuritySettings {
    pub rate_limit: RateLimitSettings,
    pub api: ApiSettings,
}

impl SecuritySettings {
    /// Default settings for a deployment profile
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Production => Self {
                rate_limit: RateLimitSettings {
                    max_attempts: 5,
                    window_ms: 5 * 60 * 1000,
                    block_duration_ms: 15 * 60 * 1000,
                    max_concurrent: 10,
                },
                api: ApiSettings {
                    max_request_size: 10 * 1024 * 1024,
                },
            },
            Profile::Development => Self {
                rate_limit: RateLimitSettings {
                    max_attempts: 10,
                    window_ms: 60 * 1000,
                    block_duration_ms: 60 * 1000,
                    max_concurrent: 20,
                },
                api: ApiSettings {
                    max_request_size: 10 * 1024 * 1024,
                },
            },
            Profile::Test => Self {
                rate_limit: RateLimitSettings {
                    max_attempts: 3,
                    window_ms: 1000,
                    block_duration_ms: 2000,
                    max_concurrent: 5,
                },
                api: ApiSettings {
                    max_request_size: 1024 * 1024,
                },
            },
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self::for_profile(Profile::Production)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Interval of the expired-entry sweep in seconds
    pub cleanup_interval_seconds: u64,
    /// Number of events returned by the events endpoint when no limit is given
    pub recent_events_default: usize,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Deployment profile
    pub environment: Profile,
    /// Server configuration
    pub server: ServerConfig,
    /// Security middleware settings
    pub security: SecuritySettings,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Defaults for a profile, before file and environment overrides
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            environment: profile,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            security: SecuritySettings::for_profile(profile),
            monitoring: MonitoringConfig {
                cleanup_interval_seconds: 60,
                recent_events_default: DEFAULT_RECENT_EVENTS,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(Profile::Production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_defaults() {
        let settings = SecuritySettings::default();
        assert_eq!(settings.rate_limit.max_attempts, 5);
        assert_eq!(settings.rate_limit.window_ms, 300_000);
        assert_eq!(settings.rate_limit.block_duration_ms, 900_000);
        assert_eq!(settings.api.max_request_size, 10 * 1024 * 1024);
        assert_eq!(Config::default().monitoring.recent_events_default, DEFAULT_RECENT_EVENTS);
    }

    #[test]
    fn test_profile_names() {
        assert_eq!(Profile::from_name("Test"), Some(Profile::Test));
        assert_eq!(Profile::from_name(" dev "), Some(Profile::Development));
        assert_eq!(Profile::from_name("staging"), None);
        assert_eq!(Profile::Production.as_str(), "production");
    }

    #[test]
    fn test_test_profile_is_short_cycle() {
        let test = SecuritySettings::for_profile(Profile::Test);
        let prod = SecuritySettings::for_profile(Profile::Production);
        assert!(test.rate_limit.window_ms < prod.rate_limit.window_ms);
        assert!(test.rate_limit.block_duration_ms < prod.rate_limit.block_duration_ms);
    }
}
