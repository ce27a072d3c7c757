//! Worker configuration loaded from `COOKIE_REFRESH_*` environment variables

use chrono::{DateTime, Utc};
use common::{ExpiryMode, SESSION_COOKIE_KEY};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::driver::RunMode;

const DEFAULT_LANDING_URL: &str = "https://photos.google.com/u/0/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/72.0.3626.121 Safari/537.36";

/// Extra time granted on top of the HTTP timeout before a call is abandoned
const CALL_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Cookie renewal worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefresherConfig {
    /// Authenticated landing page requested with the stored cookie
    pub landing_url: String,
    /// User agent presented to the landing page
    pub user_agent: String,
    /// Credential class selected from the `configs` table
    pub credential_key: String,
    /// Maximum number of credentials per batch
    pub page_size: u32,
    /// Maximum number of renewal requests in flight
    pub max_workers: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Renew rows expiring within this many seconds; unset renews every row
    pub due_within_secs: Option<i64>,
    /// Column type of `expires`
    pub expiry_mode: ExpiryMode,
    /// Single pass or drain until nothing is due
    pub mode: RunMode,
    /// Cron expression; when set the worker stays up and runs on schedule
    pub schedule: Option<String>,
}

impl RefresherConfig {
    /// Load the configuration from environment variables
    ///
    /// # Environment Variables
    /// - `COOKIE_REFRESH_LANDING_URL` (default: `https://photos.google.com/u/0/`)
    /// - `COOKIE_REFRESH_USER_AGENT` (default: desktop Chrome)
    /// - `COOKIE_REFRESH_CREDENTIAL_KEY` (default: `GMAIL_COOKIE`)
    /// - `COOKIE_REFRESH_PAGE_SIZE` (default: 100)
    /// - `COOKIE_REFRESH_MAX_WORKERS` (default: 16)
    /// - `COOKIE_REFRESH_REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `COOKIE_REFRESH_DUE_WITHIN_SECS` (default: unset)
    /// - `COOKIE_REFRESH_EXPIRY_MODE`: `epoch_seconds` or `date` (default: `epoch_seconds`)
    /// - `COOKIE_REFRESH_MODE`: `single_pass` or `drain` (default: `single_pass`)
    /// - `COOKIE_REFRESH_SCHEDULE`: cron expression (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("landing_url", DEFAULT_LANDING_URL)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("credential_key", SESSION_COOKIE_KEY)?
            .set_default("page_size", 100_i64)?
            .set_default("max_workers", 16_i64)?
            .set_default("request_timeout_secs", 30_i64)?
            .set_default("expiry_mode", "epoch_seconds")?
            .set_default("mode", "single_pass")?
            .add_source(Environment::with_prefix("COOKIE_REFRESH").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the worker relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(due_within) = self.due_within_secs
            && due_within < 0
        {
            return Err(ConfigError::Invalid(
                "due_within_secs must not be negative".to_string(),
            ));
        }
        Url::parse(&self.landing_url).map_err(|e| {
            ConfigError::Invalid(format!("landing_url {}: {}", self.landing_url, e))
        })?;

        Ok(())
    }

    /// HTTP timeout of one renewal request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Hard deadline of one renewal call, enforced by the dispatcher
    pub fn call_timeout(&self) -> Duration {
        self.request_timeout() + CALL_TIMEOUT_GRACE
    }

    /// Upper expiry bound of due rows at `now`
    pub fn due_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.due_within_secs
            .map(|seconds| now + chrono::Duration::seconds(seconds))
    }
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            landing_url: DEFAULT_LANDING_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            credential_key: SESSION_COOKIE_KEY.to_string(),
            page_size: 100,
            max_workers: 16,
            request_timeout_secs: 30,
            due_within_secs: None,
            expiry_mode: ExpiryMode::EpochSeconds,
            mode: RunMode::SinglePass,
            schedule: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "COOKIE_REFRESH_LANDING_URL",
        "COOKIE_REFRESH_PAGE_SIZE",
        "COOKIE_REFRESH_MAX_WORKERS",
        "COOKIE_REFRESH_DUE_WITHIN_SECS",
        "COOKIE_REFRESH_EXPIRY_MODE",
        "COOKIE_REFRESH_MODE",
        "COOKIE_REFRESH_SCHEDULE",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = RefresherConfig::from_env().unwrap();
        assert_eq!(config.landing_url, DEFAULT_LANDING_URL);
        assert_eq!(config.credential_key, "GMAIL_COOKIE");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_workers, 16);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.due_within_secs, None);
        assert_eq!(config.expiry_mode, ExpiryMode::EpochSeconds);
        assert_eq!(config.mode, RunMode::SinglePass);
        assert!(config.schedule.is_none());
    }

    #[test]
    #[serial]
    fn test_config_from_env_with_custom_values() {
        clear_env();
        unsafe {
            std::env::set_var("COOKIE_REFRESH_PAGE_SIZE", "25");
            std::env::set_var("COOKIE_REFRESH_MAX_WORKERS", "4");
            std::env::set_var("COOKIE_REFRESH_DUE_WITHIN_SECS", "3600");
            std::env::set_var("COOKIE_REFRESH_EXPIRY_MODE", "date");
            std::env::set_var("COOKIE_REFRESH_MODE", "drain");
            std::env::set_var("COOKIE_REFRESH_SCHEDULE", "0 0 * * * *");
        }

        let config = RefresherConfig::from_env().unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.due_within_secs, Some(3600));
        assert_eq!(config.expiry_mode, ExpiryMode::Date);
        assert_eq!(config.mode, RunMode::Drain);
        assert_eq!(config.schedule.as_deref(), Some("0 0 * * * *"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_page_size() {
        clear_env();
        unsafe {
            std::env::set_var("COOKIE_REFRESH_PAGE_SIZE", "0");
        }

        let result = RefresherConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        clear_env();
    }

    #[test]
    fn test_config_rejects_negative_due_window() {
        let config = RefresherConfig {
            due_within_secs: Some(-1),
            ..RefresherConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = RefresherConfig {
            due_within_secs: Some(0),
            ..RefresherConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_landing_url() {
        let config = RefresherConfig {
            landing_url: "not a url".to_string(),
            ..RefresherConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_due_before_applies_window() {
        let now = Utc::now();
        let mut config = RefresherConfig::default();
        assert_eq!(config.due_before(now), None);

        config.due_within_secs = Some(3600);
        assert_eq!(config.due_before(now), Some(now + chrono::Duration::hours(1)));
    }
}
