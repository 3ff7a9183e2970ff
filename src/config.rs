use dotenv::dotenv;
use log::*;
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const SAVED_RESET_MS: &str = "POLL_SAVED_RESET_MS";
pub const REFRESH_ON_CONFLICT: &str = "POLL_REFRESH_ON_CONFLICT";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a number of milliseconds, got `{value}`")]
    InvalidDuration { key: &'static str, value: String },
    #[error("{key} must be true or false, got `{value}`")]
    InvalidFlag { key: &'static str, value: String },
}

/**
 * Tunable policy of the sync engine
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /**
     * How long "saved" stays on screen before the indicator goes back to idle
     */
    pub saved_reset_after: Duration,
    /**
     * Fetch fresh results after the service reports a conflict
     */
    pub refresh_on_conflict: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            saved_reset_after: Duration::from_secs(2),
            refresh_on_conflict: false,
        }
    }
}

impl SyncConfig {
    /**
     * Read the configuration from the environment, honoring a `.env` file
     */
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SyncConfig::default();

        if let Some(value) = lookup(SAVED_RESET_MS) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidDuration {
                    key: SAVED_RESET_MS,
                    value: value.clone(),
                })?;
            config.saved_reset_after = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(REFRESH_ON_CONFLICT) {
            config.refresh_on_conflict = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidFlag {
                        key: REFRESH_ON_CONFLICT,
                        value,
                    })
                }
            };
        }

        debug!("Sync configuration: {:?}", config);
        Ok(config)
    }

    pub fn with_saved_reset_after(mut self, delay: Duration) -> Self {
        self.saved_reset_after = delay;
        self
    }

    pub fn with_refresh_on_conflict(mut self, refresh: bool) -> Self {
        self.refresh_on_conflict = refresh;
        self
    }
}
