

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Result;


#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {

    pub tombstone_ttl_days: u32,
    pub restore_batch_size: usize,


    pub transaction_max_attempts: u32,
    pub transaction_timeout_ms: u64,
    pub transaction_retry_delay_ms: u64,


    pub queue_concurrency: usize,
    pub sweep_interval_secs: u64,


    pub log_filter: String,
}

impl CascadeConfig {

    pub fn new() -> Self {
        Self {
            tombstone_ttl_days: crate::DEFAULT_TOMBSTONE_TTL_DAYS,
            restore_batch_size: crate::DEFAULT_RESTORE_BATCH_SIZE,

            transaction_max_attempts: 3,
            transaction_timeout_ms: 5_000,
            transaction_retry_delay_ms: 25,

            queue_concurrency: 4,
            sweep_interval_secs: 60,

            log_filter: "cascade=info".to_string(),
        }
    }


    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.tombstone_ttl_days) * 24 * 3600)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }


    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(days) = env_parse("CASCADE_TOMBSTONE_TTL_DAYS") {
            config.tombstone_ttl_days = days;
        }
        if let Some(size) = env_parse("CASCADE_RESTORE_BATCH_SIZE") {
            config.restore_batch_size = size;
        }
        if let Some(attempts) = env_parse("CASCADE_TRANSACTION_MAX_ATTEMPTS") {
            config.transaction_max_attempts = attempts;
        }
        if let Some(timeout) = env_parse("CASCADE_TRANSACTION_TIMEOUT_MS") {
            config.transaction_timeout_ms = timeout;
        }
        if let Some(concurrency) = env_parse("CASCADE_QUEUE_CONCURRENCY") {
            config.queue_concurrency = concurrency;
        }
        if let Some(interval) = env_parse("CASCADE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = interval;
        }
        if let Ok(filter) = std::env::var("CASCADE_LOG") {
            config.log_filter = filter;
        }

        config
    }


    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("CASCADE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }


    pub fn validate(&self) -> Result<()> {
        use super::error::CascadeError;

        if self.restore_batch_size == 0 {
            return Err(CascadeError::Configuration(
                "restore_batch_size must be positive".to_string(),
            ));
        }
        if self.transaction_max_attempts == 0 {
            return Err(CascadeError::Configuration(
                "transaction_max_attempts must be positive".to_string(),
            ));
        }
        if self.queue_concurrency == 0 {
            return Err(CascadeError::Configuration(
                "queue_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CascadeConfig::default();
        assert_eq!(config.tombstone_ttl_days, 60);
        assert_eq!(config.restore_batch_size, 50);
        assert_eq!(config.tombstone_ttl(), Duration::from_secs(60 * 24 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_keeps_defaults() {
        let config = CascadeConfig::load(Some("does-not-exist/cascade")).unwrap();
        assert_eq!(config.restore_batch_size, 50);
        assert_eq!(config.transaction_max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = CascadeConfig::new();
        config.restore_batch_size = 0;
        assert!(config.validate().is_err());
    }
}
