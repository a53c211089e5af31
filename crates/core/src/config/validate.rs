use super::{types::Config, ConfigError};

/// Longest accepted log retention (about a century).
pub const MAX_LOG_RETENTION_DAYS: u32 = 36_500;
/// Longest accepted finished-task retention (about a century).
pub const MAX_TASK_RETENTION_HOURS: u32 = 876_000;
/// Longest accepted retry delay (one week).
pub const MAX_RETRY_DELAY_MS: u64 = 604_800_000;

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

/// Validate configuration
/// Currently validates:
/// - Queue concurrency is not 0
/// - Retry attempts are not 0 and the base delay does not exceed the cap
/// - Intervals and retention windows are not 0
/// - Retention windows and retry delays stay within representable bounds
/// - Log buffer cap is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Queues
    if config.downloads.max_concurrent == 0 {
        return Err(invalid("downloads.max_concurrent cannot be 0"));
    }
    if config.thumbnails.max_concurrent == 0 {
        return Err(invalid("thumbnails.max_concurrent cannot be 0"));
    }

    // Retry
    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts cannot be 0"));
    }
    if config.retry.base_delay_ms == 0 {
        return Err(invalid("retry.base_delay_ms cannot be 0"));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
            config.retry.base_delay_ms, config.retry.max_delay_ms
        )));
    }
    if config.retry.max_delay_ms > MAX_RETRY_DELAY_MS {
        return Err(ConfigError::ValidationError(format!(
            "retry.max_delay_ms cannot exceed {}",
            MAX_RETRY_DELAY_MS
        )));
    }

    // Detector
    if config.detector.poll_interval_ms == 0 {
        return Err(invalid("detector.poll_interval_ms cannot be 0"));
    }

    // Tasks
    if config.tasks.tick_interval_ms == 0 {
        return Err(invalid("tasks.tick_interval_ms cannot be 0"));
    }
    if config.tasks.sweep_interval_ms == 0 {
        return Err(invalid("tasks.sweep_interval_ms cannot be 0"));
    }
    if config.tasks.retention_hours == 0 {
        return Err(invalid("tasks.retention_hours cannot be 0"));
    }
    if config.tasks.retention_hours > MAX_TASK_RETENTION_HOURS {
        return Err(ConfigError::ValidationError(format!(
            "tasks.retention_hours cannot exceed {}",
            MAX_TASK_RETENTION_HOURS
        )));
    }

    // Event log
    if config.log.max_entries == 0 {
        return Err(invalid("log.max_entries cannot be 0"));
    }
    if config.log.retention_days == 0 {
        return Err(invalid("log.retention_days cannot be 0"));
    }
    if config.log.retention_days > MAX_LOG_RETENTION_DAYS {
        return Err(ConfigError::ValidationError(format!(
            "log.retention_days cannot exceed {}",
            MAX_LOG_RETENTION_DAYS
        )));
    }
    if config.log.flush_interval_ms == 0 {
        return Err(invalid("log.flush_interval_ms cannot be 0"));
    }
    if config.log.sweep_interval_ms == 0 {
        return Err(invalid("log.sweep_interval_ms cannot be 0"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = Config::default();
        config.thumbnails.max_concurrent = 0;
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("thumbnails.max_concurrent"));
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_base_delay_above_cap_fails() {
        let mut config = Config::default();
        config.retry.base_delay_ms = 120_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_validate_zero_intervals_fail() {
        let mut config = Config::default();
        config.detector.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.tasks.tick_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.log.max_entries = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.tasks.retention_hours = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unbounded_windows_fail() {
        let mut config = Config::default();
        config.tasks.retention_hours = u32::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("tasks.retention_hours"));

        let mut config = Config::default();
        config.log.retention_days = u32::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("log.retention_days"));

        let mut config = Config::default();
        config.retry.max_delay_ms = u64::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("retry.max_delay_ms"));

        let mut config = Config::default();
        config.tasks.retention_hours = MAX_TASK_RETENTION_HOURS;
        config.log.retention_days = MAX_LOG_RETENTION_DAYS;
        assert!(validate_config(&config).is_ok());
    }
}
