use crate::config::types::{Config, CrawlOptions, StorageConfig, WorkerConfig};
use crate::url::GlobPattern;
use crate::ConfigError;

/// Highest accepted `redirect_limit`
const MAX_REDIRECT_LIMIT: u32 = 50;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_options(&config.crawl)?;
    validate_worker_config(&config.worker)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates the options of a single crawl
///
/// Also applied by the crawl starter to options passed in directly rather
/// than loaded from a file.
pub fn validate_crawl_options(options: &CrawlOptions) -> Result<(), ConfigError> {
    if options.timeout == 0 {
        return Err(ConfigError::Validation(
            "timeout must be at least 1 second".to_string(),
        ));
    }

    if options.redirect_limit > MAX_REDIRECT_LIMIT {
        return Err(ConfigError::Validation(format!(
            "redirect_limit must be <= {}, got {}",
            MAX_REDIRECT_LIMIT, options.redirect_limit
        )));
    }

    if options.crawl_limit == Some(0) {
        return Err(ConfigError::Validation(
            "crawl_limit must be >= 1 when set".to_string(),
        ));
    }

    if options.depth_limit == Some(0) {
        return Err(ConfigError::Validation(
            "depth_limit must be >= 1 when set".to_string(),
        ));
    }

    validate_patterns("internal_urls", &options.internal_urls)?;
    validate_patterns("external_urls", &options.external_urls)?;
    validate_patterns("valid_mime_types", &options.valid_mime_types)?;
    validate_patterns("text_mime_types", &options.text_mime_types)?;

    for seed in &options.seed_urls {
        crate::url::normalize_url(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }

    if options.processing_queue.is_empty() {
        return Err(ConfigError::Validation(
            "processing_queue cannot be empty".to_string(),
        ));
    }

    if options.crawl_finished_queue.is_empty() {
        return Err(ConfigError::Validation(
            "crawl_finished_queue cannot be empty".to_string(),
        ));
    }

    if let Some(counter) = &options.enqueue_counter {
        if counter.namespace.is_empty() || counter.key.is_empty() || counter.field.is_empty() {
            return Err(ConfigError::Validation(
                "enqueue_counter namespace, key and field cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_patterns(name: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        GlobPattern::new(pattern)
            .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", name, e)))?;
    }
    Ok(())
}

/// Validates worker configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.key_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "key_prefix cannot be empty".to_string(),
        ));
    }

    if config.crawl_queue.is_empty() {
        return Err(ConfigError::Validation(
            "crawl_queue cannot be empty".to_string(),
        ));
    }

    if config.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.job_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "job_timeout_secs must be >= 1 when set".to_string(),
        ));
    }

    for (name, value) in [
        ("poll_interval_ms", config.poll_interval_ms),
        ("lock_timeout_ms", config.lock_timeout_ms),
        ("lock_ttl_ms", config.lock_ttl_ms),
        ("lock_poll_ms", config.lock_poll_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::EnqueueCounter;

    fn create_test_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&create_test_config()).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = create_test_config();
        config.crawl.timeout = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_redirect_limit_bounds() {
        let mut config = create_test_config();
        config.crawl.redirect_limit = 50;
        assert!(validate(&config).is_ok());

        config.crawl.redirect_limit = 51;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = create_test_config();
        config.crawl.crawl_limit = Some(0);
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.crawl.depth_limit = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let mut config = create_test_config();
        config.crawl.internal_urls = vec!["http://example.com/*".to_string(), String::new()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_invalid_seed_rejected() {
        let mut config = create_test_config();
        config.crawl.seed_urls = vec!["ftp://example.com/".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_empty_queue_names_rejected() {
        let mut config = create_test_config();
        config.crawl.processing_queue.clear();
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.worker.crawl_queue.clear();
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.worker.key_prefix.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_enqueue_counter_fields_required() {
        let mut config = create_test_config();
        config.crawl.enqueue_counter = Some(EnqueueCounter {
            namespace: "stats".to_string(),
            key: String::new(),
            field: "pages".to_string(),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_worker_intervals_must_be_positive() {
        let mut config = create_test_config();
        config.worker.lock_poll_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = create_test_config();
        config.worker.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path_rejected() {
        let mut config = create_test_config();
        config.storage.database_path.clear();
        assert!(validate(&config).is_err());
    }
}
