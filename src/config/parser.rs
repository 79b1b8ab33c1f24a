use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use spindle::config::load_config;
///
/// let config = load_config(Path::new("spindle.toml")).unwrap();
/// println!("Crawl queue: {}", config.worker.crawl_queue);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so that workers running different configurations
/// against the same store are easy to spot.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[crawl]
crawl_limit = 100
depth_limit = 3
valid_mime_types = ["text/*"]
cache_type = "full"
store_response_codes = true

[crawl.data]
campaign = "spring"

[worker]
key_prefix = "test"
max_attempts = 5

[storage]
database_path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawl.crawl_limit, Some(100));
        assert_eq!(config.crawl.depth_limit, Some(3));
        assert_eq!(config.crawl.valid_mime_types, vec!["text/*".to_string()]);
        assert_eq!(config.crawl.cache_type, CacheMode::Full);
        assert!(config.crawl.store_response_codes);
        assert_eq!(
            config.crawl.data.get("campaign"),
            Some(&serde_json::Value::String("spring".to_string()))
        );
        assert_eq!(config.worker.key_prefix, "test");
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.storage.database_path, "./test.db");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.crawl.timeout, 30);
        assert_eq!(config.crawl.redirect_limit, 10);
        assert!(config.crawl.follow_redirects);
        assert_eq!(config.crawl.cache, 300);
        assert_eq!(config.crawl.cache_type, CacheMode::CrawlBased);
        assert_eq!(config.crawl.valid_mime_types, vec!["*/*".to_string()]);
        assert_eq!(config.crawl.processing_queue, "spindle_process_job");
        assert_eq!(config.crawl.crawl_finished_queue, "spindle_finished_job");
        assert_eq!(config.worker.max_attempts, 3);
        assert_eq!(config.worker.crawl_queue, "spindle_crawl_job");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/spindle.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[worker]\nmax_attempts = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("[crawl]\ntimeout = 10\n");
        let file2 = create_temp_config("[crawl]\ntimeout = 20\n");

        let (_, hash1) = load_config_with_hash(file1.path()).unwrap();
        let (_, hash2) = load_config_with_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
