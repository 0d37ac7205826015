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
/// use fare_sweep::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Cabin classes: {:?}", config.crawler.cabin_classes);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Run records store this hash so results can be traced back to the
/// configuration that produced them.
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
    use crate::ErrorKind;
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
[scheduler]
max-concurrent-tasks = 2
task-timeout-minutes = 5

[retry]
max-attempts = 4
interval-seconds = 0.5
backoff-factor = 3.0
retryable-errors = ["timeout"]

[crawler]
crawl-delay-seconds = 1.5
cabin-classes = ["2", "4"]

[api]
base-url = "https://fares.example.com"

[api.headers]
X-Requested-With = "XMLHttpRequest"

[output]
database-path = "./test.db"
json-dir = "./data"

[[tasks]]
dep-city = "TPE"
arr-city = "SIN"
dep-date = "2025-07-21"
return-date = "2025-07-27"

[[fixed-month-tasks]]
dep-city = "TPE"
arr-city = "NRT"
month-offset = 2
dep-day = 5
return-day = 9
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.retryable_errors, vec![ErrorKind::Timeout]);
        assert_eq!(config.crawler.cabin_classes, vec!["2", "4"]);
        assert_eq!(config.api.headers.len(), 1);
        assert_eq!(config.output.json_dir.as_deref(), Some("./data"));
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.fixed_month_tasks[0].month_offset, 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.scheduler.max_concurrent_tasks, 4);
        assert_eq!(config.scheduler.task_timeout_minutes, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.retry.retryable_errors,
            vec![ErrorKind::Timeout, ErrorKind::Connection]
        );
        assert_eq!(config.crawler.cabin_classes, vec!["2"]);
        assert_eq!(config.crawler.crawl_delay_seconds, 2.0);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_error_kind_is_rejected() {
        let result = parse_config("[retry]\nretryable-errors = [\"gremlins\"]\n");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[scheduler]\nmax-concurrent-tasks = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_run_hash_tracks_file_content() {
        let file = create_temp_config("[crawler]\ncabin-classes = [\"2\"]\n");
        let other = create_temp_config("[crawler]\ncabin-classes = [\"4\"]\n");

        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.crawler.cabin_classes, vec!["2"]);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, compute_config_hash(file.path()).unwrap());
        assert_ne!(hash, compute_config_hash(other.path()).unwrap());
    }
}
