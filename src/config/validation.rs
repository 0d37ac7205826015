use crate::config::types::{
    ApiConfig, Config, CrawlerConfig, FixedMonthEntry, OutputConfig, RetryConfig,
    SchedulerConfig, TaskEntry,
};
use crate::ConfigError;
use chrono::NaiveDate;
use url::Url;

const MAX_CONCURRENT_TASKS: u32 = 64;
const MAX_TASK_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_retry_config(&config.retry)?;
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    validate_tasks(&config.tasks)?;
    validate_fixed_month_tasks(&config.fixed_month_tasks)?;
    Ok(())
}

/// Validates worker pool configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_tasks < 1 || config.max_concurrent_tasks > MAX_CONCURRENT_TASKS {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-tasks must be between 1 and {}, got {}",
            MAX_CONCURRENT_TASKS, config.max_concurrent_tasks
        )));
    }

    if config.task_timeout_minutes < 1 || config.task_timeout_minutes > MAX_TASK_TIMEOUT_MINUTES {
        return Err(ConfigError::Validation(format!(
            "task-timeout-minutes must be between 1 and {}, got {}",
            MAX_TASK_TIMEOUT_MINUTES, config.task_timeout_minutes
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1".to_string(),
        ));
    }

    if !config.interval_seconds.is_finite() || config.interval_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "interval-seconds must be >= 0, got {}",
            config.interval_seconds
        )));
    }

    if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff-factor must be >= 1.0, got {}",
            config.backoff_factor
        )));
    }

    Ok(())
}

/// Validates search behaviour configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if !config.crawl_delay_seconds.is_finite() || config.crawl_delay_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "crawl-delay-seconds must be >= 0, got {}",
            config.crawl_delay_seconds
        )));
    }

    if config.cabin_classes.is_empty() {
        return Err(ConfigError::Validation(
            "cabin-classes must list at least one cabin class".to_string(),
        ));
    }

    if config.cabin_classes.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "cabin-classes cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates search backend configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", config.base_url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if config.request_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-seconds must be >= 1".to_string(),
        ));
    }

    if config.request_attempts == 0 {
        return Err(ConfigError::Validation(
            "request-attempts must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if matches!(config.json_dir.as_deref(), Some("")) {
        return Err(ConfigError::Validation(
            "json-dir cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates explicit task entries
fn validate_tasks(tasks: &[TaskEntry]) -> Result<(), ConfigError> {
    for task in tasks {
        validate_city(&task.dep_city)?;
        validate_city(&task.arr_city)?;

        let dep = parse_date(&task.dep_date)?;
        let ret = parse_date(&task.return_date)?;

        if ret < dep {
            return Err(ConfigError::Validation(format!(
                "Task {}->{}: return-date {} is before dep-date {}",
                task.dep_city, task.arr_city, task.return_date, task.dep_date
            )));
        }
    }

    Ok(())
}

/// Validates relative-month task entries
fn validate_fixed_month_tasks(entries: &[FixedMonthEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        validate_city(&entry.dep_city)?;
        validate_city(&entry.arr_city)?;

        for (key, day) in [("dep-day", entry.dep_day), ("return-day", entry.return_day)] {
            if !(1..=31).contains(&day) {
                return Err(ConfigError::Validation(format!(
                    "Fixed-month task {}->{}: {} must be between 1 and 31, got {}",
                    entry.dep_city, entry.arr_city, key, day
                )));
            }
        }

        if entry.return_day < entry.dep_day {
            return Err(ConfigError::Validation(format!(
                "Fixed-month task {}->{}: return-day {} is before dep-day {}",
                entry.dep_city, entry.arr_city, entry.return_day, entry.dep_day
            )));
        }
    }

    Ok(())
}

fn validate_city(code: &str) -> Result<(), ConfigError> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(format!(
            "City code '{}' must be non-empty and alphanumeric",
            code
        )));
    }
    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate(format!("'{}' is not a YYYY-MM-DD date", value)))
}
