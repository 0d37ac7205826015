use crate::ErrorKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Fare-Sweep
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default, rename = "fixed-month-tasks")]
    pub fixed_month_tasks: Vec<FixedMonthEntry>,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on tasks running at the same time
    #[serde(rename = "max-concurrent-tasks", default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    /// How long a batch caller waits for stragglers (minutes)
    #[serde(rename = "task-timeout-minutes", default = "default_task_timeout_minutes")]
    pub task_timeout_minutes: u64,

    /// Sleep between failed permit attempts (milliseconds)
    #[serde(rename = "permit-poll-millis", default = "default_permit_poll_millis")]
    pub permit_poll_millis: u64,
}

/// Task-level retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per task, counting the first one
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry (seconds)
    #[serde(rename = "interval-seconds", default = "default_interval_seconds")]
    pub interval_seconds: f64,

    /// Multiplier applied per retry
    #[serde(rename = "backoff-factor", default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Error kinds that may be retried; everything else is terminal
    #[serde(rename = "retryable-errors", default = "default_retryable_errors")]
    pub retryable_errors: Vec<ErrorKind>,
}

/// Search behaviour configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Courtesy delay between pages, outbound candidates and cabin classes (seconds)
    #[serde(rename = "crawl-delay-seconds", default = "default_crawl_delay_seconds")]
    pub crawl_delay_seconds: f64,

    /// Cabin classes queried for every task, in order
    #[serde(rename = "cabin-classes", default = "default_cabin_classes")]
    pub cabin_classes: Vec<String>,
}

/// Search backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Scheme and host of the search backend
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "request-timeout-seconds", default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Attempts per HTTP request before the client gives up
    #[serde(rename = "request-attempts", default = "default_request_attempts")]
    pub request_attempts: u32,

    #[serde(default)]
    pub referer: Option<String>,

    #[serde(default)]
    pub origin: Option<String>,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Directory for JSON offer files; no JSON files are written when unset
    #[serde(rename = "json-dir", default)]
    pub json_dir: Option<String>,
}

/// An explicit route/date query
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    #[serde(rename = "dep-city")]
    pub dep_city: String,

    #[serde(rename = "arr-city")]
    pub arr_city: String,

    /// Departure date, `YYYY-MM-DD`
    #[serde(rename = "dep-date")]
    pub dep_date: String,

    /// Return date, `YYYY-MM-DD`
    #[serde(rename = "return-date")]
    pub return_date: String,

    #[serde(default)]
    pub name: Option<String>,
}

/// A query whose dates are relative to the current month
#[derive(Debug, Clone, Deserialize)]
pub struct FixedMonthEntry {
    #[serde(rename = "dep-city")]
    pub dep_city: String,

    #[serde(rename = "arr-city")]
    pub arr_city: String,

    /// Months after the current one
    #[serde(rename = "month-offset")]
    pub month_offset: u32,

    #[serde(rename = "dep-day")]
    pub dep_day: u32,

    #[serde(rename = "return-day")]
    pub return_day: u32,
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_minutes.saturating_mul(60))
    }

    pub fn permit_poll(&self) -> Duration {
        Duration::from_millis(self.permit_poll_millis)
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds.max(0.0))
    }
}

impl CrawlerConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_secs_f64(self.crawl_delay_seconds.max(0.0))
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_minutes: default_task_timeout_minutes(),
            permit_poll_millis: default_permit_poll_millis(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_seconds: default_interval_seconds(),
            backoff_factor: default_backoff_factor(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            crawl_delay_seconds: default_crawl_delay_seconds(),
            cabin_classes: default_cabin_classes(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_seconds: default_request_timeout_seconds(),
            request_attempts: default_request_attempts(),
            referer: None,
            origin: None,
            headers: BTreeMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            json_dir: None,
        }
    }
}

fn default_max_concurrent_tasks() -> u32 {
    4
}

fn default_task_timeout_minutes() -> u64 {
    60
}

fn default_permit_poll_millis() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_interval_seconds() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_retryable_errors() -> Vec<ErrorKind> {
    vec![ErrorKind::Timeout, ErrorKind::Connection]
}

fn default_crawl_delay_seconds() -> f64 {
    2.0
}

fn default_cabin_classes() -> Vec<String> {
    vec!["2".to_string()]
}

fn default_base_url() -> String {
    "https://www.travel4u.com.tw".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_request_attempts() -> u32 {
    3
}

fn default_database_path() -> String {
    "./fares.db".to_string()
}
