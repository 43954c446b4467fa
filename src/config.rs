//! Application configuration.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment overrides. The result is validated before use.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: PostgreSQL connection URL (unset: in-memory store)
//! - `REDIS_URL`: Redis connection URL (unset: in-memory cache and queue)
//! - `QGOV_BIND`: HTTP listen address (default: 0.0.0.0:8080)
//! - `QGOV_LOG_LEVEL`: default log filter (default: info)
//! - `QGOV_LOG_FORMAT`: `pretty` or `json` (default: pretty)
//! - `QGOV_DB_POOL_SIZE`: maximum pool connections (default: 10)
//! - `QGOV_DB_PRE_PING`: test connections before use (default: true)
//! - `QGOV_CACHE_NAMESPACE`: cache key namespace (default: qgov)
//! - `QGOV_CACHE_TTL_SECS`: default cache TTL (default: 300)
//! - `QGOV_QUEUE_NAME`: job queue name (default: qgov:jobs)
//! - `QGOV_WORKERS`: worker count (default: 4)
//! - `QGOV_JOB_MAX_ATTEMPTS`: attempts before dead-lettering (default: 3)
//! - `QGOV_WEBHOOK_URL`: notification webhook (unset: notifications are logged)
//! - `QGOV_REQUIRED_APPROVALS`: approval quorum (default: 1)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Upper bound on a single request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// PostgreSQL pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL. `None` selects the in-memory store.
    pub url: Option<String>,
    pub pool_size: u32,
    pub min_connections: u32,
    /// Maximum lifetime of a pooled connection, in seconds.
    pub pool_recycle_secs: u64,
    /// Test connections before handing them out.
    pub pool_pre_ping: bool,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            min_connections: 1,
            pool_recycle_secs: 1800,
            pool_pre_ping: true,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_recycle(&self) -> Duration {
        Duration::from_secs(self.pool_recycle_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL. `None` runs cache and queue in memory.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub namespace: String,
    pub default_ttl_secs: u64,
    /// Entry capacity of the in-memory fallback.
    pub memory_capacity: usize,
    /// How often a degraded cache re-checks Redis, in seconds.
    pub probe_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: "qgov".to_string(),
            default_ttl_secs: 300,
            memory_capacity: 10_000,
            probe_interval_secs: 30,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Relative jitter applied to each delay, 0.0-1.0.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub queue_name: String,
    pub workers: usize,
    pub max_attempts: u32,
    pub job_timeout_secs: u64,
    /// Blocking dequeue timeout, in seconds.
    pub poll_timeout_secs: u64,
    pub result_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Transition history older than this is purged by cleanup jobs.
    pub retention_days: u32,
    pub retry: RetrySettings,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            queue_name: "qgov:jobs".to_string(),
            workers: 4,
            max_attempts: 3,
            job_timeout_secs: 60,
            poll_timeout_secs: 5,
            result_ttl_secs: 86_400,
            cleanup_interval_secs: 3_600,
            retention_days: 365,
            retry: RetrySettings::default(),
        }
    }
}

impl JobSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Webhook receiving notification payloads. `None` logs them instead.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    pub required_approvals: u32,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            required_approvals: 1,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub cache: CacheSettings,
    pub jobs: JobSettings,
    pub logging: LoggingConfig,
    pub notifications: NotificationSettings,
    pub approvals: ApprovalSettings,
}

impl AppConfig {
    /// Loads defaults, the optional YAML file and the process environment,
    /// then validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML file. Missing sections and fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DATABASE_URL") {
            self.database.url = non_empty(val);
        }
        if let Some(val) = lookup("REDIS_URL") {
            self.redis.url = non_empty(val);
        }
        if let Some(val) = lookup("QGOV_BIND") {
            self.server.bind = val;
        }
        if let Some(val) = lookup("QGOV_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("QGOV_LOG_FORMAT") {
            self.logging.format = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "QGOV_LOG_FORMAT".to_string(),
                message,
            })?;
        }
        if let Some(val) = lookup("QGOV_DB_POOL_SIZE") {
            self.database.pool_size = parse_env_value(&val, "QGOV_DB_POOL_SIZE")?;
        }
        if let Some(val) = lookup("QGOV_DB_PRE_PING") {
            self.database.pool_pre_ping = parse_env_bool(&val, "QGOV_DB_PRE_PING")?;
        }
        if let Some(val) = lookup("QGOV_CACHE_NAMESPACE") {
            self.cache.namespace = val;
        }
        if let Some(val) = lookup("QGOV_CACHE_TTL_SECS") {
            self.cache.default_ttl_secs = parse_env_value(&val, "QGOV_CACHE_TTL_SECS")?;
        }
        if let Some(val) = lookup("QGOV_QUEUE_NAME") {
            self.jobs.queue_name = val;
        }
        if let Some(val) = lookup("QGOV_WORKERS") {
            self.jobs.workers = parse_env_value(&val, "QGOV_WORKERS")?;
        }
        if let Some(val) = lookup("QGOV_JOB_MAX_ATTEMPTS") {
            self.jobs.max_attempts = parse_env_value(&val, "QGOV_JOB_MAX_ATTEMPTS")?;
        }
        if let Some(val) = lookup("QGOV_WEBHOOK_URL") {
            self.notifications.webhook_url = non_empty(val);
        }
        if let Some(val) = lookup("QGOV_REQUIRED_APPROVALS") {
            self.approvals.required_approvals = parse_env_value(&val, "QGOV_REQUIRED_APPROVALS")?;
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationFailed(msg.to_string()));

        if self.server.bind.trim().is_empty() {
            return fail("server.bind cannot be empty");
        }
        if self.database.pool_size == 0 {
            return fail("database.pool_size must be greater than 0");
        }
        if self.database.min_connections > self.database.pool_size {
            return fail("database.min_connections cannot exceed database.pool_size");
        }
        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return fail("cache.namespace must be non-empty and must not contain ':'");
        }
        if self.server.request_timeout_secs == 0 {
            return fail("server.request_timeout_secs must be greater than 0");
        }
        if self.database.acquire_timeout_secs == 0 {
            return fail("database.acquire_timeout_secs must be greater than 0");
        }
        if self.cache.probe_interval_secs == 0 {
            return fail("cache.probe_interval_secs must be greater than 0");
        }
        if self.cache.memory_capacity == 0 {
            return fail("cache.memory_capacity must be greater than 0");
        }
        if self.jobs.queue_name.trim().is_empty() {
            return fail("jobs.queue_name cannot be empty");
        }
        if self.jobs.workers == 0 {
            return fail("jobs.workers must be greater than 0");
        }
        if self.jobs.max_attempts == 0 {
            return fail("jobs.max_attempts must be at least 1");
        }
        if self.jobs.job_timeout_secs == 0 {
            return fail("jobs.job_timeout_secs must be greater than 0");
        }
        if self.jobs.poll_timeout_secs == 0 {
            return fail("jobs.poll_timeout_secs must be greater than 0");
        }
        if self.jobs.cleanup_interval_secs == 0 {
            return fail("jobs.cleanup_interval_secs must be greater than 0");
        }
        if self.notifications.timeout_secs == 0 {
            return fail("notifications.timeout_secs must be greater than 0");
        }
        if self.jobs.retry.multiplier < 1.0 {
            return fail("jobs.retry.multiplier must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&self.jobs.retry.jitter) {
            return fail("jobs.retry.jitter must be between 0.0 and 1.0");
        }
        if self.jobs.retry.base_delay_ms > self.jobs.retry.max_delay_ms {
            return fail("jobs.retry.base_delay_ms cannot exceed jobs.retry.max_delay_ms");
        }
        if self.approvals.required_approvals == 0 {
            return fail("approvals.required_approvals must be at least 1");
        }
        Ok(())
    }

    /// YAML rendering with credentials removed from connection URLs.
    pub fn to_redacted_yaml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        redacted.database.url = redacted.database.url.as_deref().map(redact_url);
        redacted.redis.url = redacted.redis.url.as_deref().map(redact_url);
        redacted.notifications.webhook_url =
            redacted.notifications.webhook_url.as_deref().map(redact_url);
        Ok(serde_yaml::to_string(&redacted)?)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Replaces the userinfo part of a URL with `***`.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.database.pool_size, 10);
        assert!(config.database.pool_pre_ping);
        assert_eq!(config.database.pool_recycle(), Duration::from_secs(1800));
        assert_eq!(config.jobs.max_attempts, 3);
        assert_eq!(config.jobs.retry.base_delay_ms, 2_000);
        assert_eq!(config.approvals.required_approvals, 1);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qgov.yaml");
        std::fs::write(
            &path,
            "database:\n  url: postgres://qgov:secret@db/qgov\n  pool_size: 20\nlogging:\n  format: json\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.database.pool_size, 20);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cache.namespace, "qgov");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::default();
        config.jobs.workers = 2;
        config
            .apply_env(env(&[
                ("REDIS_URL", "redis://cache:6379"),
                ("QGOV_WORKERS", "8"),
                ("QGOV_DB_PRE_PING", "off"),
                ("QGOV_LOG_FORMAT", "JSON"),
            ]))
            .unwrap();

        assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.jobs.workers, 8);
        assert!(!config.database.pool_pre_ping);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_url_disables_backend() {
        let mut config = AppConfig::default();
        config.database.url = Some("postgres://db/qgov".into());
        config.apply_env(env(&[("DATABASE_URL", "")])).unwrap();
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("QGOV_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("QGOV_WORKERS"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.jobs.retry.jitter = 1.5;
        assert!(config.validate().unwrap_err().to_string().contains("jitter"));

        let mut config = AppConfig::default();
        config.cache.namespace = "a:b".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.approvals.required_approvals = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("required_approvals"));

        let mut config = AppConfig::default();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_and_timeouts_rejected() {
        let cases: [(&str, fn(&mut AppConfig)); 7] = [
            ("jobs.cleanup_interval_secs", |c| c.jobs.cleanup_interval_secs = 0),
            ("jobs.poll_timeout_secs", |c| c.jobs.poll_timeout_secs = 0),
            ("server.request_timeout_secs", |c| c.server.request_timeout_secs = 0),
            ("cache.probe_interval_secs", |c| c.cache.probe_interval_secs = 0),
            ("database.acquire_timeout_secs", |c| c.database.acquire_timeout_secs = 0),
            ("notifications.timeout_secs", |c| c.notifications.timeout_secs = 0),
            ("jobs.job_timeout_secs", |c| c.jobs.job_timeout_secs = 0),
        ];
        for (field, zero) in cases {
            let mut config = AppConfig::default();
            zero(&mut config);
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(field), "{field}: {err}");
        }
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://qgov:secret@db:5432/qgov"),
            "postgres://***@db:5432/qgov"
        );
        assert_eq!(redact_url("redis://cache:6379"), "redis://cache:6379");
        assert_eq!(redact_url("not a url"), "not a url");
    }

    #[test]
    fn test_redacted_yaml_hides_password() {
        let mut config = AppConfig::default();
        config.database.url = Some("postgres://qgov:secret@db/qgov".into());
        let yaml = config.to_redacted_yaml().unwrap();
        assert!(!yaml.contains("secret"));
        assert!(yaml.contains("***@db/qgov"));
    }
}
