//! Process configuration, read from `HAVEN_*` environment variables

use std::env::current_dir;
use std::fmt::{Display, Formatter};
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::{AppError, Result};
use crate::logging::{DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_INTERVAL, LogFormat, LogLevel};

const APP_DIR: &str = "haven";
const DEFAULT_COMPLIANCE_ROLE: &str = "compliance_officer";
const DEFAULT_ESCALATION_QUEUE: usize = 100;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
    Test,
}

impl Environment {
    /// Production-like environments hide internals from clients
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" | "stage" => Ok(Self::Staging),
            "development" | "dev" => Ok(Self::Development),
            "test" | "testing" => Ok(Self::Test),
            other => Err(AppError::configuration(format!("unknown environment: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub log_buffer_capacity: usize,
    pub log_flush_interval: Duration,
    pub log_retain_pii: bool,
    pub database_url: String,
    /// Role compliance tasks are assigned to
    pub compliance_role: String,
    /// Capacity of the escalation worker's queue
    pub escalation_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: LogLevel::Info,
            log_format: LogFormat::Pretty,
            log_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            log_flush_interval: DEFAULT_FLUSH_INTERVAL,
            log_retain_pii: false,
            database_url: "sqlite::memory:".to_string(),
            compliance_role: DEFAULT_COMPLIANCE_ROLE.to_string(),
            escalation_queue: DEFAULT_ESCALATION_QUEUE,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let environment = match get("HAVEN_ENV") {
            Some(raw) => raw.parse()?,
            None => defaults.environment,
        };
        let log_level = match get("HAVEN_LOG_LEVEL") {
            Some(raw) => LogLevel::parse(&raw)
                .ok_or_else(|| AppError::configuration(format!("invalid HAVEN_LOG_LEVEL: {raw}")))?,
            None => defaults.log_level,
        };
        let log_format = match get("HAVEN_LOG_FORMAT") {
            Some(raw) => LogFormat::parse(&raw).ok_or_else(|| {
                AppError::configuration(format!("invalid HAVEN_LOG_FORMAT: {raw}"))
            })?,
            None if environment.is_production() => LogFormat::Json,
            None => defaults.log_format,
        };
        let log_buffer_capacity = match get("HAVEN_LOG_BUFFER_CAPACITY") {
            Some(raw) => parse_number("HAVEN_LOG_BUFFER_CAPACITY", &raw)?,
            None => defaults.log_buffer_capacity,
        };
        let log_flush_interval = match get("HAVEN_LOG_FLUSH_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number("HAVEN_LOG_FLUSH_INTERVAL_MS", &raw)?),
            None => defaults.log_flush_interval,
        };
        let log_retain_pii = match get("HAVEN_LOG_RETAIN_PII") {
            Some(raw) => parse_bool("HAVEN_LOG_RETAIN_PII", &raw)?,
            None => defaults.log_retain_pii,
        };
        let database_url = match get("HAVEN_DATABASE_URL") {
            Some(url) => url,
            None => default_database_url()?,
        };
        let compliance_role = get("HAVEN_COMPLIANCE_ROLE").unwrap_or(defaults.compliance_role);
        let escalation_queue = match get("HAVEN_ESCALATION_QUEUE") {
            Some(raw) => parse_number("HAVEN_ESCALATION_QUEUE", &raw)?,
            None => defaults.escalation_queue,
        };

        let config = Self {
            environment,
            log_level,
            log_format,
            log_buffer_capacity,
            log_flush_interval,
            log_retain_pii,
            database_url,
            compliance_role,
            escalation_queue,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_buffer_capacity == 0 {
            return Err(AppError::configuration(
                "HAVEN_LOG_BUFFER_CAPACITY must be greater than zero",
            ));
        }
        if self.log_flush_interval.is_zero() {
            return Err(AppError::configuration(
                "HAVEN_LOG_FLUSH_INTERVAL_MS must be greater than zero",
            ));
        }
        if self.escalation_queue == 0 {
            return Err(AppError::configuration("HAVEN_ESCALATION_QUEUE must be greater than zero"));
        }
        if self.log_retain_pii && self.environment.is_production() {
            return Err(AppError::configuration(format!(
                "HAVEN_LOG_RETAIN_PII is not allowed in {}",
                self.environment
            )));
        }
        if self.compliance_role.trim().is_empty() {
            return Err(AppError::configuration("HAVEN_COMPLIANCE_ROLE must not be empty"));
        }

        let url = Url::parse(&self.database_url)
            .map_err(|e| AppError::configuration(format!("invalid HAVEN_DATABASE_URL: {e}")))?;
        if url.scheme() != "sqlite" {
            return Err(AppError::configuration(format!(
                "unsupported database scheme: {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        AppError::configuration(format!("{key} must be a non-negative integer, got {raw}"))
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::configuration(format!("{key} must be a boolean, got {raw}"))),
    }
}

/// Path to the data directory for the application.
/// Falls back to the current directory if the data directory cannot be determined.
pub fn data_dir() -> Result<PathBuf> {
    let mut path = match dirs::data_dir() {
        Some(dir) => dir,
        None => {
            warn!("Could not determine data directory. Attempting to use current directory.");
            current_dir()?
        }
    };
    path.push(APP_DIR);
    if !path.exists() {
        create_dir_all(&path)?;
    }
    Ok(path)
}

fn default_database_url() -> Result<String> {
    let path = data_dir()?.join("haven.db");
    Ok(format!("sqlite://{}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![("HAVEN_DATABASE_URL", "sqlite::memory:")]
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&base())).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.log_buffer_capacity, 100);
        assert_eq!(config.log_flush_interval, Duration::from_secs(5));
        assert_eq!(config.compliance_role, "compliance_officer");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.extend([
            ("HAVEN_ENV", "production"),
            ("HAVEN_LOG_LEVEL", "warn"),
            ("HAVEN_LOG_BUFFER_CAPACITY", "10"),
            ("HAVEN_LOG_FLUSH_INTERVAL_MS", "250"),
            ("HAVEN_COMPLIANCE_ROLE", "privacy_officer"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_buffer_capacity, 10);
        assert_eq!(config.log_flush_interval, Duration::from_millis(250));
        assert_eq!(config.compliance_role, "privacy_officer");
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut vars = base();
        vars.push(("HAVEN_LOG_BUFFER_CAPACITY", "0"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_rejects_retained_pii_in_production() {
        let mut vars = base();
        vars.extend([("HAVEN_ENV", "staging"), ("HAVEN_LOG_RETAIN_PII", "true")]);
        assert!(Config::from_lookup(lookup(&vars)).is_err());

        let mut vars = base();
        vars.extend([("HAVEN_ENV", "development"), ("HAVEN_LOG_RETAIN_PII", "true")]);
        assert!(Config::from_lookup(lookup(&vars)).unwrap().log_retain_pii);
    }

    #[test]
    fn test_rejects_non_sqlite_database() {
        let mut vars = base();
        vars[0] = ("HAVEN_DATABASE_URL", "postgres://localhost/haven");
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }
}
