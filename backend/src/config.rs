//! Runtime configuration read from the environment (a `.env` file is honoured).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::domain::outbox::OutboxConfig;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `sqlite:` URL of the local cache
    pub database_url: String,
    /// Base URL of the hosted document service; `None` keeps documents in process
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub remote_timeout_secs: u64,
    pub bind_addr: String,
    pub log_level: String,
    pub bcrypt_cost: u32,
    pub outbox: OutboxConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            remote_url: None,
            remote_token: None,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            outbox: OutboxConfig::default(),
        }
    }
}

/// Local data directory when the platform has one, else the working directory
fn default_database_url() -> String {
    match dirs::data_local_dir() {
        Some(dir) => format!("sqlite:{}", dir.join("babylog").join("babylog.db").display()),
        None => "sqlite:babylog.db".to_string(),
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring invalid value {:?} for {}", value, key);
                default
            }
        },
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let outbox = OutboxConfig {
            alert_after_attempts: parse_or(
                "BABYLOG_OUTBOX_ALERT_AFTER_ATTEMPTS",
                var("BABYLOG_OUTBOX_ALERT_AFTER_ATTEMPTS"),
                defaults.outbox.alert_after_attempts,
            ),
            backoff_ms: parse_or(
                "BABYLOG_OUTBOX_BACKOFF_MS",
                var("BABYLOG_OUTBOX_BACKOFF_MS"),
                defaults.outbox.backoff_ms,
            ),
            backoff_factor: parse_or(
                "BABYLOG_OUTBOX_BACKOFF_FACTOR",
                var("BABYLOG_OUTBOX_BACKOFF_FACTOR"),
                defaults.outbox.backoff_factor,
            ),
            max_backoff_ms: parse_or(
                "BABYLOG_OUTBOX_MAX_BACKOFF_MS",
                var("BABYLOG_OUTBOX_MAX_BACKOFF_MS"),
                defaults.outbox.max_backoff_ms,
            ),
            poll_interval_secs: parse_or(
                "BABYLOG_OUTBOX_POLL_SECS",
                var("BABYLOG_OUTBOX_POLL_SECS"),
                defaults.outbox.poll_interval_secs,
            ),
        };

        Self {
            database_url: var("BABYLOG_DATABASE_URL").unwrap_or(defaults.database_url),
            remote_url: var("BABYLOG_REMOTE_URL"),
            remote_token: var("BABYLOG_REMOTE_TOKEN"),
            remote_timeout_secs: parse_or(
                "BABYLOG_REMOTE_TIMEOUT_SECS",
                var("BABYLOG_REMOTE_TIMEOUT_SECS"),
                defaults.remote_timeout_secs,
            ),
            bind_addr: var("BABYLOG_BIND_ADDR").unwrap_or(defaults.bind_addr),
            log_level: var("BABYLOG_LOG_LEVEL").unwrap_or(defaults.log_level),
            bcrypt_cost: parse_or("BABYLOG_BCRYPT_COST", var("BABYLOG_BCRYPT_COST"), defaults.bcrypt_cost),
            outbox,
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Filesystem path of the local database, when the URL names a file
    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self.database_url.strip_prefix("sqlite:")?;
        let path = path.trim_start_matches("//");
        if path.is_empty() || path.starts_with(":memory:") || path.starts_with("file:") {
            return None;
        }
        Some(PathBuf::from(path.split('?').next().unwrap_or(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert!(config.database_url.starts_with("sqlite:"));
        assert!(config.remote_url.is_none());
        assert_eq!(config.remote_timeout_secs, 10);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.outbox.alert_after_attempts, 8);
        assert_eq!(config.outbox.backoff_ms, 1000);
        assert_eq!(config.outbox.max_backoff_ms, 60_000);
    }

    #[test]
    fn test_overrides_and_invalid_numbers() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BABYLOG_DATABASE_URL", "sqlite:/tmp/test.db"),
            ("BABYLOG_REMOTE_URL", "https://docs.example.com"),
            ("BABYLOG_REMOTE_TIMEOUT_SECS", "not-a-number"),
            ("BABYLOG_OUTBOX_ALERT_AFTER_ATTEMPTS", "3"),
        ]));
        assert_eq!(config.database_url, "sqlite:/tmp/test.db");
        assert_eq!(config.remote_url.as_deref(), Some("https://docs.example.com"));
        assert_eq!(config.remote_timeout_secs, 10);
        assert_eq!(config.outbox.alert_after_attempts, 3);
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/test.db")));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = AppConfig::from_lookup(lookup(&[("BABYLOG_REMOTE_URL", "  ")]));
        assert!(config.remote_url.is_none());
    }
}
