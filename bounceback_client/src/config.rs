//! Configuration Module
//!
//! Handles configuration loading from Java-style .properties files (KEY=VALUE format).
//! Missing keys fall back to the defaults below.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the caller identity on every connection
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse property '{key}': {reason}")]
    ParseError { key: String, reason: String },

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Bounceback client configuration
///
/// Property names: HOST, PATH, PAYLOAD, USER_ID, TIMEOUT_SECONDS, POLL_INTERVAL_MS,
/// USERS, ITERATIONS, MIN_WAIT_MS, MAX_WAIT_MS, REPORT_EVERY,
/// HISTOGRAM_SIGNIFICANT_FIGURES, SAVE_HISTOGRAM
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Scheme, host and port, e.g. `ws://localhost:9999`
    pub host: String,
    pub path: String,
    pub payload: String,
    pub user_id: u32,
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub users: usize,
    pub iterations: usize,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub report_every: u64,
    pub histogram_significant_figures: u8,
    pub save_histogram: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "ws://localhost:9999".into(),
            path: "/messages/listen".into(),
            payload: "anything".into(),
            user_id: 1000,
            timeout_seconds: 10,
            poll_interval_ms: 100,
            users: 1,
            iterations: 10,
            min_wait_ms: 1000,
            max_wait_ms: 5000,
            report_every: 10,
            histogram_significant_figures: 3,
            save_histogram: false,
        }
    }
}

/// Parse an optional property, keeping `default` when it is absent
fn parse_or<T>(props: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match props.get(key) {
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::ParseError {
            key: key.into(),
            reason: format!("{}: {}", e, v),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Parse a Java-style .properties file into a HashMap.
    /// Skips blank lines and lines starting with '#'.
    fn parse_properties(content: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        map
    }

    /// Load configuration from a .properties file (Java KEY=VALUE format).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_properties_str(&content)
    }

    /// Parse config from a properties-format string.
    pub fn from_properties_str(content: &str) -> Result<Self, ConfigError> {
        let props = Self::parse_properties(content);
        let defaults = Config::default();

        Ok(Config {
            host: props.get("HOST").cloned().unwrap_or(defaults.host),
            path: props.get("PATH").cloned().unwrap_or(defaults.path),
            payload: props.get("PAYLOAD").cloned().unwrap_or(defaults.payload),
            user_id: parse_or(&props, "USER_ID", defaults.user_id)?,
            timeout_seconds: parse_or(&props, "TIMEOUT_SECONDS", defaults.timeout_seconds)?,
            poll_interval_ms: parse_or(&props, "POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            users: parse_or(&props, "USERS", defaults.users)?,
            iterations: parse_or(&props, "ITERATIONS", defaults.iterations)?,
            min_wait_ms: parse_or(&props, "MIN_WAIT_MS", defaults.min_wait_ms)?,
            max_wait_ms: parse_or(&props, "MAX_WAIT_MS", defaults.max_wait_ms)?,
            report_every: parse_or(&props, "REPORT_EVERY", defaults.report_every)?,
            histogram_significant_figures: parse_or(
                &props,
                "HISTOGRAM_SIGNIFICANT_FIGURES",
                defaults.histogram_significant_figures,
            )?,
            save_histogram: props
                .get("SAVE_HISTOGRAM")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.save_histogram),
        })
    }

    /// Load configuration, searching for config.properties in the current directory.
    pub fn load_or_default() -> Self {
        let path = "config.properties";
        if Path::new(path).exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path, e);
                }
            }
        }

        log::warn!("No config.properties found, using defaults");
        Self::default()
    }

    /// Reject combinations the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_wait_ms > self.max_wait_ms {
            return Err(ConfigError::Invalid {
                key: "MIN_WAIT_MS".into(),
                reason: format!("{} exceeds MAX_WAIT_MS {}", self.min_wait_ms, self.max_wait_ms),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_MS".into(),
                reason: "must be positive".into(),
            });
        }
        if !(1..=5).contains(&self.histogram_significant_figures) {
            return Err(ConfigError::Invalid {
                key: "HISTOGRAM_SIGNIFICANT_FIGURES".into(),
                reason: format!("{} is outside 1..=5", self.histogram_significant_figures),
            });
        }
        if self.report_every == 0 {
            return Err(ConfigError::Invalid {
                key: "REPORT_EVERY".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Full WebSocket URL for an endpoint path
    pub fn target_url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    /// Identity header attached to every connection
    pub fn user_header(&self) -> String {
        format!("{}: {}", USER_ID_HEADER, self.user_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Log all configuration parameters for debugging
    pub fn log_config(&self) {
        log::debug!("Configuration:");
        log::debug!("  host: {}", self.host);
        log::debug!("  path: {}", self.path);
        log::debug!("  payload: {}", self.payload);
        log::debug!("  user_id: {}", self.user_id);
        log::debug!("  timeout_seconds: {}", self.timeout_seconds);
        log::debug!("  poll_interval: {} ms", self.poll_interval_ms);
        log::debug!("  users: {}", self.users);
        log::debug!("  iterations: {}", self.iterations);
        log::debug!("  wait: {}..={} ms", self.min_wait_ms, self.max_wait_ms);
        log::debug!("  report_every: {}", self.report_every);
        log::debug!("  histogram_significant_figures: {}", self.histogram_significant_figures);
        log::debug!("  save_histogram: {}", self.save_histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "ws://localhost:9999");
        assert_eq!(config.path, "/messages/listen");
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(config.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_properties() {
        let content = r#"
HOST=ws://chat.example.com:8080
PATH=/messages/listen
PAYLOAD=hello
USER_ID=42
# This is a comment
TIMEOUT_SECONDS=3
POLL_INTERVAL_MS=50
USERS=4
ITERATIONS=100
MIN_WAIT_MS=10
MAX_WAIT_MS=20
REPORT_EVERY=25
HISTOGRAM_SIGNIFICANT_FIGURES=2
SAVE_HISTOGRAM=true
"#;
        let config = Config::from_properties_str(content).unwrap();
        assert_eq!(config.host, "ws://chat.example.com:8080");
        assert_eq!(config.payload, "hello");
        assert_eq!(config.user_id, 42);
        assert_eq!(config.timeout_seconds, 3);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.users, 4);
        assert_eq!(config.iterations, 100);
        assert_eq!((config.min_wait_ms, config.max_wait_ms), (10, 20));
        assert_eq!(config.report_every, 25);
        assert_eq!(config.histogram_significant_figures, 2);
        assert!(config.save_histogram);
    }

    #[test]
    fn test_parse_error_names_key() {
        let err = Config::from_properties_str("USER_ID=abc\n").unwrap_err();
        match err {
            ConfigError::ParseError { key, .. } => assert_eq!(key, "USER_ID"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_wait() {
        let config = Config {
            min_wait_ms: 10,
            max_wait_ms: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let config = Config {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_url_and_header() {
        let config = Config {
            user_id: 7,
            ..Default::default()
        };
        assert_eq!(config.target_url("/messages/listen"), "ws://localhost:9999/messages/listen");
        assert_eq!(config.user_header(), "X-User-Id: 7");
    }
}
