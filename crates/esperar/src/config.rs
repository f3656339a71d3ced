//! Runtime configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional YAML file,
//! then `ESPERAR_*` environment variables.
//!
//! ```yaml
//! timeout_ms: 6000
//! poll_interval_ms: 100
//! screenshots: false
//! reports_folder: build/reports
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::RetryConfig;
use crate::result::{EsperarError, EsperarResult};

/// Environment variable for [`Configuration::timeout_ms`]
pub const ENV_TIMEOUT_MS: &str = "ESPERAR_TIMEOUT_MS";
/// Environment variable for [`Configuration::poll_interval_ms`]
pub const ENV_POLL_INTERVAL_MS: &str = "ESPERAR_POLL_INTERVAL_MS";
/// Environment variable for [`Configuration::screenshots`]
pub const ENV_SCREENSHOTS: &str = "ESPERAR_SCREENSHOTS";
/// Environment variable for [`Configuration::save_page_source`]
pub const ENV_SAVE_PAGE_SOURCE: &str = "ESPERAR_SAVE_PAGE_SOURCE";
/// Environment variable for [`Configuration::reports_folder`]
pub const ENV_REPORTS_FOLDER: &str = "ESPERAR_REPORTS_FOLDER";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Default wait budget in milliseconds
    pub timeout_ms: u64,
    /// Sleep between attempts in milliseconds
    pub poll_interval_ms: u64,
    /// Capture a screenshot on terminal failure
    pub screenshots: bool,
    /// Capture the page source on terminal failure
    pub save_page_source: bool,
    /// Where failure artifacts are written
    pub reports_folder: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            timeout_ms: 4000,
            poll_interval_ms: 200,
            screenshots: true,
            save_page_source: true,
            reports_folder: PathBuf::from("target/esperar/reports"),
        }
    }
}

impl Configuration {
    /// Set the timeout
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Enable or disable screenshots
    #[must_use]
    pub const fn with_screenshots(mut self, enabled: bool) -> Self {
        self.screenshots = enabled;
        self
    }

    /// Enable or disable page source capture
    #[must_use]
    pub const fn with_save_page_source(mut self, enabled: bool) -> Self {
        self.save_page_source = enabled;
        self
    }

    /// Set the reports folder
    #[must_use]
    pub fn with_reports_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.reports_folder = folder.into();
        self
    }

    /// Parse YAML; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> EsperarResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> EsperarResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `ESPERAR_*` overrides obtained through `lookup`
    pub fn apply_overrides<F>(mut self, lookup: F) -> EsperarResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = parse_millis(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse_millis(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SCREENSHOTS) {
            self.screenshots = parse_flag(ENV_SCREENSHOTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SAVE_PAGE_SOURCE) {
            self.save_page_source = parse_flag(ENV_SAVE_PAGE_SOURCE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REPORTS_FOLDER) {
            self.reports_folder = PathBuf::from(raw);
        }
        self.validate()?;
        Ok(self)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> EsperarResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> EsperarResult<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Reject values the dispatcher cannot work with
    pub fn validate(&self) -> EsperarResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(EsperarError::Config {
                message: "poll_interval_ms must be greater than zero".into(),
            });
        }
        if self.reports_folder.as_os_str().is_empty() {
            return Err(EsperarError::Config {
                message: "reports_folder must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Poll interval as a duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Retry settings derived from this configuration
    #[must_use]
    pub const fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.timeout()).with_poll_interval(self.poll_interval())
    }
}

fn parse_millis(key: &str, raw: &str) -> EsperarResult<u64> {
    raw.trim().parse().map_err(|_| EsperarError::Config {
        message: format!("{key} must be a non-negative integer (milliseconds), got '{raw}'"),
    })
}

fn parse_flag(key: &str, raw: &str) -> EsperarResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EsperarError::Config {
            message: format!("{key} must be a boolean, got '{raw}'"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = Configuration::default();
            assert_eq!(config.timeout_ms, 4000);
            assert_eq!(config.poll_interval_ms, 200);
            assert!(config.screenshots);
            assert!(config.save_page_source);
            assert_eq!(config.reports_folder, PathBuf::from("target/esperar/reports"));
        }

        #[test]
        fn test_retry_config() {
            let retry = Configuration::default()
                .with_timeout_ms(50)
                .with_poll_interval_ms(5)
                .retry_config();
            assert_eq!(retry.timeout, Duration::from_millis(50));
            assert_eq!(retry.poll_interval, Duration::from_millis(5));
        }
    }

    mod yaml_tests {
        use super::*;

        #[test]
        fn test_partial_yaml_keeps_defaults() {
            let config = Configuration::from_yaml_str("timeout_ms: 100\nscreenshots: false\n").unwrap();
            assert_eq!(config.timeout_ms, 100);
            assert!(!config.screenshots);
            assert_eq!(config.poll_interval_ms, 200);
        }

        #[test]
        fn test_negative_timeout_rejected() {
            assert!(matches!(
                Configuration::from_yaml_str("timeout_ms: -5\n"),
                Err(EsperarError::Yaml(_))
            ));
        }

        #[test]
        fn test_unknown_key_rejected() {
            assert!(Configuration::from_yaml_str("timeout: 5\n").is_err());
        }

        #[test]
        fn test_zero_poll_interval_rejected() {
            assert!(matches!(
                Configuration::from_yaml_str("poll_interval_ms: 0\n"),
                Err(EsperarError::Config { .. })
            ));
        }

        #[test]
        fn test_from_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("esperar.yaml");
            std::fs::write(&path, "poll_interval_ms: 25\nreports_folder: out\n").unwrap();
            let config = Configuration::from_file(&path).unwrap();
            assert_eq!(config.poll_interval_ms, 25);
            assert_eq!(config.reports_folder, PathBuf::from("out"));
        }

        #[test]
        fn test_missing_file_is_io_error() {
            let dir = tempfile::tempdir().unwrap();
            assert!(matches!(
                Configuration::from_file(dir.path().join("absent.yaml")),
                Err(EsperarError::Io(_))
            ));
        }
    }

    mod override_tests {
        use super::*;

        #[test]
        fn test_env_overrides_file_values() {
            let config = Configuration::from_yaml_str("timeout_ms: 100\n")
                .unwrap()
                .apply_overrides(env(&[
                    (ENV_TIMEOUT_MS, "250"),
                    (ENV_SAVE_PAGE_SOURCE, "no"),
                    (ENV_REPORTS_FOLDER, "/tmp/reports"),
                ]))
                .unwrap();
            assert_eq!(config.timeout_ms, 250);
            assert!(!config.save_page_source);
            assert_eq!(config.reports_folder, PathBuf::from("/tmp/reports"));
        }

        #[test]
        fn test_malformed_values_are_config_errors() {
            for (key, raw) in [
                (ENV_TIMEOUT_MS, "-1"),
                (ENV_POLL_INTERVAL_MS, "fast"),
                (ENV_SCREENSHOTS, "maybe"),
            ] {
                let result = Configuration::default().apply_overrides(env(&[(key, raw)]));
                assert!(matches!(result, Err(EsperarError::Config { .. })), "{key}={raw}");
            }
        }

        #[test]
        fn test_no_overrides_is_identity() {
            let config = Configuration::default().apply_overrides(env(&[])).unwrap();
            assert_eq!(config, Configuration::default());
        }
    }
}
