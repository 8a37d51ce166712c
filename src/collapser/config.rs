//! Collapser configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapserConfig {
    /// Identity used in logs, errors and the request log.
    pub name: String,
    /// How long a batch stays open after its first unit arrives.
    #[serde(rename = "window_ms", with = "millis")]
    pub window: Duration,
    /// Close the batch early once it holds this many units.
    pub max_batch_size: Option<usize>,
    /// Record each dispatched batch in the scope's request log.
    pub request_log_enabled: bool,
}

impl Default for CollapserConfig {
    fn default() -> Self {
        Self {
            name: "collapser".to_string(),
            window: Duration::from_millis(10),
            max_batch_size: None,
            request_log_enabled: true,
        }
    }
}

impl CollapserConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }
    pub fn with_request_log(mut self, enabled: bool) -> Self {
        self.request_log_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = || ErrorContext::new().with_source("collapser_config");
        if self.name.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "collapser name must not be empty",
                ctx().with_field_path("name"),
            ));
        }
        if self.window.is_zero() {
            return Err(Error::configuration_with_context(
                "batch window must be greater than zero",
                ctx().with_field_path("window_ms"),
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(Error::configuration_with_context(
                "max batch size must be at least 1",
                ctx().with_field_path("max_batch_size"),
            ));
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                "invalid collapser configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("collapser_config"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config named `name` from `<PREFIX>_WINDOW_MS`, `<PREFIX>_MAX_BATCH_SIZE`
    /// and `<PREFIX>_REQUEST_LOG`. Unset variables keep their defaults.
    pub fn from_env(prefix: &str, name: impl Into<String>) -> Result<Self> {
        Self::from_lookup(prefix, name, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(prefix: &str, name: impl Into<String>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(name);

        let key = format!("{}_WINDOW_MS", prefix);
        if let Some(raw) = lookup(&key) {
            config.window = Duration::from_millis(parse_env(&key, &raw)?);
        }
        let key = format!("{}_MAX_BATCH_SIZE", prefix);
        if let Some(raw) = lookup(&key) {
            config.max_batch_size = Some(parse_env(&key, &raw)?);
        }
        let key = format!("{}_REQUEST_LOG", prefix);
        if let Some(raw) = lookup(&key) {
            config.request_log_enabled = parse_env(&key, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        Error::configuration_with_context(
            format!("cannot parse '{}'", raw),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(e.to_string())
                .with_source("collapser_config"),
        )
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = CollapserConfig::default();
        assert_eq!(config.window, Duration::from_millis(10));
        assert_eq!(config.max_batch_size, None);
        assert!(config.request_log_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CollapserConfig::new("numbers")
            .with_window(Duration::from_millis(50))
            .with_max_batch_size(100)
            .with_request_log(false);
        assert_eq!(config.name, "numbers");
        assert_eq!(config.window, Duration::from_millis(50));
        assert_eq!(config.max_batch_size, Some(100));
        assert!(!config.request_log_enabled);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = CollapserConfig::new("numbers")
            .with_window(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().unwrap().field_path.as_deref(),
            Some("window_ms")
        );

        let err = CollapserConfig::new("numbers")
            .with_max_batch_size(0)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().unwrap().field_path.as_deref(),
            Some("max_batch_size")
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = "name: numbers\nwindow_ms: 25\nmax_batch_size: 64\n";
        let config = CollapserConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.name, "numbers");
        assert_eq!(config.window, Duration::from_millis(25));
        assert_eq!(config.max_batch_size, Some(64));
        assert!(config.request_log_enabled);
    }

    #[test]
    fn test_from_yaml_invalid() {
        let err = CollapserConfig::from_yaml_str("window_ms: soon").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("NUMBERS_WINDOW_MS", "40"),
            ("NUMBERS_MAX_BATCH_SIZE", "8"),
            ("NUMBERS_REQUEST_LOG", "false"),
        ]
        .into_iter()
        .collect();
        let config = CollapserConfig::from_lookup("NUMBERS", "numbers", |k| {
            vars.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.window, Duration::from_millis(40));
        assert_eq!(config.max_batch_size, Some(8));
        assert!(!config.request_log_enabled);
    }

    #[test]
    fn test_from_lookup_bad_value_names_variable() {
        let err = CollapserConfig::from_lookup("NUMBERS", "numbers", |k| {
            (k == "NUMBERS_MAX_BATCH_SIZE").then(|| "lots".to_string())
        })
        .unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("NUMBERS_MAX_BATCH_SIZE"));
    }
}
