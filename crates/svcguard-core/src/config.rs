//! Breaker and registry configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a single circuit breaker. Fixed once the breaker exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successful probes while half-open before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is allowed (milliseconds).
    pub reset_timeout_ms: u64,
    /// A failure older than this no longer counts toward the streak (milliseconds).
    pub monitoring_window_ms: u64,
    /// Maximum number of probes in flight while half-open. `None` = unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_probes: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
            monitoring_window_ms: 120_000,
            half_open_max_probes: None,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    /// Reject values that would make the state machine degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(invalid("success_threshold", "must be at least 1"));
        }
        if self.half_open_max_probes == Some(0) {
            return Err(invalid(
                "half_open_max_probes",
                "must be at least 1 (omit for unbounded)",
            ));
        }
        Ok(())
    }

    /// Copy with zero thresholds and a zero probe cap raised to 1, the
    /// smallest values that keep every state reachable.
    pub fn normalized(&self) -> Self {
        Self {
            failure_threshold: self.failure_threshold.max(1),
            success_threshold: self.success_threshold.max(1),
            half_open_max_probes: self.half_open_max_probes.map(|n| n.max(1)),
            ..self.clone()
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Registry-wide configuration: defaults plus per-service overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Applied to any service without an override.
    pub defaults: CircuitBreakerConfig,
    /// Per-service overrides, keyed by dependency name.
    pub services: HashMap<String, CircuitBreakerConfig>,
}

impl RegistryConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate().map_err(|e| prefixed("defaults", e))?;
        for (name, cfg) in &self.services {
            cfg.validate()
                .map_err(|e| prefixed(&format!("services.{name}"), e))?;
        }
        Ok(())
    }

    /// The config a new breaker named `service` would get.
    pub fn for_service(&self, service: &str) -> CircuitBreakerConfig {
        self.services
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

fn prefixed(prefix: &str, err: ConfigError) -> ConfigError {
    match err {
        ConfigError::Invalid { field, reason } => ConfigError::Invalid {
            field: format!("{prefix}.{field}"),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = CircuitBreakerConfig::default();
        assert_eq!(c.failure_threshold, 5);
        assert_eq!(c.success_threshold, 2);
        assert_eq!(c.reset_timeout(), Duration::from_secs(60));
        assert_eq!(c.monitoring_window(), Duration::from_secs(120));
        assert!(c.half_open_max_probes.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = RegistryConfig::from_json_str(
            r#"{ "services": { "llm": { "failure_threshold": 3 } } }"#,
        )
        .unwrap();
        let llm = cfg.for_service("llm");
        assert_eq!(llm.failure_threshold, 3);
        assert_eq!(llm.reset_timeout_ms, 60_000);
        assert_eq!(cfg.for_service("cache"), CircuitBreakerConfig::default());
    }

    #[test]
    fn zero_threshold_is_rejected_with_path() {
        let err = RegistryConfig::from_json_str(
            r#"{ "services": { "rag": { "success_threshold": 0 } } }"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Invalid { field, .. } => {
                assert_eq!(field, "services.rag.success_threshold")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_probe_cap_is_rejected() {
        let c = CircuitBreakerConfig {
            half_open_max_probes: Some(0),
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn normalized_raises_zero_values() {
        let c = CircuitBreakerConfig {
            failure_threshold: 0,
            success_threshold: 0,
            half_open_max_probes: Some(0),
            reset_timeout_ms: 10,
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.failure_threshold, 1);
        assert_eq!(c.success_threshold, 1);
        assert_eq!(c.half_open_max_probes, Some(1));
        assert_eq!(c.reset_timeout_ms, 10);
        assert!(c.validate().is_ok());
        assert_eq!(
            CircuitBreakerConfig::default().normalized(),
            CircuitBreakerConfig::default()
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = RegistryConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RegistryConfig::from_json_file("/nonexistent/svcguard.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
