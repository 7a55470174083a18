//! Tracing / logging initialisation helpers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging settings for services wrapped by svcguard breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without its own entry. Defaults to `"info"`.
    pub level: String,
    /// Extra filter directives keyed by tracing target, such as
    /// `{"svcguard_core": "debug"}` to see every recorded breaker outcome.
    pub components: HashMap<String, String>,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            components: HashMap::default(),
            json: false,
        }
    }
}

/// Build the filter for `config`, e.g. `"warn,svcguard_core=debug"`.
///
/// `RUST_LOG`, when set and valid, wins over the config.
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = config.level.clone();
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }

    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise tracing with the given log config.
/// Should be called once at application startup; later calls are ignored.
pub fn init_tracing(config: &LogConfig) {
    let filter = build_filter(config);

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_empty_json() {
        let cfg: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.level, "info");
        assert!(!cfg.json);
        assert!(cfg.components.is_empty());
    }

    #[test]
    fn documented_component_override_reaches_filter() {
        std::env::remove_var("RUST_LOG");
        let cfg: LogConfig = serde_json::from_str(
            r#"{ "level": "warn", "components": { "svcguard_core": "debug" }, "json": true }"#,
        )
        .unwrap();
        assert!(cfg.json);
        let filter = build_filter(&cfg).to_string();
        assert!(filter.contains("svcguard_core=debug"), "{filter}");
    }

    #[test]
    fn component_names_are_normalised() {
        std::env::remove_var("RUST_LOG");
        let mut cfg = LogConfig {
            level: "warn".into(),
            ..Default::default()
        };
        cfg.components.insert("svcguard-core".into(), "debug".into());
        let filter = build_filter(&cfg).to_string();
        assert!(filter.contains("svcguard_core=debug"), "{filter}");
        assert!(filter.contains("warn"), "{filter}");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing(&LogConfig::default());
        init_tracing(&LogConfig {
            json: true,
            ..Default::default()
        });
    }
}
