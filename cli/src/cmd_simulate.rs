//! `svcguard simulate` — replay an outcome script against one breaker.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;

use svcguard_core::{
    BreakerError, BreakerRegistry, CircuitBreakerStats, CircuitState, RegistryConfig,
    StateTransition,
};
use svcguard_observability::attach_transition_logger;

/// One scripted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    Wait,
}

pub fn parse_script(pattern: &str) -> Result<Vec<Step>> {
    pattern
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| match c.to_ascii_lowercase() {
            's' => Ok(Step::Succeed),
            'f' => Ok(Step::Fail),
            'w' => Ok(Step::Wait),
            other => bail!("unknown outcome '{other}' (expected s, f or w)"),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct CallRecord {
    pub step: usize,
    pub outcome: &'static str,
    pub result: String,
    pub state_after: CircuitState,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub service: String,
    pub calls: Vec<CallRecord>,
    pub history: Vec<StateTransition>,
    pub stats: CircuitBreakerStats,
}

pub async fn run(
    config: RegistryConfig,
    service: &str,
    script: &[Step],
    step_ms: u64,
    fallback: bool,
) -> Report {
    let registry = BreakerRegistry::from_config(config);
    attach_transition_logger(&registry);
    let breaker = registry.get_breaker(service, None);
    tracing::debug!(service, steps = script.len(), config = ?breaker.config(), "Replaying outcome script");

    let mut calls = Vec::new();
    for (step, action) in script.iter().enumerate() {
        let (label, succeed) = match action {
            Step::Wait => {
                tokio::time::sleep(Duration::from_millis(step_ms)).await;
                continue;
            }
            Step::Succeed => ("success", true),
            Step::Fail => ("failure", false),
        };

        let operation = || async move {
            if succeed {
                Ok("live".to_string())
            } else {
                Err("simulated failure".to_string())
            }
        };
        let outcome = if fallback {
            breaker
                .execute_with_fallback(operation, || async { Ok("fallback".to_string()) })
                .await
        } else {
            breaker.execute(operation).await
        };

        let result = match outcome {
            Ok(value) => value,
            Err(BreakerError::Open(_)) => "rejected".to_string(),
            Err(e) => format!("error: {e}"),
        };
        calls.push(CallRecord {
            step,
            outcome: label,
            result,
            state_after: breaker.state(),
        });
    }

    Report {
        service: service.to_string(),
        calls,
        history: breaker.history(),
        stats: breaker.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcguard_core::CircuitBreakerConfig;

    #[test]
    fn parses_script_ignoring_separators() {
        assert_eq!(
            parse_script("s, F w").unwrap(),
            vec![Step::Succeed, Step::Fail, Step::Wait]
        );
        assert!(parse_script("sfx").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn replays_trip_and_recovery() {
        let config = RegistryConfig {
            defaults: CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                reset_timeout_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        };
        let script = parse_script("ffswss").unwrap();
        let report = run(config, "llm", &script, 1_000, false).await;

        let results: Vec<_> = report.calls.iter().map(|c| c.result.as_str()).collect();
        assert_eq!(
            results,
            vec!["error: simulated failure", "error: simulated failure", "rejected", "live", "live"]
        );
        assert_eq!(report.stats.state, CircuitState::Closed);
        assert_eq!(report.stats.rejected_requests, 1);
        assert_eq!(report.history.len(), 3);
    }

    #[tokio::test]
    async fn fallback_masks_failures() {
        let config = RegistryConfig {
            defaults: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let report = run(config, "rag", &parse_script("ff").unwrap(), 0, true).await;
        assert!(report.calls.iter().all(|c| c.result == "fallback"));
        assert_eq!(report.stats.state, CircuitState::Open);
    }
}
