//! Structured log events for breaker state changes.

use svcguard_core::{BreakerRegistry, CircuitState, StateChangeEvent};

/// State-change listener that writes one structured event per transition.
///
/// Openings log at `warn`, everything else at `info`. All events carry the
/// same fields (`service`, `from`, `to`, `reason`, `at`) so downstream
/// alerting can match on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionLogger;

impl TransitionLogger {
    pub fn log(&self, event: &StateChangeEvent) {
        let at = event.timestamp.to_rfc3339();
        if event.to == CircuitState::Open {
            tracing::warn!(
                target: "svcguard::transitions",
                service = %event.breaker_name,
                from = %event.from,
                to = %event.to,
                reason = %event.reason,
                at = %at,
                "dependency circuit opened"
            );
        } else {
            tracing::info!(
                target: "svcguard::transitions",
                service = %event.breaker_name,
                from = %event.from,
                to = %event.to,
                reason = %event.reason,
                at = %at,
                "dependency circuit changed state"
            );
        }
    }
}

/// Log every transition of every breaker in `registry`, including breakers
/// created after this call.
pub fn attach_transition_logger(registry: &BreakerRegistry) {
    let logger = TransitionLogger;
    registry.on_state_change(move |event| logger.log(event));
}

/// Emit one `warn` event per breaker that is not closed. Returns how many.
pub fn log_health_summary(registry: &BreakerRegistry) -> usize {
    let mut unhealthy = 0;
    for (name, stats) in registry.get_all_stats() {
        if stats.state == CircuitState::Closed {
            continue;
        }
        unhealthy += 1;
        tracing::warn!(
            target: "svcguard::health",
            service = %name,
            state = %stats.state,
            consecutive_failures = stats.consecutive_failures,
            rejected = stats.rejected_requests,
            next_attempt = ?stats.next_attempt_time,
            "dependency unhealthy"
        );
    }
    unhealthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use svcguard_core::CircuitBreakerConfig;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn captured<F: FnOnce()>(f: F) -> String {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .with_writer(capture.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = capture.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn open_transition_is_logged_as_warning() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        attach_transition_logger(&registry);
        let breaker = registry.get_breaker("llm", None);

        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(capture.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let line = out
            .lines()
            .find(|l| l.contains("dependency circuit opened"))
            .expect("no transition event");
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["level"], "WARN");
        assert_eq!(v["fields"]["service"], "llm");
        assert_eq!(v["fields"]["from"], "closed");
        assert_eq!(v["fields"]["to"], "open");
    }

    #[test]
    fn manual_reset_is_logged_as_info() {
        let registry = BreakerRegistry::default();
        attach_transition_logger(&registry);
        let breaker = registry.get_breaker("cache", None);

        let out = captured(|| breaker.reset());
        assert!(out.contains("dependency circuit changed state"), "{out}");
        assert!(out.contains("Manual reset"), "{out}");
        assert!(out.contains("\"level\":\"INFO\""), "{out}");
    }

    #[tokio::test]
    async fn health_summary_counts_open_breakers() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        registry.get_breaker("cache", None);
        let rag = registry.get_breaker("rag", None);
        let _ = rag.execute(|| async { Err::<(), _>("timeout") }).await;

        let mut count = 0;
        let out = captured(|| count = log_health_summary(&registry));
        assert_eq!(count, 1);
        assert!(out.contains("\"service\":\"rag\""), "{out}");
        assert!(!out.contains("\"service\":\"cache\""), "{out}");
    }
}
