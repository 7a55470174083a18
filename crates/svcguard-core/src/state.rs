//! Circuit state, transition records and stats snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Calls are rejected or routed to the fallback until the reset timeout elapses.
    Open,
    /// Trial calls are let through to test whether the dependency recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// One entry of a breaker's transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Payload delivered to state-change listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub breaker_name: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl StateChangeEvent {
    pub(crate) fn new(breaker_name: &str, transition: &StateTransition) -> Self {
        Self {
            breaker_name: breaker_name.to_string(),
            from: transition.from,
            to: transition.to,
            reason: transition.reason.clone(),
            timestamp: transition.timestamp,
        }
    }
}

/// Observer invoked synchronously after every state transition.
pub type StateChangeListener = Arc<dyn Fn(&StateChangeEvent) + Send + Sync>;

/// Point-in-time snapshot of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Lifetime failures; cleared only by a manual reset.
    pub failure_count: u64,
    /// Lifetime successes; cleared only by a manual reset.
    pub success_count: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// When an open circuit will admit its next probe.
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub probes_in_flight: u32,
}
