//! Three-state circuit breaker guarding one named dependency.
//!
//! State transitions:
//! - `Closed` → `Open`:      consecutive failures reach `failure_threshold`
//! - `Open` → `HalfOpen`:    `reset_timeout` has elapsed (checked on the next call)
//! - `HalfOpen` → `Closed`:  consecutive probe successes reach `success_threshold`
//! - `HalfOpen` → `Open`:    any probe fails
//! - any → `Closed`:         manual [`CircuitBreaker::reset`]
//!
//! The mutable state sits behind one mutex. It is taken once to decide whether
//! a call may run and once to record its outcome, never across the operation
//! itself, so concurrent calls to a healthy dependency run in parallel.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{BreakerError, CircuitOpenError};
use crate::state::{
    CircuitBreakerStats, CircuitState, StateChangeEvent, StateChangeListener, StateTransition,
};

/// Maximum number of transitions kept per breaker.
pub const HISTORY_LIMIT: usize = 100;

// Used when `now + reset_timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A moment recorded on both clocks: monotonic for decisions, wall for reporting.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Stamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn after(delay: Duration) -> Self {
        let now = Self::now();
        let at = now
            .at
            .checked_add(delay)
            .unwrap_or_else(|| now.at + FAR_FUTURE);
        let wall = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.wall.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { at, wall }
    }
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Stamp>,
    last_success: Option<Stamp>,
    next_attempt: Option<Stamp>,
    total_requests: u64,
    rejected_requests: u64,
    probes_in_flight: u32,
    // Bumped by `reset` so slots taken before it don't release into the new count.
    probe_epoch: u64,
    history: VecDeque<StateTransition>,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
            total_requests: 0,
            rejected_requests: 0,
            probes_in_flight: 0,
            probe_epoch: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    fn push_history(&mut self, transition: StateTransition) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(transition);
    }
}

enum Admission {
    Run { probe: bool },
    Reject,
}

/// Holds one half-open probe slot. Released explicitly when the outcome is
/// recorded, or on drop if the call is cancelled first.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    armed: bool,
}

impl ProbeSlot<'_> {
    fn release(&mut self, inner: &mut CircuitInner) {
        if self.armed && inner.probe_epoch == self.epoch {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        self.armed = false;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let breaker = self.breaker;
            let mut inner = breaker.lock();
            self.release(&mut inner);
        }
    }
}

/// Thread-safe circuit breaker for a single dependency.
///
/// Usually obtained from a [`BreakerRegistry`](crate::BreakerRegistry) and
/// shared as `Arc<CircuitBreaker>`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl CircuitBreaker {
    /// Create a new breaker in `Closed` state.
    ///
    /// Zero thresholds or a zero probe cap would leave the breaker unable to
    /// leave a state, so they are raised to 1 (see
    /// [`CircuitBreakerConfig::normalized`]) and a warning is logged.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        if let Err(e) = config.validate() {
            warn!(service = %name, error = %e, "Invalid breaker config, zero values raised to 1");
        }
        let config = config.normalized();
        debug!(service = %name, ?config, "Circuit breaker created");
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the circuit allows it.
    ///
    /// Returns [`BreakerError::Open`] without invoking `operation` while the
    /// circuit is open, and [`BreakerError::Operation`] with the operation's
    /// own error when it fails.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, None::<fn() -> std::future::Ready<Result<T, E>>>)
            .await
    }

    /// Like [`execute`](Self::execute), but substitutes `fallback` whenever the
    /// call is rejected or the operation fails.
    pub async fn execute_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        self.run(operation, Some(fallback)).await
    }

    async fn run<T, E, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: Option<G>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        let (admission, epoch, events) = {
            let mut inner = self.lock();
            let mut events = Vec::new();
            let admission = self.admit(&mut inner, &mut events);
            (admission, inner.probe_epoch, events)
        };
        self.notify(events);

        let mut slot = match admission {
            Admission::Reject => {
                debug!(service = %self.name, "Circuit open, call rejected");
                return match fallback {
                    Some(fallback) => fallback().await.map_err(BreakerError::Fallback),
                    None => Err(CircuitOpenError {
                        service: self.name.clone(),
                    }
                    .into()),
                };
            }
            Admission::Run { probe } => probe.then(|| ProbeSlot {
                breaker: self,
                epoch,
                armed: true,
            }),
        };

        let outcome = operation().await;

        let events = {
            let mut inner = self.lock();
            let mut events = Vec::new();
            match &outcome {
                Ok(_) => self.on_success(&mut inner, &mut events),
                Err(_) => self.on_failure(&mut inner, &mut events),
            }
            if let Some(slot) = slot.as_mut() {
                slot.release(&mut inner);
            }
            events
        };
        drop(slot);
        self.notify(events);

        match outcome {
            Ok(value) => Ok(value),
            Err(e) => match fallback {
                Some(fallback) => fallback().await.map_err(BreakerError::Fallback),
                None => Err(BreakerError::Operation(e)),
            },
        }
    }

    /// Decide whether a call may run. Counts the request either way.
    fn admit(&self, inner: &mut CircuitInner, events: &mut Vec<StateChangeEvent>) -> Admission {
        inner.total_requests = inner.total_requests.saturating_add(1);

        match inner.state {
            CircuitState::Closed => Admission::Run { probe: false },
            CircuitState::HalfOpen => self.admit_probe(inner),
            CircuitState::Open => {
                let eligible = inner
                    .next_attempt
                    .map_or(true, |next| Instant::now() >= next.at);
                if !eligible {
                    inner.rejected_requests = inner.rejected_requests.saturating_add(1);
                    return Admission::Reject;
                }
                inner.consecutive_successes = 0;
                self.transition(inner, CircuitState::HalfOpen, "Reset timeout elapsed", events);
                self.admit_probe(inner)
            }
        }
    }

    fn admit_probe(&self, inner: &mut CircuitInner) -> Admission {
        if let Some(max) = self.config.half_open_max_probes {
            if inner.probes_in_flight >= max {
                inner.rejected_requests = inner.rejected_requests.saturating_add(1);
                debug!(
                    service = %self.name,
                    in_flight = inner.probes_in_flight,
                    max,
                    "Half-open probe limit reached"
                );
                return Admission::Reject;
            }
        }
        inner.probes_in_flight += 1;
        Admission::Run { probe: true }
    }

    /// Applied against the state at record time: a call admitted while closed
    /// that finishes during half-open counts toward `success_threshold`.
    fn on_success(&self, inner: &mut CircuitInner, events: &mut Vec<StateChangeEvent>) {
        inner.success_count = inner.success_count.saturating_add(1);
        inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
        inner.consecutive_failures = 0;
        inner.last_success = Some(Stamp::now());

        if inner.state == CircuitState::HalfOpen {
            debug!(
                service = %self.name,
                successes = inner.consecutive_successes,
                threshold = self.config.success_threshold,
                "Probe succeeded"
            );
            if inner.consecutive_successes >= self.config.success_threshold {
                let reason = format!(
                    "Recovered after {} successful probes",
                    inner.consecutive_successes
                );
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.next_attempt = None;
                self.transition(inner, CircuitState::Closed, &reason, events);
            }
        }
    }

    fn on_failure(&self, inner: &mut CircuitInner, events: &mut Vec<StateChangeEvent>) {
        let now = Stamp::now();
        if let Some(last) = inner.last_failure {
            if now.at.saturating_duration_since(last.at) > self.config.monitoring_window()
                && inner.consecutive_failures > 0
            {
                debug!(
                    service = %self.name,
                    stale = inner.consecutive_failures,
                    "Previous failures outside monitoring window, streak restarted"
                );
                inner.consecutive_failures = 0;
            }
        }

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.consecutive_successes = 0;
        inner.last_failure = Some(now);

        debug!(
            service = %self.name,
            failures = inner.consecutive_failures,
            threshold = self.config.failure_threshold,
            "Failure recorded"
        );

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                let reason = format!(
                    "Failure threshold reached ({} consecutive failures)",
                    inner.consecutive_failures
                );
                self.trip(inner, &reason, events);
            }
            CircuitState::HalfOpen => self.trip(inner, "Probe failed", events),
            _ => {}
        }
    }

    fn trip(&self, inner: &mut CircuitInner, reason: &str, events: &mut Vec<StateChangeEvent>) {
        inner.next_attempt = Some(Stamp::after(self.config.reset_timeout()));
        self.transition(inner, CircuitState::Open, reason, events);
    }

    fn transition(
        &self,
        inner: &mut CircuitInner,
        to: CircuitState,
        reason: &str,
        events: &mut Vec<StateChangeEvent>,
    ) {
        let from = inner.state;
        inner.state = to;
        let record = StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        };

        match to {
            CircuitState::Open => warn!(
                service = %self.name,
                %from,
                failures = inner.consecutive_failures,
                retry_at = ?inner.next_attempt.map(|s| s.wall),
                reason,
                "Circuit breaker → open"
            ),
            _ => info!(service = %self.name, %from, %to, reason, "Circuit breaker → {to}"),
        }

        events.push(StateChangeEvent::new(&self.name, &record));
        inner.push_history(record);
    }

    /// Force the breaker back to `Closed` and clear every counter.
    pub fn reset(&self) {
        let events = {
            let mut inner = self.lock();
            let from = inner.state;
            let history = std::mem::take(&mut inner.history);
            let probe_epoch = inner.probe_epoch.wrapping_add(1);
            *inner = CircuitInner {
                state: from,
                probe_epoch,
                history,
                ..CircuitInner::new()
            };
            let mut events = Vec::new();
            self.transition(&mut inner, CircuitState::Closed, "Manual reset", &mut events);
            events
        };
        self.notify(events);
    }

    /// Current state. Does not move an expired open circuit to half-open;
    /// that only happens when a call arrives.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns `true` if a call made now would be let through to the operation,
    /// ignoring the half-open probe cap.
    pub fn is_allowed(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => inner
                .next_attempt
                .map_or(true, |next| Instant::now() >= next.at),
            _ => true,
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_time: inner.last_failure.map(|s| s.wall),
            last_success_time: inner.last_success.map(|s| s.wall),
            next_attempt_time: inner.next_attempt.map(|s| s.wall),
            total_requests: inner.total_requests,
            rejected_requests: inner.rejected_requests,
            probes_in_flight: inner.probes_in_flight,
        }
    }

    /// Transition history, oldest first. At most [`HISTORY_LIMIT`] entries.
    pub fn history(&self) -> Vec<StateTransition> {
        self.lock().history.iter().cloned().collect()
    }

    /// Register an observer for state transitions.
    ///
    /// Listeners run synchronously on the calling task after the breaker's
    /// lock is released. A panicking listener is logged and skipped.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.add_listener(std::sync::Arc::new(listener));
    }

    pub(crate) fn add_listener(&self, listener: StateChangeListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, events: Vec<StateChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in &events {
            for listener in &listeners {
                if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                    error!(
                        service = %self.name,
                        from = %event.from,
                        to = %event.to,
                        "State change listener panicked"
                    );
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
