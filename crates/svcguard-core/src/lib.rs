//! svcguard-core — per-dependency circuit breakers.
//!
//! # Overview
//!
//! Protects calls to unreliable external services (LLM providers, vector
//! stores, caches) from cascading failure. The crate defines:
//!
//! - [`CircuitBreaker`] — Closed/Open/HalfOpen state machine for one dependency
//! - [`BreakerRegistry`] — lazily-populated map of breakers keyed by service name
//! - [`CircuitBreakerConfig`] / [`RegistryConfig`] — thresholds and timeouts
//! - [`BreakerError`] / [`CircuitOpenError`] — structured error types
//! - [`StateChangeEvent`] — payload for transition listeners
//!
//! ```no_run
//! # async fn call_llm() -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn demo() {
//! use svcguard_core::BreakerRegistry;
//!
//! let registry = BreakerRegistry::default();
//! let llm = registry.get_breaker("llm", None);
//! let answer = llm
//!     .execute_with_fallback(call_llm, || async { Ok("service busy".to_string()) })
//!     .await;
//! # let _ = answer;
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;

pub use breaker::{CircuitBreaker, HISTORY_LIMIT};
pub use config::{CircuitBreakerConfig, RegistryConfig};
pub use error::{BreakerError, CircuitOpenError, ConfigError};
pub use registry::BreakerRegistry;
pub use state::{
    CircuitBreakerStats, CircuitState, StateChangeEvent, StateChangeListener, StateTransition,
};
