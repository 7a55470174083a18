//! Error types for protected calls and configuration loading.

use thiserror::Error;

/// The breaker refused to run the operation because the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker open for service: {service}")]
pub struct CircuitOpenError {
    /// Name of the dependency whose circuit is open.
    pub service: String,
}

/// Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
///
/// `E` is the error type of the protected operation. It is carried through
/// unchanged so callers can still match on their own failures.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The protected operation ran and failed.
    #[error("{0}")]
    Operation(E),

    /// The fallback ran and failed.
    #[error("fallback failed: {0}")]
    Fallback(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected by an open circuit.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// Returns the operation's or fallback's own error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Operation(e) | Self::Fallback(e) => Some(e),
            Self::Open(_) => None,
        }
    }
}

/// Errors raised while loading or validating breaker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for the expected shape.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the breaker cannot work with.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
