//! Named collection of circuit breakers, one per dependency.
//!
//! Breakers are created lazily on first lookup and live as long as the
//! registry. The registry is a plain value: build one at startup and hand
//! it (usually as `Arc<BreakerRegistry>`) to whatever needs it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::breaker::CircuitBreaker;
use crate::config::{CircuitBreakerConfig, RegistryConfig};
use crate::state::{CircuitBreakerStats, CircuitState, StateChangeEvent, StateChangeListener};

/// Lookup-or-create registry of per-service circuit breakers.
#[derive(Default)]
pub struct BreakerRegistry {
    config: RegistryConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl BreakerRegistry {
    /// Registry whose breakers all start from `defaults`.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::from_config(RegistryConfig {
            defaults,
            services: HashMap::new(),
        })
    }

    /// Registry with defaults plus per-service overrides.
    pub fn from_config(config: RegistryConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the breaker for `name`, creating it on first use.
    ///
    /// `config` only matters when the breaker does not exist yet; otherwise it
    /// is ignored and the existing breaker keeps the config it was built with.
    /// Without `config`, a per-service override or the registry defaults apply.
    pub fn get_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.read().get(name) {
            return existing.clone();
        }

        // Lock order: listeners, then breakers (same as `on_state_change`).
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks.
        if let Some(existing) = breakers.get(name) {
            return existing.clone();
        }

        let config = config.unwrap_or_else(|| self.config.for_service(name));
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        for listener in listeners.iter() {
            breaker.add_listener(listener.clone());
        }
        info!(service = %name, "Circuit breaker registered");
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Existing breaker for `name`, without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stats snapshot of every registered breaker, keyed by name.
    pub fn get_all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.snapshot()
            .into_iter()
            .map(|b| (b.name().to_string(), b.stats()))
            .collect()
    }

    /// Names of breakers that are not `Closed`, sorted.
    pub fn unhealthy_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|b| b.state() != CircuitState::Closed)
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Reset one breaker. Returns `false` if no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    /// Attach a listener to every current breaker and every breaker created later.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        let listener: StateChangeListener = Arc::new(listener);
        // Held across the fan-out: a breaker created concurrently is either in
        // the snapshot or picks the listener up from the list.
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for breaker in self.snapshot() {
            breaker.add_listener(listener.clone());
        }
        listeners.push(listener);
    }

    // Clone the Arcs out so breaker calls never run under the map lock.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("services", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        }
    }

    async fn trip(b: &CircuitBreaker) {
        let _ = b.execute(|| async { Err::<(), _>("down") }).await;
    }

    #[test]
    fn lazily_creates_with_defaults() {
        let reg = BreakerRegistry::default();
        assert!(reg.is_empty());
        let b = reg.get_breaker("llm", None);
        assert_eq!(b.config(), &CircuitBreakerConfig::default());
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("llm"));
        assert!(reg.get("cache").is_none());
    }

    #[test]
    fn same_name_same_instance_and_config_fixed() {
        let reg = BreakerRegistry::default();
        let a = reg.get_breaker("rag", Some(tight()));
        let b = reg.get_breaker("rag", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold, 1);
    }

    #[test]
    fn caller_config_with_zero_values_is_raised() {
        let reg = BreakerRegistry::default();
        let b = reg.get_breaker(
            "rag",
            Some(CircuitBreakerConfig {
                failure_threshold: 0,
                success_threshold: 0,
                half_open_max_probes: Some(0),
                ..Default::default()
            }),
        );
        assert_eq!(b.config().failure_threshold, 1);
        assert_eq!(b.config().success_threshold, 1);
        assert_eq!(b.config().half_open_max_probes, Some(1));
        assert!(b.config().validate().is_ok());
    }

    #[test]
    fn per_service_override_applies() {
        let mut config = RegistryConfig::default();
        config.services.insert("llm".into(), tight());
        let reg = BreakerRegistry::from_config(config);
        assert_eq!(reg.get_breaker("llm", None).config().failure_threshold, 1);
        assert_eq!(reg.get_breaker("cache", None).config().failure_threshold, 5);
    }

    #[tokio::test]
    async fn unhealthy_and_reset() {
        let reg = BreakerRegistry::new(tight());
        trip(&reg.get_breaker("b", None)).await;
        trip(&reg.get_breaker("a", None)).await;
        reg.get_breaker("c", None);

        assert_eq!(reg.unhealthy_services(), vec!["a", "b"]);
        assert!(reg.reset("a"));
        assert!(!reg.reset("missing"));
        assert_eq!(reg.unhealthy_services(), vec!["b"]);

        reg.reset_all();
        assert!(reg.unhealthy_services().is_empty());
        assert_eq!(reg.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn all_stats_cover_every_breaker() {
        let reg = BreakerRegistry::new(tight());
        trip(&reg.get_breaker("llm", None)).await;
        reg.get_breaker("cache", None);

        let stats = reg.get_all_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["llm"].state, CircuitState::Open);
        assert_eq!(stats["cache"].total_requests, 0);
    }
}
