//! Named breaker registry
//!
//! Exactly one breaker exists per name for the lifetime of a registry,
//! even when callers race to create it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig};
use crate::config::EngineConfig;

#[derive(Debug, Default)]
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry using the engine's default breaker and per-name overrides
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self {
            default_config: config.default_breaker.clone(),
            overrides: config.breakers.clone(),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration a new breaker with this name would get
    pub fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Breaker for `name`, created from the registry's configuration if needed
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self.config_for(name);
        self.get_or_create_with(name, config)
    }

    /// Breaker for `name`, created with `config` if needed
    ///
    /// An existing breaker keeps the configuration it was created with.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(name) {
            if existing.config() != &config {
                debug!(
                    "Breaker '{}' already exists; ignoring new configuration",
                    name
                );
            }
            return Arc::clone(existing);
        }

        debug!("Creating circuit breaker '{}'", name);
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Metrics of every breaker, sorted by name
    pub fn metrics(&self) -> Vec<BreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> = self.lock().values().cloned().collect();
        let mut metrics: Vec<BreakerMetrics> = breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self.lock().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
