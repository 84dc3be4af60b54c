//! Fee rate resolution across unreliable providers
//!
//! [`FeeProviderChain`] asks each configured [`FeeSource`] in priority
//! order, each call guarded by that provider's circuit breaker. The first
//! response that converts and validates wins. When every provider fails,
//! the chain answers with the static low-confidence rates, so
//! [`get_fee_estimate`](FeeProviderChain::get_fee_estimate) has no error
//! path at all.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use bitvault_fees::{EngineConfig, BreakerRegistry, FeeProviderChain};
//! # use bitvault_fees::fee_provider::MempoolSpaceSource;
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let registry = Arc::new(BreakerRegistry::from_engine_config(&config));
//! let chain = FeeProviderChain::new(&config, registry)
//!     .with_source(Arc::new(MempoolSpaceSource::new(MempoolSpaceSource::DEFAULT_BASE_URL)?));
//!
//! let estimate = chain.get_fee_estimate().await;
//! println!("{} sat/vB from {}", estimate.recommended_fee, estimate.source);
//! # Ok(())
//! # }
//! ```

use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::circuit_breaker::{backoff_delay, BreakerError, BreakerMetrics, BreakerRegistry, CircuitBreaker};
use crate::config::{EngineConfig, ProviderChainConfig, StaticFallbackRates};
use crate::logging::{log_fees, LogLevel};

pub mod sources;
pub mod types;
pub mod validation;

pub use sources::{FeeSource, MempoolSpaceSource, QuickNodeSource, StaticSource};
pub use types::{FeeConfidence, FeeEstimate, MempoolFees, ProviderError, RawFeeResponse, SmartFeeResponse};
pub use validation::FeeValidator;

struct Provider {
    source: Arc<dyn FeeSource>,
    breaker: Arc<CircuitBreaker>,
}

/// Ordered fee providers with breaker protection and a static floor
pub struct FeeProviderChain {
    providers: Vec<Provider>,
    registry: Arc<BreakerRegistry>,
    validator: FeeValidator,
    static_rates: StaticFallbackRates,
    retry: ProviderChainConfig,
    last_known: Mutex<Option<FeeEstimate>>,
}

impl FeeProviderChain {
    /// Empty chain; add providers with [`with_source`](Self::with_source)
    pub fn new(config: &EngineConfig, registry: Arc<BreakerRegistry>) -> Self {
        Self {
            providers: Vec::new(),
            registry,
            validator: FeeValidator::new(config.fee_validation.clone()),
            static_rates: config.static_fallback,
            retry: config.provider_chain.clone(),
            last_known: Mutex::new(None),
        }
    }

    /// mempool.space first, then QuickNode when an endpoint is given
    pub fn standard(
        config: &EngineConfig,
        registry: Arc<BreakerRegistry>,
        mempool_base_url: &str,
        quicknode_endpoint: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let mut chain =
            Self::new(config, registry).with_source(Arc::new(MempoolSpaceSource::new(mempool_base_url)?));
        if let Some(endpoint) = quicknode_endpoint {
            chain = chain.with_source(Arc::new(QuickNodeSource::new(endpoint)?));
        }
        Ok(chain)
    }

    /// Append a provider at the lowest priority
    ///
    /// Its breaker comes from the shared registry, keyed by the source name.
    pub fn with_source(mut self, source: Arc<dyn FeeSource>) -> Self {
        let breaker = self.registry.get_or_create(source.name());
        self.providers.push(Provider { source, breaker });
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.source.name()).collect()
    }

    pub fn breaker_metrics(&self) -> Vec<BreakerMetrics> {
        self.providers.iter().map(|p| p.breaker.metrics()).collect()
    }

    pub fn static_rates(&self) -> &StaticFallbackRates {
        &self.static_rates
    }

    /// Last estimate accepted from a live provider
    pub fn last_known_estimate(&self) -> Option<FeeEstimate> {
        self.last_known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Static low-confidence estimate listing the failures that led to it
    pub fn static_fallback(&self, errors: Vec<String>) -> FeeEstimate {
        FeeEstimate::from_static(&self.static_rates, errors)
    }

    /// Best available estimate; never fails
    pub async fn get_fee_estimate(&self) -> FeeEstimate {
        let mut errors: Vec<String> = Vec::new();

        for (position, provider) in self.providers.iter().enumerate() {
            let name = provider.source.name();
            match self.query(provider).await {
                Ok(mut estimate) => {
                    estimate.fallback_used = position > 0;
                    estimate.errors = errors;
                    self.remember(&estimate);
                    log_fees(
                        LogLevel::Info,
                        "estimate accepted",
                        Some(json!({
                            "source": estimate.source,
                            "recommended_fee": estimate.recommended_fee,
                            "confidence": estimate.confidence.as_str(),
                            "fallback_used": estimate.fallback_used,
                        })),
                    );
                    return estimate;
                }
                Err(err) => {
                    warn!("Fee provider {} failed: {}", name, err);
                    errors.push(format!("{}: {}", name, err));
                }
            }
        }

        warn!(
            "All {} fee providers failed, using static rates",
            self.providers.len()
        );
        let estimate = self.static_fallback(errors);
        log_fees(
            LogLevel::Warn,
            "static fallback",
            Some(json!({
                "recommended_fee": estimate.recommended_fee,
                "errors": estimate.errors,
            })),
        );
        estimate
    }

    async fn query(&self, provider: &Provider) -> Result<FeeEstimate, BreakerError<ProviderError>> {
        let source = &provider.source;
        let mut attempt: u32 = 0;

        loop {
            let result = provider
                .breaker
                .execute(|| async {
                    let raw = source.fetch().await?;
                    debug!("{} answered with a {} payload", source.name(), raw.kind());
                    let mut estimate = raw.into_estimate(source.name())?;
                    estimate.confidence = estimate.confidence.min(source.confidence());
                    self.validator.validate(&estimate)?;
                    Ok::<_, ProviderError>(estimate)
                })
                .await;

            match result {
                Ok(estimate) => return Ok(estimate),
                Err(err) if err.is_rejection() || attempt >= self.retry.max_retries => {
                    return Err(err)
                }
                Err(err) => {
                    let delay = backoff_delay(
                        attempt,
                        self.retry.retry_base_delay(),
                        self.retry.retry_max_delay(),
                    );
                    debug!(
                        "Retrying {} in {:?} after: {}",
                        source.name(),
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn remember(&self, estimate: &FeeEstimate) {
        let mut last_known = self.last_known.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = last_known.as_ref() {
            self.validator.check_dramatic_change(previous, estimate);
        } else {
            info!(
                "First live fee estimate: {} sat/vB from {}",
                estimate.recommended_fee, estimate.source
            );
        }
        *last_known = Some(estimate.clone());
    }
}
