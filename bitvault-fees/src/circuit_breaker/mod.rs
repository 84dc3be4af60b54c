//! Circuit breaker for unreliable upstream calls
//!
//! A [`CircuitBreaker`] wraps async operations with a timeout and stops
//! calling a dependency that keeps failing:
//!
//! ```text
//! CLOSED --(failures in window >= threshold)--> OPEN
//! OPEN --(recovery timeout elapsed, next call)--> HALF_OPEN
//! HALF_OPEN --(success_threshold successes)--> CLOSED
//! HALF_OPEN --(any failure)--> OPEN
//! any --(fatal signal)--> PERMANENTLY_OPEN   (only reset() leaves it)
//! ```
//!
//! State lives behind a mutex that is never held across an await, so
//! concurrent `execute` calls apply their outcomes atomically. Each call
//! remembers the epoch it was admitted in; the epoch advances on every
//! transition and on [`reset`](CircuitBreaker::reset), and outcomes from
//! an older epoch only update metrics, never state.
//!
//! Timing uses `tokio::time::Instant`, so tests can drive the breaker
//! with a paused clock.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::logging::{log_breaker, LogLevel};

pub mod registry;

pub use registry::BreakerRegistry;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// Trial calls pass through to test recovery
    HalfOpen,
    /// Calls are rejected until an administrative reset
    PermanentlyOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::PermanentlyOpen => "PERMANENTLY_OPEN",
        }
    }
}

/// Breaker tunables
///
/// Durations are stored in milliseconds so the struct maps directly onto
/// TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window that open the circuit
    pub failure_threshold: u32,
    /// Half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub recovery_timeout_ms: u64,
    /// Per-call timeout
    pub timeout_ms: u64,
    /// Length of the rolling failure window
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::api()
    }
}

impl CircuitBreakerConfig {
    /// Preset for external HTTP APIs
    pub fn api() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout_ms: 30_000,
            timeout_ms: 10_000,
            monitoring_period_ms: 60_000,
        }
    }

    /// Preset for latency-sensitive price/fee services
    pub fn price_service() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
            timeout_ms: 5_000,
            monitoring_period_ms: 60_000,
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_string());
        }
        if self.monitoring_period_ms == 0 {
            return Err("monitoring_period_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Errors an operation can report to its breaker
///
/// Operations signal a fatal, non-recoverable condition (such as an
/// upstream legal block) by returning a reason; the breaker then opens
/// permanently instead of counting an ordinary failure.
pub trait BreakerFailure {
    fn permanent_reason(&self) -> Option<String> {
        None
    }
}

impl BreakerFailure for String {}

impl BreakerFailure for anyhow::Error {}

/// Outcome of a call that did not produce a value
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("Circuit breaker '{name}' is open; retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    #[error("Circuit breaker '{name}' is permanently open: {reason}")]
    PermanentlyOpen { name: String, reason: String },

    #[error("Operation through circuit breaker '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Stable machine-readable identifier
    pub fn kind(&self) -> &'static str {
        match self {
            BreakerError::Open { .. } => "circuit_breaker_open",
            BreakerError::PermanentlyOpen { .. } => "circuit_breaker_permanently_open",
            BreakerError::Timeout { .. } => "circuit_breaker_timeout",
            BreakerError::Operation(_) => "operation_failed",
        }
    }

    /// Whether the call was refused without running the operation
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open { .. } | BreakerError::PermanentlyOpen { .. })
    }

    /// Replace the operation error, keeping breaker-level variants
    pub fn map_operation<F>(self, f: impl FnOnce(E) -> F) -> BreakerError<F> {
        match self {
            BreakerError::Open { name, retry_in } => BreakerError::Open { name, retry_in },
            BreakerError::PermanentlyOpen { name, reason } => {
                BreakerError::PermanentlyOpen { name, reason }
            }
            BreakerError::Timeout { name, after } => BreakerError::Timeout { name, after },
            BreakerError::Operation(e) => BreakerError::Operation(f(e)),
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Failures currently inside the monitoring window
    pub failures_in_window: usize,
    pub request_count: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    pub avg_response_time_ms: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// When the circuit last opened, while it is open
    pub opened_at: Option<DateTime<Utc>>,
    /// Remaining wait before a trial call, when open
    pub retry_in_ms: Option<u64>,
    pub permanent_reason: Option<String>,
    pub is_healthy: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    permanent_reason: Option<String>,
    epoch: u64,
    request_count: u64,
    total_successes: u64,
    total_failures: u64,
    total_timeouts: u64,
    total_rejections: u64,
    total_response_time: Duration,
    timed_calls: u64,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            half_open_successes: 0,
            opened_at: None,
            opened_at_utc: None,
            permanent_reason: None,
            epoch: 0,
            request_count: 0,
            total_successes: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_rejections: 0,
            total_response_time: Duration::ZERO,
            timed_calls: 0,
            last_failure: None,
            last_success: None,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn record_timing(&mut self, elapsed: Duration) {
        self.total_response_time += elapsed;
        self.timed_calls += 1;
    }
}

/// Circuit breaker guarding one upstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, without triggering the OPEN to HALF_OPEN check
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures currently counted in the rolling window
    pub fn failures_in_window(&self) -> usize {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.config.monitoring_period());
        inner.failures.len()
    }

    /// Run `operation` through the breaker
    ///
    /// The operation is not started when the circuit is open. Otherwise it
    /// races the configured timeout; losing the race counts as a failure
    /// and the operation's future is dropped, so a late result never
    /// reaches the caller or the breaker.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: BreakerFailure,
    {
        let epoch = self.admit()?;
        let started = Instant::now();

        match tokio::time::timeout(self.config.timeout(), operation()).await {
            Ok(Ok(value)) => {
                self.on_success(epoch, started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                match err.permanent_reason() {
                    Some(reason) => {
                        self.lock().total_failures += 1;
                        self.trip_permanently(reason);
                    }
                    None => self.on_failure(epoch, started.elapsed(), false),
                }
                Err(BreakerError::Operation(err))
            }
            Err(_) => {
                self.on_failure(epoch, started.elapsed(), true);
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: self.config.timeout(),
                })
            }
        }
    }

    fn admit<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.request_count += 1;

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(inner.epoch),
            CircuitState::PermanentlyOpen => {
                inner.total_rejections += 1;
                Err(BreakerError::PermanentlyOpen {
                    name: self.name.clone(),
                    reason: inner
                        .permanent_reason
                        .clone()
                        .unwrap_or_else(|| "disabled".to_string()),
                })
            }
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let waited = now.saturating_duration_since(opened_at);
                let recovery = self.config.recovery_timeout();
                if waited >= recovery {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    Ok(inner.epoch)
                } else {
                    inner.total_rejections += 1;
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_in: recovery - waited,
                    })
                }
            }
        }
    }

    fn on_success(&self, epoch: u64, elapsed: Duration) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.last_success = Some(Utc::now());
        inner.record_timing(elapsed);

        if inner.epoch != epoch {
            debug!("[{}] Discarding success from a superseded call", self.name);
            return;
        }

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                info!("[{}] Recovery successful, closing circuit", self.name);
                self.transition(&mut inner, CircuitState::Closed, Instant::now());
            }
        }
    }

    fn on_failure(&self, epoch: u64, elapsed: Duration, timed_out: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.total_failures += 1;
        if timed_out {
            inner.total_timeouts += 1;
        }
        inner.last_failure = Some(Utc::now());
        inner.record_timing(elapsed);

        if inner.epoch != epoch {
            debug!("[{}] Discarding failure from a superseded call", self.name);
            return;
        }

        match inner.state {
            CircuitState::HalfOpen => {
                warn!("[{}] Recovery trial failed, reopening circuit", self.name);
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                inner.prune(now, self.config.monitoring_period());
                let in_window = inner.failures.len();
                debug!(
                    "[{}] Failure recorded ({}/{})",
                    self.name, in_window, self.config.failure_threshold
                );
                if in_window >= self.config.failure_threshold as usize {
                    warn!(
                        "[{}] Circuit opened after {} failures in {:?}",
                        self.name,
                        in_window,
                        self.config.monitoring_period()
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::Open | CircuitState::PermanentlyOpen => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.epoch += 1;

        match to {
            CircuitState::Closed => {
                inner.failures.clear();
                inner.half_open_successes = 0;
                inner.opened_at = None;
                inner.opened_at_utc = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.opened_at_utc = Some(Utc::now());
                inner.half_open_successes = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
            }
            CircuitState::PermanentlyOpen => {}
        }

        log_breaker(
            LogLevel::Info,
            "state changed",
            Some(json!({
                "breaker": self.name,
                "from": from.as_str(),
                "to": to.as_str(),
            })),
        );
    }

    /// Open the circuit for good, e.g. after an upstream legal block
    pub fn trip_permanently(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.lock();
        error!("[{}] Circuit permanently disabled: {}", self.name, reason);
        inner.permanent_reason = Some(reason);
        self.transition(&mut inner, CircuitState::PermanentlyOpen, Instant::now());
    }

    /// Return to CLOSED with cleared counters
    ///
    /// Administrative action; calls in flight when this runs cannot
    /// affect the new state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.permanent_reason = None;
        inner.failures.clear();
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
        info!("[{}] Circuit breaker reset", self.name);
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.prune(now, self.config.monitoring_period());

        let avg_response_time_ms = if inner.timed_calls == 0 {
            0
        } else {
            (inner.total_response_time.as_millis() / u128::from(inner.timed_calls)) as u64
        };

        let retry_in_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .recovery_timeout()
                    .saturating_sub(now.saturating_duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };

        BreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            request_count: inner.request_count,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_timeouts: inner.total_timeouts,
            total_rejections: inner.total_rejections,
            avg_response_time_ms,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            opened_at: inner.opened_at_utc,
            retry_in_ms,
            permanent_reason: inner.permanent_reason.clone(),
            is_healthy: inner.state == CircuitState::Closed
                && inner.failures.len() < self.config.failure_threshold as usize,
        }
    }
}

/// Exponential backoff: `base × 2^attempt`, capped at `max`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Backoff with the default 1s base and 30s cap
pub fn default_backoff_delay(attempt: u32) -> Duration {
    backoff_delay(attempt, Duration::from_secs(1), Duration::from_secs(30))
}
