//! BitVault Fee Engine
//!
//! Transaction sizing, UTXO selection and fee-rate resolution for the
//! BitVault Bitcoin wallet. The engine never signs or broadcasts; it
//! decides which coins to spend and what the transaction will cost.
//!
//! # Modules
//!
//! - `types`: UTXOs, outputs, script types and size specs
//! - `size_estimator`: BIP141 vsize/weight calculation and dust policy
//! - `utxo_selection`: Tiered coin selection with structured failures
//! - `circuit_breaker`: Breakers guarding unreliable upstream calls
//! - `fee_provider`: Fee provider chain with validation and static fallback
//! - `orchestrator`: Instant, cached and accurate estimation phases
//! - `config`: TOML configuration for all tunables
//! - `error`: Engine-wide error type
//! - `logging`: Structured, sanitized logging
//!
//! # Dependency order
//!
//! ```text
//! size_estimator <- utxo_selection <- orchestrator
//! circuit_breaker <- fee_provider  <- orchestrator
//! ```
//!
//! Sizing and selection are pure and safe to call from any thread. The
//! only shared mutable state is the breakers held by a [`BreakerRegistry`].

/// UTXOs, outputs and size specs
pub mod types;

/// Transaction size estimation
pub mod size_estimator;

/// Structured logging
pub mod logging;

/// Configuration management
pub mod config;

/// Engine-wide error type
pub mod error;

/// UTXO selection algorithms and utilities
pub mod utxo_selection;

/// Circuit breakers and their registry
pub mod circuit_breaker;

/// Fee providers and the provider chain
pub mod fee_provider;

/// Multi-phase fee estimation
pub mod orchestrator;

pub use bitcoin::{Amount, OutPoint, Txid};

pub use types::{total_output_value, Output, ScriptType, TransactionSizeSpec, TxInputSpec, Utxo};

pub use size_estimator::{calculate_fee, DustPolicy, SizeEstimate, SizeEstimator, SizeWarning};

pub use utxo_selection::{
    SelectionDiagnostics, SelectionError, SelectionResult, SelectionTier, UtxoSelector, UtxoStats,
};

pub use circuit_breaker::{
    BreakerError, BreakerFailure, BreakerMetrics, BreakerRegistry, CircuitBreaker,
    CircuitBreakerConfig, CircuitState,
};

pub use fee_provider::{FeeConfidence, FeeEstimate, FeeProviderChain, FeeSource, ProviderError};

pub use orchestrator::{
    EstimationError, EstimationPhase, EstimationRequest, FeeEstimationOrchestrator, OperationType,
    PhaseEstimate, ProgressiveEstimate, UtxoSource, DUMMY_ADDRESS,
};

pub use config::EngineConfig;

pub use error::{FeeEngineError, FeeEngineResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
///
/// Installs the logger with default settings. Safe to call more than once.
///
/// # Returns
/// * Result with () on success, or an error message string
pub fn init() -> Result<(), String> {
    logging::init(&logging::LogConfig::default())
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Initialize from an engine configuration
pub fn init_with_config(config: &EngineConfig) -> Result<(), String> {
    logging::init(&config.logging).map_err(|e| format!("Failed to initialize logging: {}", e))
}

// Integration tests are in the tests/ directory
