//! Error handling for the fee engine
//!
//! Each component has its own error enum:
//!
//! - [`SelectionError`] from UTXO selection
//! - [`BreakerError`] from circuit breakers
//! - [`ProviderError`] from individual fee providers
//! - [`EstimationError`] from the estimation phases
//!
//! [`FeeEngineError`] wraps all of them for callers that want a single
//! type. Every error has a stable machine-readable `kind()` and a
//! `user_message()` suitable for display.
//!
//! # Usage
//!
//! ```
//! use bitvault_fees::error::{FeeEngineError, FeeEngineResult};
//! use bitvault_fees::{Output, ScriptType, UtxoSelector};
//! use rust_decimal_macros::dec;
//!
//! fn fund() -> FeeEngineResult<u64> {
//!     let outputs = [Output::new(10_000, ScriptType::P2wpkh)];
//!     let selection = UtxoSelector::new().select_utxos(&[], &outputs, dec!(1))?;
//!     Ok(selection.fee.to_sat())
//! }
//!
//! let err = fund().unwrap_err();
//! assert_eq!(err.kind(), "no_spendable_utxos");
//! ```

use std::error::Error as StdError;
use thiserror::Error;

use crate::circuit_breaker::BreakerError;
use crate::fee_provider::ProviderError;
use crate::orchestrator::EstimationError;
use crate::utxo_selection::SelectionError;

/// Top-level error of the fee engine
#[derive(Debug, Error)]
pub enum FeeEngineError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Breaker(#[from] BreakerError<ProviderError>),

    #[error(transparent)]
    Estimation(EstimationError),

    /// Configuration errors
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

/// Type alias for a Result with FeeEngineError
pub type FeeEngineResult<T> = Result<T, FeeEngineError>;

/// Error category for logging and metrics purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller can fix by changing amount, fee rate or funding
    Funds,
    /// Upstream provider misbehaved or is unreachable
    Provider,
    /// Bad request data such as an invalid address
    Validation,
    Config,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Funds => "funds",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Config => "config",
        }
    }
}

impl From<EstimationError> for FeeEngineError {
    fn from(err: EstimationError) -> Self {
        // Keep selection failures at the top level so their kind is reachable directly
        match err {
            EstimationError::Selection(selection) => FeeEngineError::Selection(selection),
            other => FeeEngineError::Estimation(other),
        }
    }
}

impl From<anyhow::Error> for FeeEngineError {
    fn from(err: anyhow::Error) -> Self {
        FeeEngineError::Config {
            context: err.to_string(),
            source: None,
        }
    }
}

impl From<toml::de::Error> for FeeEngineError {
    fn from(err: toml::de::Error) -> Self {
        FeeEngineError::Config {
            context: format!("TOML deserialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

/// Create a configuration error with context
pub fn config_error<S: Into<String>>(context: S) -> FeeEngineError {
    FeeEngineError::Config {
        context: context.into(),
        source: None,
    }
}

impl FeeEngineError {
    /// Stable machine-readable identifier
    pub fn kind(&self) -> &'static str {
        match self {
            FeeEngineError::Selection(e) => e.kind(),
            FeeEngineError::Provider(e) => e.kind(),
            FeeEngineError::Breaker(e) => e.kind(),
            FeeEngineError::Estimation(e) => e.kind(),
            FeeEngineError::Config { .. } => "config",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            FeeEngineError::Selection(SelectionError::InvalidFeeRate(_)) => ErrorCategory::Validation,
            FeeEngineError::Selection(_) => ErrorCategory::Funds,
            FeeEngineError::Provider(_) | FeeEngineError::Breaker(_) => ErrorCategory::Provider,
            FeeEngineError::Estimation(EstimationError::UtxoSource(_)) => ErrorCategory::Provider,
            FeeEngineError::Estimation(_) => ErrorCategory::Validation,
            FeeEngineError::Config { .. } => ErrorCategory::Config,
        }
    }

    /// Message suitable for displaying to users
    pub fn user_message(&self) -> String {
        match self {
            FeeEngineError::Selection(e) => e.user_message(),
            FeeEngineError::Provider(_) | FeeEngineError::Breaker(_) => {
                "Fee data is temporarily unavailable".to_string()
            }
            FeeEngineError::Estimation(EstimationError::UtxoSource(_)) => {
                "Could not load wallet balance, please try again".to_string()
            }
            FeeEngineError::Estimation(e) => e.to_string(),
            FeeEngineError::Config { context, .. } => format!("Configuration error: {}", context),
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Provider
    }
}
