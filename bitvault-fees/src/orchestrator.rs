//! Progressive fee estimation
//!
//! Every request moves through up to three phases, each one replacing the
//! previous number shown to the user:
//!
//! 1. **instant** - size of a synthetic transaction for the operation type
//!    times the last known fee rate. No I/O, never fails.
//! 2. **cached** - dry run of real UTXO selection at a live fee rate. Works
//!    before a wallet is connected by funding a well-known dummy address
//!    with a synthetic UTXO.
//! 3. **accurate** - the same pipeline against the caller's real address
//!    and UTXOs, run right before submission.
//!
//! Phases run one after another within a request. Failures in phase 2 fall
//! back to the phase 1 number; phase 3 failures are returned to the caller,
//! because submitting with a stale fee risks an underpriced transaction.

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, OutPoint};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use log::{debug, warn};

use crate::config::{EngineConfig, StaticFallbackRates};
use crate::fee_provider::FeeProviderChain;
use crate::logging::{log_estimation, sanitize_for_logging, LogLevel};
use crate::size_estimator::{calculate_fee, SizeEstimator};
use crate::types::{total_output_value, Output, ScriptType, TransactionSizeSpec, Utxo};
use crate::utxo_selection::{SelectionError, SelectionResult, UtxoSelector};

/// BIP173 example address, used for estimates before a wallet is connected
pub const DUMMY_ADDRESS: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

/// Smallest synthetic balance given to the dummy address
pub const DUMMY_MIN_BALANCE_SAT: u64 = 1_000_000;

/// Supplies the UTXOs of an address
#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn list_utxos(&self, address: &str) -> anyhow::Result<Vec<Utxo>>;
}

/// Estimation phases, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationPhase {
    Instant,
    Cached,
    Accurate,
}

impl EstimationPhase {
    /// Value of the `estimation_method` tag
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationPhase::Instant => "instant",
            EstimationPhase::Cached => "cached",
            EstimationPhase::Accurate => "accurate",
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            EstimationPhase::Instant => 1,
            EstimationPhase::Cached => 2,
            EstimationPhase::Accurate => 3,
        }
    }
}

impl fmt::Display for EstimationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of transaction the engine estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Transfer,
    Stamp,
    Src20,
    Src101,
    Fairmint,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Transfer,
        OperationType::Stamp,
        OperationType::Src20,
        OperationType::Src101,
        OperationType::Fairmint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Transfer => "transfer",
            OperationType::Stamp => "stamp",
            OperationType::Src20 => "src20",
            OperationType::Src101 => "src101",
            OperationType::Fairmint => "fairmint",
        }
    }

    /// Typical outputs of this operation, excluding change
    pub fn default_outputs(&self) -> Vec<Output> {
        let recipient = |value| Output::new(value, ScriptType::P2wpkh);
        let data = || Output::new(330, ScriptType::P2wsh);
        match self {
            OperationType::Transfer => vec![recipient(546)],
            OperationType::Stamp => vec![recipient(333), data(), data(), data()],
            OperationType::Src20 => vec![recipient(333), data(), data()],
            OperationType::Src101 => vec![recipient(546), data(), data()],
            OperationType::Fairmint => vec![recipient(546), Output::new(0, ScriptType::OpReturn)],
        }
    }

    /// Synthetic spec: one P2WPKH input, the given outputs, P2WPKH change
    pub fn size_spec(&self, outputs: &[Output]) -> TransactionSizeSpec {
        outputs
            .iter()
            .fold(
                TransactionSizeSpec::new().with_input(ScriptType::P2wpkh, true),
                |spec, output| spec.with_output(output.script_type),
            )
            .with_change(ScriptType::P2wpkh)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One estimation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationRequest {
    pub operation: OperationType,
    /// Outputs to fund; the operation's defaults when absent
    #[serde(default)]
    pub outputs: Option<Vec<Output>>,
    /// Funding address; the dummy address is used for dry runs when absent
    #[serde(default)]
    pub address: Option<String>,
    /// Caller-chosen fee rate in sat/vB; overrides every other source
    #[serde(default)]
    pub fee_rate: Option<Decimal>,
}

impl EstimationRequest {
    pub fn new(operation: OperationType) -> Self {
        Self {
            operation,
            outputs: None,
            address: None,
            fee_rate: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<Output>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.outputs
            .clone()
            .unwrap_or_else(|| self.operation.default_outputs())
    }

    fn real_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != DUMMY_ADDRESS)
    }
}

/// Result of one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEstimate {
    pub phase: EstimationPhase,
    pub estimation_method: String,
    pub operation: OperationType,
    /// sat/vB
    pub fee_rate: Decimal,
    pub vsize: usize,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub total_fee: Amount,
    pub selection: Option<SelectionResult>,
    /// Where the fee rate came from: "explicit", "last_known", "static" or a provider name
    pub fee_source: String,
    /// Whether the size comes from a real UTXO selection
    pub has_exact_fees: bool,
    pub dry_run: bool,
    pub used_dummy_address: bool,
    /// Why a later phase fell back to this value
    pub fallback_reason: Option<String>,
}

/// Phases completed so far for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveEstimate {
    phases: Vec<PhaseEstimate>,
}

impl ProgressiveEstimate {
    fn new(instant: PhaseEstimate) -> Self {
        Self {
            phases: vec![instant],
        }
    }

    /// Latest phase; later phases supersede earlier ones
    pub fn current(&self) -> &PhaseEstimate {
        // Always holds the instant phase
        &self.phases[self.phases.len() - 1]
    }

    pub fn phase(&self, phase: EstimationPhase) -> Option<&PhaseEstimate> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn phases(&self) -> &[PhaseEstimate] {
        &self.phases
    }

    pub fn is_final(&self) -> bool {
        self.current().phase == EstimationPhase::Accurate
    }

    fn push(&mut self, estimate: PhaseEstimate) {
        self.phases.push(estimate);
    }

    fn mark_fallback(&mut self, reason: String) {
        if let Some(last) = self.phases.last_mut() {
            last.fallback_reason = Some(reason);
        }
    }
}

/// Errors from phases 2 and 3
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("Invalid Bitcoin address: {0}")]
    InvalidAddress(String),

    #[error("A funding address is required for the final estimate")]
    MissingAddress,

    #[error("Failed to fetch UTXOs: {0}")]
    UtxoSource(String),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl EstimationError {
    pub fn kind(&self) -> &'static str {
        match self {
            EstimationError::InvalidAddress(_) => "invalid_address",
            EstimationError::MissingAddress => "missing_address",
            EstimationError::UtxoSource(_) => "utxo_source",
            EstimationError::Selection(e) => e.kind(),
        }
    }
}

/// Runs the three estimation phases
pub struct FeeEstimationOrchestrator {
    estimator: SizeEstimator,
    selector: UtxoSelector,
    chain: Arc<FeeProviderChain>,
    utxo_source: Arc<dyn UtxoSource>,
    static_rates: StaticFallbackRates,
}

impl FeeEstimationOrchestrator {
    pub fn new(
        config: &EngineConfig,
        chain: Arc<FeeProviderChain>,
        utxo_source: Arc<dyn UtxoSource>,
    ) -> Self {
        Self {
            estimator: SizeEstimator::new(),
            selector: UtxoSelector::from_engine_config(config),
            chain,
            utxo_source,
            static_rates: config.static_fallback,
        }
    }

    pub fn selector(&self) -> &UtxoSelector {
        &self.selector
    }

    /// Phase 1: synthetic size at the best rate available without I/O
    pub fn instant_estimate(&self, request: &EstimationRequest) -> PhaseEstimate {
        // Later phases reject a non-positive rate; here it would show a bogus fee
        let explicit = match request.fee_rate {
            Some(rate) if rate <= Decimal::ZERO => {
                warn!(
                    "Ignoring non-positive fee rate {} sat/vB for the instant {} estimate",
                    rate, request.operation
                );
                None
            }
            other => other,
        };

        let (fee_rate, fee_source) = match explicit {
            Some(rate) => (rate, "explicit".to_string()),
            None => match self.chain.last_known_estimate() {
                Some(estimate) => (Decimal::from(estimate.recommended_fee), "last_known".to_string()),
                None => (Decimal::from(self.static_rates.normal), "static".to_string()),
            },
        };

        let outputs = request.outputs();
        let vsize = self
            .estimator
            .estimate_size(&request.operation.size_spec(&outputs));
        let total_fee = Amount::from_sat(calculate_fee(fee_rate, vsize));

        PhaseEstimate {
            phase: EstimationPhase::Instant,
            estimation_method: EstimationPhase::Instant.as_str().to_string(),
            operation: request.operation,
            fee_rate,
            vsize,
            total_fee,
            selection: None,
            fee_source,
            has_exact_fees: false,
            dry_run: true,
            used_dummy_address: false,
            fallback_reason: None,
        }
    }

    /// Phase 2: dry-run selection, using the dummy address when no real one is known
    pub async fn cached_estimate(&self, request: &EstimationRequest) -> Result<PhaseEstimate, EstimationError> {
        self.run_selection(request, EstimationPhase::Cached).await
    }

    /// Phase 3: selection over the caller's real UTXOs
    ///
    /// Errors are returned as-is.
    pub async fn final_estimate(&self, request: &EstimationRequest) -> Result<PhaseEstimate, EstimationError> {
        if request.real_address().is_none() {
            return Err(EstimationError::MissingAddress);
        }
        self.run_selection(request, EstimationPhase::Accurate).await
    }

    /// Phases 1 and 2
    pub async fn estimate_progressive(&self, request: &EstimationRequest) -> ProgressiveEstimate {
        let mut progressive = ProgressiveEstimate::new(self.instant_estimate(request));

        match self.cached_estimate(request).await {
            Ok(cached) => progressive.push(cached),
            Err(err) => {
                warn!(
                    "Cached {} estimate failed, keeping instant estimate: {}",
                    request.operation, err
                );
                progressive.mark_fallback(err.to_string());
            }
        }

        progressive
    }

    /// Phase 3 on top of earlier phases
    ///
    /// On failure the error is returned and recorded as the fallback reason
    /// of the current phase.
    pub async fn finalize(
        &self,
        progressive: &mut ProgressiveEstimate,
        request: &EstimationRequest,
    ) -> Result<PhaseEstimate, EstimationError> {
        match self.final_estimate(request).await {
            Ok(accurate) => {
                progressive.push(accurate.clone());
                Ok(accurate)
            }
            Err(err) => {
                progressive.mark_fallback(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_selection(
        &self,
        request: &EstimationRequest,
        phase: EstimationPhase,
    ) -> Result<PhaseEstimate, EstimationError> {
        let address = request.real_address();
        if let Some(address) = address {
            validate_address(address)?;
        }

        let (fee_rate, fee_source) = match request.fee_rate {
            Some(rate) => (rate, "explicit".to_string()),
            None => {
                let estimate = self.chain.get_fee_estimate().await;
                (Decimal::from(estimate.recommended_fee), estimate.source)
            }
        };

        let outputs = request.outputs();
        let utxos = match address {
            Some(address) => self
                .utxo_source
                .list_utxos(address)
                .await
                .map_err(|e| EstimationError::UtxoSource(e.to_string()))?,
            None => vec![self.dummy_utxo(request, &outputs, fee_rate)],
        };
        debug!(
            "{} estimate for {}: {} UTXOs at {} sat/vB",
            phase,
            request.operation,
            utxos.len(),
            fee_rate
        );

        let selection = self.selector.select_utxos(&utxos, &outputs, fee_rate)?;

        log_estimation(
            LogLevel::Info,
            "phase complete",
            Some(json!({
                "phase": phase.as_str(),
                "operation": request.operation.as_str(),
                "address": address.map(sanitize_for_logging),
                "fee_rate": fee_rate.to_string(),
                "fee_source": fee_source,
                "vsize": selection.vsize,
                "fee": selection.fee.to_sat(),
            })),
        );

        Ok(PhaseEstimate {
            phase,
            estimation_method: phase.as_str().to_string(),
            operation: request.operation,
            fee_rate,
            vsize: selection.vsize,
            total_fee: selection.fee,
            selection: Some(selection),
            fee_source,
            has_exact_fees: true,
            dry_run: phase != EstimationPhase::Accurate,
            used_dummy_address: address.is_none(),
            fallback_reason: None,
        })
    }

    /// Single P2WPKH UTXO large enough to fund the request
    fn dummy_utxo(&self, request: &EstimationRequest, outputs: &[Output], fee_rate: Decimal) -> Utxo {
        let target = total_output_value(outputs);
        let vsize = self
            .estimator
            .estimate_size(&request.operation.size_spec(outputs));
        let needed = Decimal::from(target) + Decimal::from(calculate_fee(fee_rate, vsize));
        let padded = (needed * dec!(1.5)).ceil().to_u64().unwrap_or(u64::MAX);

        Utxo::new(
            OutPoint::null(),
            Amount::from_sat(padded.max(DUMMY_MIN_BALANCE_SAT)),
            ScriptType::P2wpkh,
        )
        .with_witness(true)
    }
}

/// Check that `address` parses as a Bitcoin address on any network
pub fn validate_address(address: &str) -> Result<(), EstimationError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map(|_| ())
        .map_err(|e| EstimationError::InvalidAddress(format!("{}: {}", sanitize_for_logging(address), e)))
}
