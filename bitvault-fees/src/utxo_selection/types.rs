//! Types produced by UTXO selection
//!
//! A successful selection yields a [`SelectionResult`]; a failed one a
//! [`SelectionError`]. Both carry [`SelectionDiagnostics`] describing
//! what each tier tried, so callers can explain the outcome.

use bitcoin::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Output, Utxo};

/// Selection tiers, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    /// Smallest subset that funds the outputs without a change output
    ExactMatch,
    /// Largest UTXOs first until funded, with change
    GreedyLargestFirst,
    /// Bounded search for a lower-waste selection
    BranchAndBound,
}

impl SelectionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionTier::ExactMatch => "exact_match",
            SelectionTier::GreedyLargestFirst => "greedy_largest_first",
            SelectionTier::BranchAndBound => "branch_and_bound",
        }
    }
}

impl fmt::Display for SelectionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A funded candidate produced by a tier
///
/// Satisfies `total_input == target + fee + change`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub utxos: Vec<Utxo>,
    pub total_input: u64,
    pub fee: u64,
    pub change: u64,
    pub vsize: usize,
    pub waste: i64,
    /// Search steps spent producing this candidate
    pub iterations: usize,
}

impl Selection {
    /// Ordering key for the tie-break rule: fewer inputs, then lower waste
    pub fn rank(&self) -> (usize, i64) {
        (self.utxos.len(), self.waste)
    }

    /// Whether `self` should replace `other`
    pub fn is_better_than(&self, other: &Selection) -> bool {
        self.rank() < other.rank()
    }
}

/// Why a tier produced no selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// No subset satisfied the tier's acceptance rule
    NoMatch,
    /// Even every candidate together could not fund the outputs
    Undershoot,
    /// A funded selection exists but wastes more than allowed
    OverWaste { waste: i64, limit: i64 },
    /// Iteration budget ran out before any acceptable subset was found
    BudgetExhausted,
    /// Found selections, none better than one already in hand
    NotImproved,
}

/// Failed tier attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRejection {
    pub reason: RejectionReason,
    pub iterations: usize,
    /// Funded but rejected candidate, usable as a last resort
    pub fallback: Option<Selection>,
}

impl TierRejection {
    pub fn new(reason: RejectionReason, iterations: usize) -> Self {
        Self {
            reason,
            iterations,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, candidate: Selection) -> Self {
        self.fallback = Some(candidate);
        self
    }
}

/// Outcome recorded for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TierOutcome {
    Selected { inputs: usize, waste: i64 },
    Rejected { reason: RejectionReason },
    /// Tier was not reached because an earlier one succeeded
    Skipped,
}

/// Record of one tier's attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: SelectionTier,
    pub outcome: TierOutcome,
    pub iterations: usize,
    /// Wall-clock time spent in the tier, 0 when skipped
    #[serde(default)]
    pub duration_ms: u64,
}

/// What happened during a selection call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDiagnostics {
    /// UTXOs handed to the selector
    pub available_count: usize,
    /// UTXOs left after removing uneconomical and unspendable ones
    pub spendable_count: usize,
    /// UTXOs that cost more to spend than they hold at this fee rate
    pub dust_filtered: Vec<Utxo>,
    /// UTXOs that can never be spent, by script type or by a value above the money supply
    pub unspendable: Vec<Utxo>,
    /// Per-tier outcomes, in order
    pub attempts: Vec<TierAttempt>,
}

impl SelectionDiagnostics {
    /// Tiers that were actually run
    pub fn attempted_tiers(&self) -> Vec<SelectionTier> {
        self.attempts
            .iter()
            .filter(|a| a.outcome != TierOutcome::Skipped)
            .map(|a| a.tier)
            .collect()
    }
}

/// Outcome of a successful selection
///
/// Invariants: `total_input_value == Σ outputs + fee + change`, and
/// `change` is zero or at least the dust threshold of the change type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected_utxos: Vec<Utxo>,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub total_input_value: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub fee: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub change: Amount,
    /// Synthetic change output, present when `change > 0`
    pub change_output: Option<Output>,
    /// Waste in satoshis; negative when spending now is cheaper than later
    pub waste_score: i64,
    /// Virtual size of the transaction this selection funds
    pub vsize: usize,
    /// Fee rate the selection was priced at (sat/vB)
    pub fee_rate: Decimal,
    /// Tier that produced the selection
    pub tier: SelectionTier,
    pub diagnostics: SelectionDiagnostics,
}

impl SelectionResult {
    pub fn input_count(&self) -> usize {
        self.selected_utxos.len()
    }

    pub fn has_change(&self) -> bool {
        self.change_output.is_some()
    }

    /// Fee actually paid per vbyte
    pub fn effective_fee_rate(&self) -> Decimal {
        if self.vsize == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.fee.to_sat()) / Decimal::from(self.vsize)
    }
}

/// Summary of a set of UTXO values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoStats {
    pub count: usize,
    pub total: u64,
    pub min: u64,
    pub median: u64,
    pub max: u64,
}

impl UtxoStats {
    pub fn from_utxos(utxos: &[Utxo]) -> Self {
        let mut values: Vec<u64> = utxos.iter().map(Utxo::value_sat).collect();
        values.sort_unstable();

        let count = values.len();
        if count == 0 {
            return Self::default();
        }

        let median = if count % 2 == 0 {
            let (low, high) = (values[count / 2 - 1], values[count / 2]);
            low / 2 + high / 2 + (low % 2 + high % 2) / 2
        } else {
            values[count / 2]
        };

        Self {
            count,
            total: values.iter().fold(0, |sum, v| sum.saturating_add(*v)),
            min: values[0],
            median,
            max: values[count - 1],
        }
    }
}

impl fmt::Display for UtxoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} UTXOs totalling {} sats (min {}, median {}, max {})",
            self.count, self.total, self.min, self.median, self.max
        )
    }
}

/// Details of an insufficient-funds failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientFunds {
    /// Spendable value
    pub have: u64,
    /// Outputs plus the fee of spending every spendable UTXO
    pub need: u64,
    /// Sum of requested outputs
    pub target: u64,
    pub estimated_fee: u64,
    pub deficit: u64,
    pub fee_rate: Decimal,
    pub stats: UtxoStats,
    pub recommendations: Vec<String>,
    pub diagnostics: SelectionDiagnostics,
}

impl fmt::Display for InsufficientFunds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Insufficient funds: have {} sats, need {} sats ({} + ~{} fee), deficit: {} sats",
            self.have, self.need, self.target, self.estimated_fee, self.deficit
        )
    }
}

/// Details of an all-dust failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllDust {
    pub count: usize,
    pub total_value: u64,
    pub fee_rate: Decimal,
    /// Cheapest cost of spending any one of the UTXOs
    pub min_spend_cost: u64,
    pub stats: UtxoStats,
    pub recommendations: Vec<String>,
    pub diagnostics: SelectionDiagnostics,
}

impl fmt::Display for AllDust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All {} UTXOs ({} sats) cost more to spend than they hold at {} sat/vB (cheapest input costs {} sats)",
            self.count, self.total_value, self.fee_rate, self.min_spend_cost
        )
    }
}

/// Selection failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No spendable UTXOs available")]
    NoSpendableUtxos { diagnostics: SelectionDiagnostics },

    #[error("{0}")]
    AllUtxosDust(Box<AllDust>),

    #[error("{0}")]
    InsufficientFunds(Box<InsufficientFunds>),

    #[error("Invalid fee rate: {0} sat/vB (must be greater than zero)")]
    InvalidFeeRate(Decimal),
}

impl SelectionError {
    /// Stable machine-readable identifier
    pub fn kind(&self) -> &'static str {
        match self {
            SelectionError::NoSpendableUtxos { .. } => "no_spendable_utxos",
            SelectionError::AllUtxosDust(_) => "all_utxos_dust",
            SelectionError::InsufficientFunds(_) => "insufficient_funds",
            SelectionError::InvalidFeeRate(_) => "invalid_fee_rate",
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        match self {
            SelectionError::NoSpendableUtxos { .. } => {
                vec!["Fund the address before creating a transaction.".to_string()]
            }
            SelectionError::AllUtxosDust(details) => details.recommendations.clone(),
            SelectionError::InsufficientFunds(details) => details.recommendations.clone(),
            SelectionError::InvalidFeeRate(_) => {
                vec!["Use a fee rate of at least 1 sat/vB.".to_string()]
            }
        }
    }

    pub fn diagnostics(&self) -> Option<&SelectionDiagnostics> {
        match self {
            SelectionError::NoSpendableUtxos { diagnostics } => Some(diagnostics),
            SelectionError::AllUtxosDust(details) => Some(&details.diagnostics),
            SelectionError::InsufficientFunds(details) => Some(&details.diagnostics),
            SelectionError::InvalidFeeRate(_) => None,
        }
    }

    /// Message suitable for direct display, including recommendations
    pub fn user_message(&self) -> String {
        let mut message = self.to_string();
        match self {
            SelectionError::InsufficientFunds(details) => {
                message.push_str(&format!(". Available: {}", details.stats));
            }
            SelectionError::AllUtxosDust(details) => {
                message.push_str(&format!(". Available: {}", details.stats));
            }
            _ => {}
        }
        let recommendations = self.recommendations();
        if !recommendations.is_empty() {
            message.push_str(". Suggestions: ");
            message.push_str(&recommendations.join(" "));
        }
        message
    }
}
