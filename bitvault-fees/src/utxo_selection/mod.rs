//! UTXO selection module
//!
//! Chooses which unspent outputs fund a transaction at a given fee rate.
//! Selection is priced with the [`SizeEstimator`](crate::size_estimator::SizeEstimator)
//! so fees always match the vsize of the inputs actually chosen.
//!
//! # Module Structure
//!
//! - `types.rs` - Results, diagnostics and the error taxonomy
//! - `selector.rs` - [`UtxoSelector`], which filters candidates and runs the tiers
//! - `strategies/` - One [`Strategy`](strategies::Strategy) per tier
//!   - `exact_match.rs` - Changeless subset, leftover absorbed into the fee
//!   - `largest_first.rs` - Greedy largest-first with change
//!   - `branch_and_bound.rs` - Bounded search for a lower-waste selection
//!   - `utils.rs` - Spend cost, effective value, sorting helpers
//!
//! # Guarantees
//!
//! - `total_input_value == Σ outputs + fee + change`
//! - `change` is zero or at least the dust threshold of the change type
//! - `fee >= ceil(fee_rate × vsize)`
//! - Among equally valid selections, fewer inputs wins, then lower waste
//!
//! # Failures
//!
//! Every failure is a [`SelectionError`] with a stable `kind()`, a
//! displayable message and the per-tier diagnostics:
//!
//! - `no_spendable_utxos` - nothing to spend
//! - `all_utxos_dust` - every UTXO costs more to spend than it holds
//! - `insufficient_funds` - have/need/deficit, value stats, recommendations

pub mod selector;
pub mod strategies;
pub mod types;

pub use selector::UtxoSelector;
pub use types::{
    AllDust, InsufficientFunds, RejectionReason, SelectionDiagnostics, SelectionError,
    SelectionResult, SelectionTier, TierAttempt, TierOutcome, UtxoStats,
};
