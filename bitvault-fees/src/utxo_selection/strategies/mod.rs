//! UTXO selection tiers
//!
//! Each tier implements [`Strategy`] and either funds the outputs or
//! explains why it could not. The selector runs them in order and keeps
//! the first success.
//!
//! All tiers share a [`SelectionContext`], which prices a candidate input
//! set with the size estimator and decides whether leftover value becomes
//! change or is absorbed into the fee.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::SelectionConfig;
use crate::size_estimator::{calculate_fee, SizeEstimator};
use crate::types::{Output, ScriptType, TransactionSizeSpec, TxInputSpec, Utxo};
use crate::utxo_selection::types::{Selection, SelectionTier, TierRejection};

pub mod branch_and_bound;
pub mod exact_match;
pub mod largest_first;
pub mod utils;

pub use branch_and_bound::BranchAndBoundStrategy;
pub use exact_match::ExactMatchStrategy;
pub use largest_first::LargestFirstStrategy;

/// One selection tier
pub trait Strategy {
    /// Tier implemented by this strategy
    fn tier(&self) -> SelectionTier;

    /// Try to fund `ctx.outputs` from `ctx.candidates`
    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, TierRejection>;
}

/// Inputs shared by every tier of one selection call
#[derive(Debug, Clone)]
pub struct SelectionContext<'a> {
    /// Spendable UTXOs, largest first
    pub candidates: &'a [Utxo],
    pub outputs: &'a [Output],
    /// Sum of output values
    pub target: u64,
    /// Fee rate in sat/vB
    pub fee_rate: Decimal,
    pub change_type: ScriptType,
    /// Smallest change output worth creating
    pub change_dust_threshold: u64,
    pub config: &'a SelectionConfig,
    estimator: SizeEstimator,
}

impl<'a> SelectionContext<'a> {
    pub fn new(
        candidates: &'a [Utxo],
        outputs: &'a [Output],
        fee_rate: Decimal,
        change_type: ScriptType,
        change_dust_threshold: u64,
        config: &'a SelectionConfig,
    ) -> Self {
        Self {
            candidates,
            outputs,
            target: crate::types::total_output_value(outputs),
            fee_rate,
            change_type,
            change_dust_threshold,
            config,
            estimator: SizeEstimator::quiet(),
        }
    }

    fn spec_for<'u>(
        &self,
        inputs: impl IntoIterator<Item = &'u Utxo>,
        with_change: bool,
    ) -> TransactionSizeSpec {
        TransactionSizeSpec {
            inputs: inputs.into_iter().map(Utxo::input_spec).collect(),
            outputs: self.outputs.iter().map(|o| o.script_type).collect(),
            include_change_output: with_change,
            change_output_type: self.change_type,
        }
    }

    /// Fee and vsize of spending `inputs` into the outputs, with or without change
    pub fn fee_for<'u>(
        &self,
        inputs: impl IntoIterator<Item = &'u Utxo>,
        with_change: bool,
    ) -> (u64, usize) {
        let vsize = self
            .estimator
            .estimate_size(&self.spec_for(inputs, with_change));
        (calculate_fee(self.fee_rate, vsize), vsize)
    }

    /// Fee of the transaction skeleton: overhead and outputs, no inputs, no change
    pub fn base_fee(&self) -> u64 {
        self.fee_for(std::iter::empty(), false).0
    }

    /// Cost of spending `utxo` at the current fee rate
    pub fn spend_cost(&self, utxo: &Utxo) -> u64 {
        utils::spend_cost(&self.estimator, utxo, self.fee_rate)
    }

    /// Value of `utxo` net of its spending cost
    pub fn effective_value(&self, utxo: &Utxo) -> i64 {
        utils::effective_value(&self.estimator, utxo, self.fee_rate)
    }

    /// Fee of adding the change output at the current rate
    pub fn change_output_fee(&self) -> u64 {
        calculate_fee(self.fee_rate, self.estimator.output_vsize(self.change_type))
    }

    /// Creating change now plus spending it later at the long-term rate
    pub fn cost_of_change(&self) -> u64 {
        let spend_later = self
            .estimator
            .input_vsize(&TxInputSpec::of(self.change_type));
        self.change_output_fee() + calculate_fee(self.config.long_term_fee_rate, spend_later)
    }

    /// Waste above which the greedy tier defers to branch and bound
    pub fn waste_limit(&self) -> i64 {
        let share = (Decimal::from(self.target) * self.config.max_waste_fraction)
            .ceil()
            .to_i64()
            .unwrap_or(i64::MAX);
        share.max(saturating_i64(self.cost_of_change()))
    }

    /// Waste of a selection
    ///
    /// Inputs contribute `vsize × (fee_rate − long_term_fee_rate)`; then
    /// either the cost of the change output or the excess burned as fee.
    pub fn waste(&self, inputs: &[&Utxo], change: u64, excess: u64) -> i64 {
        let rate_delta = self.fee_rate - self.config.long_term_fee_rate;
        let input_vbytes: usize = inputs
            .iter()
            .map(|u| self.estimator.input_vsize(&u.input_spec()))
            .sum();
        let timing_cost = (Decimal::from(input_vbytes) * rate_delta)
            .round()
            .to_i64()
            .unwrap_or(0);

        let tail = if change > 0 {
            self.cost_of_change()
        } else {
            excess
        };
        timing_cost.saturating_add(saturating_i64(tail))
    }

    /// Price `inputs` as a complete selection
    ///
    /// Returns `None` when the inputs cannot pay for the outputs plus the
    /// changeless fee. Leftover value becomes change when the change would
    /// clear the dust threshold; otherwise it is absorbed into the fee.
    pub fn price(&self, inputs: &[&Utxo], iterations: usize) -> Option<Selection> {
        if inputs.is_empty() {
            return None;
        }

        let total = inputs
            .iter()
            .map(|u| u.value_sat())
            .fold(0, u64::saturating_add);
        let (fee_without_change, vsize_without_change) = self.fee_for(inputs.iter().copied(), false);
        let funded_without_change = self.target.checked_add(fee_without_change)?;
        if total < funded_without_change {
            return None;
        }

        let (fee_with_change, vsize_with_change) = self.fee_for(inputs.iter().copied(), true);
        let change = self
            .target
            .checked_add(fee_with_change)
            .and_then(|needed| total.checked_sub(needed))
            .filter(|change| *change >= self.change_dust_threshold && *change > 0);

        let (fee, change, vsize, excess) = match change {
            Some(change) => (fee_with_change, change, vsize_with_change, 0),
            None => {
                let fee = total - self.target;
                (fee, 0, vsize_without_change, fee - fee_without_change)
            }
        };

        Some(Selection {
            utxos: inputs.iter().map(|u| (*u).clone()).collect(),
            total_input: total,
            fee,
            change,
            vsize,
            waste: self.waste(inputs, change, excess),
            iterations,
        })
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
