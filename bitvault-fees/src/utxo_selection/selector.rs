//! Main UTXO selector implementation
//!
//! [`UtxoSelector`] runs the selection pipeline:
//!
//! 1. Reject non-positive fee rates and empty UTXO lists.
//! 2. Set aside unspendable UTXOs and those costing more to spend than
//!    they hold at this fee rate (kept for diagnostics).
//! 3. Run the tiers in order: changeless match, greedy largest-first,
//!    branch and bound. The first `Ok` wins; a greedy selection that was
//!    only rejected for excess waste is used if the deeper search cannot
//!    beat it.
//! 4. If nothing funds the outputs, report insufficient funds with
//!    value statistics and recommendations.
//!
//! The selector is stateless per call and safe to share across threads.
//!
//! # Example
//!
//! ```
//! use bitcoin::hashes::Hash;
//! use bitcoin::{Amount, OutPoint, Txid};
//! use bitvault_fees::types::{Output, ScriptType, Utxo};
//! use bitvault_fees::utxo_selection::UtxoSelector;
//! use rust_decimal_macros::dec;
//!
//! let utxos = vec![Utxo::new(
//!     OutPoint::new(Txid::all_zeros(), 0),
//!     Amount::from_sat(50_000),
//!     ScriptType::P2wpkh,
//! )];
//! let outputs = vec![Output::new(20_000, ScriptType::P2wpkh)];
//!
//! let result = UtxoSelector::new()
//!     .select_utxos(&utxos, &outputs, dec!(10))
//!     .expect("funded");
//! assert_eq!(result.selected_utxos.len(), 1);
//! assert_eq!(result.change.to_sat(), 50_000 - 20_000 - result.fee.to_sat());
//! ```

use bitcoin::Amount;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Instant;

use crate::config::{EngineConfig, SelectionConfig};
use crate::logging::{log_selection, LogLevel};
use crate::size_estimator::{DustPolicy, SizeEstimator};
use crate::types::{total_output_value, Output, ScriptType, TransactionSizeSpec, Utxo};
use crate::utxo_selection::strategies::{
    utils, BranchAndBoundStrategy, ExactMatchStrategy, LargestFirstStrategy, SelectionContext,
    Strategy,
};
use crate::utxo_selection::types::{
    AllDust, InsufficientFunds, RejectionReason, Selection, SelectionDiagnostics, SelectionError,
    SelectionResult, SelectionTier, TierAttempt, TierOutcome, UtxoStats,
};

/// UTXO selector running the tiered selection pipeline
#[derive(Debug, Clone)]
pub struct UtxoSelector {
    config: SelectionConfig,
    dust_policy: DustPolicy,
    estimator: SizeEstimator,
}

impl Default for UtxoSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl UtxoSelector {
    /// Selector with default tunables and Bitcoin Core's dust policy
    pub fn new() -> Self {
        Self::with_config(SelectionConfig::default(), DustPolicy::default())
    }

    pub fn with_config(config: SelectionConfig, dust_policy: DustPolicy) -> Self {
        Self {
            config,
            dust_policy,
            estimator: SizeEstimator::new(),
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::with_config(config.selection.clone(), config.dust)
    }

    /// Use a different script type for change outputs
    pub fn with_change_type(mut self, change_type: ScriptType) -> Self {
        self.config.change_script_type = change_type;
        self
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn dust_policy(&self) -> &DustPolicy {
        &self.dust_policy
    }

    /// Smallest change output the selector will create
    pub fn dust_threshold(&self) -> u64 {
        self.dust_policy.threshold(self.config.change_script_type)
    }

    fn tiers(&self) -> Vec<Box<dyn Strategy>> {
        vec![
            Box::new(ExactMatchStrategy::new(
                self.config.exact_match_max_tries,
                self.config.exact_match_candidate_limit,
            )),
            Box::new(LargestFirstStrategy::new()),
            Box::new(BranchAndBoundStrategy::new(
                self.config.bnb_max_tries,
                self.config.bnb_candidate_limit,
            )),
        ]
    }

    /// Select UTXOs funding `outputs` at `fee_rate` sat/vB
    ///
    /// # Arguments
    /// * `available` - Candidate UTXOs; may be empty
    /// * `outputs` - Outputs to fund, excluding change
    /// * `fee_rate` - Fee rate in sat/vB, must be positive
    ///
    /// # Returns
    /// * The selection, or a structured error explaining why none exists
    pub fn select_utxos(
        &self,
        available: &[Utxo],
        outputs: &[Output],
        fee_rate: Decimal,
    ) -> Result<SelectionResult, SelectionError> {
        if fee_rate <= Decimal::ZERO {
            return Err(SelectionError::InvalidFeeRate(fee_rate));
        }

        let mut diagnostics = SelectionDiagnostics {
            available_count: available.len(),
            ..SelectionDiagnostics::default()
        };

        if available.is_empty() {
            log_selection(LogLevel::Info, "no UTXOs to select from", None);
            return Err(SelectionError::NoSpendableUtxos { diagnostics });
        }

        for output in outputs {
            if self.dust_policy.is_dust(output.value_sat(), output.script_type) {
                warn!(
                    "Output of {} sats is below the {} dust threshold",
                    output.value_sat(),
                    output.script_type
                );
            }
        }

        let quiet = SizeEstimator::quiet();
        let mut spendable = Vec::with_capacity(available.len());
        for utxo in available {
            if utxo.value > Amount::MAX_MONEY {
                warn!(
                    "Setting aside UTXO claiming {} sats, above the 21M BTC supply",
                    utxo.value_sat()
                );
                diagnostics.unspendable.push(utxo.clone());
            } else if !utxo.script_type.is_spendable() {
                diagnostics.unspendable.push(utxo.clone());
            } else if utils::is_economical(&quiet, utxo, fee_rate) {
                spendable.push(utxo.clone());
            } else {
                diagnostics.dust_filtered.push(utxo.clone());
            }
        }
        diagnostics.spendable_count = spendable.len();

        if !diagnostics.dust_filtered.is_empty() {
            debug!(
                "Set aside {} uneconomical UTXOs at {} sat/vB",
                diagnostics.dust_filtered.len(),
                fee_rate
            );
        }

        if spendable.is_empty() {
            if diagnostics.dust_filtered.is_empty() {
                return Err(SelectionError::NoSpendableUtxos { diagnostics });
            }
            return Err(self.all_dust_error(fee_rate, diagnostics));
        }

        let candidates = utils::sort_by_value_desc(&spendable);
        let change_type = self.config.change_script_type;
        let ctx = SelectionContext::new(
            &candidates,
            outputs,
            fee_rate,
            change_type,
            self.dust_policy.threshold(change_type),
            &self.config,
        );

        let mut fallback: Option<Selection> = None;
        let mut chosen: Option<(Selection, SelectionTier)> = None;

        for strategy in self.tiers() {
            let tier = strategy.tier();
            if chosen.is_some() {
                diagnostics.attempts.push(TierAttempt {
                    tier,
                    outcome: TierOutcome::Skipped,
                    iterations: 0,
                    duration_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let attempt = strategy.select(&ctx);
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match attempt {
                Ok(selection) => {
                    let improves = fallback
                        .as_ref()
                        .map_or(true, |incumbent| selection.is_better_than(incumbent));
                    if improves {
                        diagnostics.attempts.push(TierAttempt {
                            tier,
                            outcome: TierOutcome::Selected {
                                inputs: selection.utxos.len(),
                                waste: selection.waste,
                            },
                            iterations: selection.iterations,
                            duration_ms,
                        });
                        chosen = Some((selection, tier));
                    } else {
                        diagnostics.attempts.push(TierAttempt {
                            tier,
                            outcome: TierOutcome::Rejected {
                                reason: RejectionReason::NotImproved,
                            },
                            iterations: selection.iterations,
                            duration_ms,
                        });
                    }
                }
                Err(rejection) => {
                    debug!("Tier {} rejected: {:?}", tier, rejection.reason);
                    diagnostics.attempts.push(TierAttempt {
                        tier,
                        outcome: TierOutcome::Rejected {
                            reason: rejection.reason,
                        },
                        iterations: rejection.iterations,
                        duration_ms,
                    });
                    if let Some(candidate) = rejection.fallback {
                        if fallback.is_none() {
                            fallback = Some(candidate);
                        }
                    }
                }
            }
        }

        let (selection, tier) = match (chosen, fallback) {
            (Some(chosen), _) => chosen,
            (None, Some(fallback)) => (fallback, SelectionTier::GreedyLargestFirst),
            (None, None) => {
                return Err(self.insufficient_funds_error(&ctx, &candidates, diagnostics));
            }
        };

        Ok(self.finish(selection, tier, outputs, fee_rate, diagnostics))
    }

    fn finish(
        &self,
        selection: Selection,
        tier: SelectionTier,
        outputs: &[Output],
        fee_rate: Decimal,
        diagnostics: SelectionDiagnostics,
    ) -> SelectionResult {
        let change_type = self.config.change_script_type;
        let change_output =
            (selection.change > 0).then(|| Output::new(selection.change, change_type));

        // Re-price with the logging estimator so fallbacks surface once
        let spec = TransactionSizeSpec {
            include_change_output: change_output.is_some(),
            change_output_type: change_type,
            ..TransactionSizeSpec::for_spend(&selection.utxos, outputs)
        };
        let vsize = self.estimator.estimate_size(&spec);
        debug_assert_eq!(vsize, selection.vsize);

        debug_assert_eq!(
            selection.total_input,
            total_output_value(outputs) + selection.fee + selection.change
        );

        log_selection(
            LogLevel::Info,
            "selected UTXOs",
            Some(json!({
                "tier": tier.as_str(),
                "inputs": selection.utxos.len(),
                "total_input": selection.total_input,
                "fee": selection.fee,
                "change": selection.change,
                "vsize": selection.vsize,
                "waste": selection.waste,
            })),
        );

        SelectionResult {
            total_input_value: Amount::from_sat(selection.total_input),
            fee: Amount::from_sat(selection.fee),
            change: Amount::from_sat(selection.change),
            change_output,
            waste_score: selection.waste,
            vsize: selection.vsize,
            fee_rate,
            tier,
            selected_utxos: selection.utxos,
            diagnostics,
        }
    }

    fn all_dust_error(&self, fee_rate: Decimal, diagnostics: SelectionDiagnostics) -> SelectionError {
        let quiet = SizeEstimator::quiet();
        let min_spend_cost = diagnostics
            .dust_filtered
            .iter()
            .map(|u| utils::spend_cost(&quiet, u, fee_rate))
            .min()
            .unwrap_or(0);
        let stats = UtxoStats::from_utxos(&diagnostics.dust_filtered);

        let mut recommendations = vec![format!(
            "Lower the fee rate below {} sat/vB so these UTXOs are worth spending.",
            fee_rate
        )];
        if stats.count > 1 {
            recommendations.push(format!(
                "Consolidate the {} small UTXOs when network fees are low.",
                stats.count
            ));
        }
        recommendations.push("Add a larger UTXO to the wallet.".to_string());

        log_selection(
            LogLevel::Warn,
            "all UTXOs are uneconomical at this fee rate",
            Some(json!({
                "count": stats.count,
                "total": stats.total,
                "fee_rate": fee_rate.to_string(),
            })),
        );

        SelectionError::AllUtxosDust(Box::new(AllDust {
            count: stats.count,
            total_value: stats.total,
            fee_rate,
            min_spend_cost,
            stats,
            recommendations,
            diagnostics,
        }))
    }

    fn insufficient_funds_error(
        &self,
        ctx: &SelectionContext<'_>,
        candidates: &[Utxo],
        diagnostics: SelectionDiagnostics,
    ) -> SelectionError {
        let have = utils::total_value(candidates);
        let (estimated_fee, _) = ctx.fee_for(candidates.iter(), true);
        let need = ctx.target.saturating_add(estimated_fee);
        let deficit = need.saturating_sub(have).max(1);
        let stats = UtxoStats::from_utxos(candidates);

        let mut recommendations = Vec::new();
        if ctx.fee_rate > Decimal::ONE {
            recommendations.push(format!(
                "Lower the fee rate (currently {} sat/vB) to reduce the ~{} sats fee.",
                ctx.fee_rate, estimated_fee
            ));
        }
        if stats.count > 1 || !diagnostics.dust_filtered.is_empty() {
            recommendations.push(
                "Consolidate small UTXOs when network fees are low to cut future input costs."
                    .to_string(),
            );
        }
        recommendations.push(format!(
            "Reduce the amount being sent by at least {} sats.",
            deficit
        ));
        recommendations.push(format!(
            "Add at least {} sats to the wallet.",
            deficit
        ));

        let details = InsufficientFunds {
            have,
            need,
            target: ctx.target,
            estimated_fee,
            deficit,
            fee_rate: ctx.fee_rate,
            stats,
            recommendations,
            diagnostics,
        };

        log_selection(LogLevel::Warn, &details.to_string(), None);

        SelectionError::InsufficientFunds(Box::new(details))
    }
}
