//! Greedy largest-first tier
//!
//! Adds UTXOs from largest to smallest until the outputs and fee are
//! covered, then emits change (or absorbs a sub-dust leftover). This
//! minimizes the input count and always succeeds when funds suffice, but
//! can overshoot; selections wasting more than the context's limit are
//! handed back as a fallback so a deeper search can try to improve on them.

use crate::types::Utxo;
use crate::utxo_selection::strategies::{SelectionContext, Strategy};
use crate::utxo_selection::types::{RejectionReason, Selection, SelectionTier, TierRejection};

/// Strategy selecting the largest UTXOs first
#[derive(Debug, Clone, Default)]
pub struct LargestFirstStrategy;

impl LargestFirstStrategy {
    pub fn new() -> Self {
        LargestFirstStrategy
    }
}

impl Strategy for LargestFirstStrategy {
    fn tier(&self) -> SelectionTier {
        SelectionTier::GreedyLargestFirst
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, TierRejection> {
        let mut picked: Vec<&Utxo> = Vec::new();

        for (step, utxo) in ctx.candidates.iter().enumerate() {
            picked.push(utxo);

            if let Some(selection) = ctx.price(&picked, step + 1) {
                let limit = ctx.waste_limit();
                if selection.waste > limit {
                    let waste = selection.waste;
                    return Err(
                        TierRejection::new(RejectionReason::OverWaste { waste, limit }, step + 1)
                            .with_fallback(selection),
                    );
                }
                return Ok(selection);
            }
        }

        Err(TierRejection::new(
            RejectionReason::Undershoot,
            ctx.candidates.len(),
        ))
    }
}
