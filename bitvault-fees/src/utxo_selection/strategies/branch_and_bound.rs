//! Branch and bound tier
//!
//! Exhaustive include/exclude search over the largest
//! `candidate_limit` UTXOs, bounded by an iteration budget. Every funded
//! subset is priced and the best one by (fewer inputs, lower waste) wins.
//!
//! Branches are cut when the remaining candidates cannot fund the target,
//! or when going deeper could only produce more inputs than the best
//! selection found so far.

use crate::types::Utxo;
use crate::utxo_selection::strategies::{utils, SelectionContext, Strategy};
use crate::utxo_selection::types::{RejectionReason, Selection, SelectionTier, TierRejection};

/// Bounded exhaustive search strategy
#[derive(Debug, Clone)]
pub struct BranchAndBoundStrategy {
    max_tries: usize,
    candidate_limit: usize,
}

impl BranchAndBoundStrategy {
    pub fn new(max_tries: usize, candidate_limit: usize) -> Self {
        Self {
            max_tries,
            candidate_limit,
        }
    }
}

struct Search<'s, 'a> {
    ctx: &'s SelectionContext<'a>,
    candidates: &'a [Utxo],
    remaining: Vec<i64>,
    max_tries: usize,
    tries: usize,
    exhausted: bool,
    selected: Vec<&'a Utxo>,
    best: Option<Selection>,
}

impl<'a> Search<'_, 'a> {
    fn run(&mut self, index: usize, sum: i64) {
        if self.tries >= self.max_tries {
            self.exhausted = true;
            return;
        }
        self.tries += 1;

        if let Some(candidate) = self.ctx.price(&self.selected, self.tries) {
            let replace = match &self.best {
                Some(best) => candidate.is_better_than(best),
                None => true,
            };
            if replace {
                self.best = Some(candidate);
            }
            // Adding inputs to a funded set only adds inputs
            return;
        }

        if index >= self.candidates.len() {
            return;
        }

        let target = i64::try_from(self.ctx.target).unwrap_or(i64::MAX);
        if sum.saturating_add(self.remaining[index]) < target {
            return;
        }

        if let Some(best) = &self.best {
            if self.selected.len() + 1 > best.utxos.len() {
                return;
            }
        }

        let candidates = self.candidates;
        let next = &candidates[index];
        self.selected.push(next);
        self.run(index + 1, sum.saturating_add(utils::value_as_i64(next)));
        self.selected.pop();

        self.run(index + 1, sum);
    }
}

impl Strategy for BranchAndBoundStrategy {
    fn tier(&self) -> SelectionTier {
        SelectionTier::BranchAndBound
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, TierRejection> {
        let candidates = &ctx.candidates[..ctx.candidates.len().min(self.candidate_limit)];
        let values: Vec<i64> = candidates.iter().map(utils::value_as_i64).collect();
        let remaining = utils::suffix_sums(&values);

        let mut search = Search {
            ctx,
            candidates,
            remaining,
            max_tries: self.max_tries,
            tries: 0,
            exhausted: false,
            selected: Vec::new(),
            best: None,
        };
        search.run(0, 0);

        match search.best {
            Some(mut best) => {
                best.iterations = search.tries;
                Ok(best)
            }
            None if search.exhausted => Err(TierRejection::new(
                RejectionReason::BudgetExhausted,
                search.tries,
            )),
            None => Err(TierRejection::new(RejectionReason::Undershoot, search.tries)),
        }
    }
}
