//! Changeless match tier
//!
//! Looks for the smallest set of UTXOs that pays for the outputs with a
//! leftover too small to be worth a change output. That leftover goes to
//! the miner instead of creating a sub-dust output.
//!
//! The search is a depth-first include/exclude walk over candidates in
//! descending value order, pruned on effective value (value net of the
//! input's own fee). A subset is a match when its effective value lands in
//! `[target + base fee, target + base fee + change fee + dust)`.

use crate::utxo_selection::strategies::{utils, SelectionContext, Strategy};
use crate::utxo_selection::types::{RejectionReason, Selection, SelectionTier, TierRejection};
use crate::types::Utxo;

/// Strategy searching for a funded selection without change
#[derive(Debug, Clone)]
pub struct ExactMatchStrategy {
    max_tries: usize,
    candidate_limit: usize,
}

impl ExactMatchStrategy {
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
    effective: Vec<i64>,
    remaining: Vec<i64>,
    lower: i64,
    upper: i64,
    max_tries: usize,
    tries: usize,
    exhausted: bool,
    selected: Vec<usize>,
    best: Option<Selection>,
}

impl Search<'_, '_> {
    fn run(&mut self, index: usize, sum: i64) {
        if self.tries >= self.max_tries {
            self.exhausted = true;
            return;
        }
        self.tries += 1;

        if sum >= self.upper {
            return;
        }

        if sum >= self.lower {
            self.consider();
            return;
        }

        if index >= self.effective.len() || sum.saturating_add(self.remaining[index]) < self.lower {
            return;
        }

        // A deeper subset cannot use fewer inputs than the best one found
        if let Some(best) = &self.best {
            if self.selected.len() + 1 > best.utxos.len() {
                return;
            }
        }

        self.selected.push(index);
        self.run(index + 1, sum.saturating_add(self.effective[index]));
        self.selected.pop();

        self.run(index + 1, sum);
    }

    fn consider(&mut self) {
        let candidates = self.candidates;
        let inputs: Vec<&Utxo> = self.selected.iter().map(|&i| &candidates[i]).collect();

        if let Some(candidate) = self.ctx.price(&inputs, self.tries) {
            if candidate.change != 0 {
                return;
            }
            let replace = match &self.best {
                Some(best) => candidate.is_better_than(best),
                None => true,
            };
            if replace {
                self.best = Some(candidate);
            }
        }
    }
}

impl Strategy for ExactMatchStrategy {
    fn tier(&self) -> SelectionTier {
        SelectionTier::ExactMatch
    }

    fn select(&self, ctx: &SelectionContext<'_>) -> Result<Selection, TierRejection> {
        let candidates = &ctx.candidates[..ctx.candidates.len().min(self.candidate_limit)];
        let effective: Vec<i64> = candidates
            .iter()
            .map(|u| ctx.effective_value(u))
            .collect();
        let remaining = utils::suffix_sums(&effective);

        let lower = i64::try_from(ctx.target.saturating_add(ctx.base_fee())).unwrap_or(i64::MAX);
        let window = ctx
            .change_output_fee()
            .saturating_add(ctx.change_dust_threshold);
        let upper = lower.saturating_add(i64::try_from(window).unwrap_or(i64::MAX));

        if remaining[0] < lower {
            return Err(TierRejection::new(RejectionReason::Undershoot, 0));
        }

        let mut search = Search {
            ctx,
            candidates,
            effective,
            remaining,
            lower,
            upper,
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
            None => Err(TierRejection::new(RejectionReason::NoMatch, search.tries)),
        }
    }
}
