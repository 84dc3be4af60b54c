//! Helpers shared by the selection tiers

use rust_decimal::Decimal;

use crate::size_estimator::{calculate_fee, SizeEstimator};
use crate::types::Utxo;

/// Cost of spending a single UTXO at `fee_rate`
///
/// # Arguments
/// * `estimator` - Size estimator used to price the input
/// * `utxo` - UTXO to price
/// * `fee_rate` - Fee rate in sat/vB
///
/// # Returns
/// * Fee in satoshis attributable to the input
pub fn spend_cost(estimator: &SizeEstimator, utxo: &Utxo, fee_rate: Decimal) -> u64 {
    calculate_fee(fee_rate, estimator.input_vsize(&utxo.input_spec()))
}

/// Value of a UTXO after paying for its own input
pub fn effective_value(estimator: &SizeEstimator, utxo: &Utxo, fee_rate: Decimal) -> i64 {
    let cost = spend_cost(estimator, utxo, fee_rate);
    value_as_i64(utxo).saturating_sub(i64::try_from(cost).unwrap_or(i64::MAX))
}

/// Whether spending the UTXO at `fee_rate` yields any value
pub fn is_economical(estimator: &SizeEstimator, utxo: &Utxo, fee_rate: Decimal) -> bool {
    utxo.value_sat() > spend_cost(estimator, utxo, fee_rate)
}

/// Copy of `utxos` sorted by value, largest first
///
/// Ties are broken by outpoint so results do not depend on input order.
pub fn sort_by_value_desc(utxos: &[Utxo]) -> Vec<Utxo> {
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| {
        b.value
            .cmp(&a.value)
            .then_with(|| a.outpoint.cmp(&b.outpoint))
    });
    sorted
}

/// Total value of UTXOs in satoshis, saturating
pub fn total_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(Utxo::value_sat).fold(0, u64::saturating_add)
}

/// UTXO value as a signed amount for search arithmetic
pub fn value_as_i64(utxo: &Utxo) -> i64 {
    i64::try_from(utxo.value_sat()).unwrap_or(i64::MAX)
}

/// Running totals from each index to the end
///
/// `suffix[i]` is the sum of `values[i..]`; the extra trailing zero lets
/// callers index one past the end.
pub fn suffix_sums(values: &[i64]) -> Vec<i64> {
    let mut sums: Vec<i64> = vec![0; values.len() + 1];
    for i in (0..values.len()).rev() {
        sums[i] = sums[i + 1].saturating_add(values[i]);
    }
    sums
}
