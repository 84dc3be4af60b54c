use bitcoin::{Amount, OutPoint, Txid};
use bitvault_fees::config::SelectionConfig;
use bitvault_fees::logging::{self, LogConfig, LogLevel};
use bitvault_fees::size_estimator::{calculate_fee, DustPolicy, SizeEstimator};
use bitvault_fees::types::{total_output_value, Output, ScriptType, TransactionSizeSpec, Utxo};
use bitvault_fees::utxo_selection::{
    RejectionReason, SelectionError, SelectionTier, TierOutcome, UtxoSelector,
};
use quickcheck::{Arbitrary, Gen, TestResult};
use quickcheck_macros::quickcheck;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let config = LogConfig {
            level: LogLevel::Error,
            include_timestamps: false,
            ..LogConfig::default()
        };
        let _ = logging::init(&config);
    });
}

fn utxo_of(index: u32, value: u64, script_type: ScriptType) -> Utxo {
    let txid = Txid::from_str(&format!("{:064x}", index + 1)).unwrap();
    Utxo::new(OutPoint::new(txid, index), Amount::from_sat(value), script_type)
}

fn p2wpkh_utxos(values: &[u64]) -> Vec<Utxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| utxo_of(i as u32, *v, ScriptType::P2wpkh))
        .collect()
}

fn pay(value: u64) -> Vec<Output> {
    vec![Output::new(value, ScriptType::P2wpkh)]
}

#[test]
fn test_insufficient_funds_reports_deficit() {
    setup();
    let selector = UtxoSelector::new();
    let err = selector
        .select_utxos(&p2wpkh_utxos(&[5000, 3000]), &pay(10_000), dec!(1))
        .unwrap_err();

    assert_eq!(err.kind(), "insufficient_funds");
    let SelectionError::InsufficientFunds(details) = &err else {
        panic!("expected insufficient funds, got {:?}", err);
    };
    assert_eq!(details.have, 8000);
    assert_eq!(details.target, 10_000);
    // Two inputs, payment and change at 1 sat/vB: 209 vB
    assert_eq!(details.estimated_fee, 209);
    assert_eq!(details.need, 10_209);
    assert_eq!(details.deficit, 2209);
    assert_eq!(details.stats.count, 2);
    assert_eq!(details.stats.min, 3000);
    assert_eq!(details.stats.max, 5000);
    assert!(!details.recommendations.is_empty());

    let message = err.to_string();
    assert!(message.starts_with("Insufficient funds: have 8000 sats, need 10209 sats"));
    assert!(message.contains("deficit: 2209 sats"));
    assert!(err.user_message().contains("median"));

    let tiers = details.diagnostics.attempted_tiers();
    assert_eq!(
        tiers,
        vec![
            SelectionTier::ExactMatch,
            SelectionTier::GreedyLargestFirst,
            SelectionTier::BranchAndBound,
        ]
    );
}

#[test]
fn test_single_utxo_with_change() {
    setup();
    let selector = UtxoSelector::new();
    let result = selector
        .select_utxos(&p2wpkh_utxos(&[50_000]), &pay(20_000), dec!(10))
        .unwrap();

    assert_eq!(result.input_count(), 1);
    assert_eq!(result.vsize, 141);
    assert_eq!(result.fee, Amount::from_sat(1410));
    assert_eq!(result.change, Amount::from_sat(50_000 - 20_000 - 1410));
    assert!(result.change.to_sat() >= selector.dust_threshold());
    assert_eq!(
        result.change_output,
        Some(Output::new(28_590, ScriptType::P2wpkh))
    );
    assert_eq!(result.tier, SelectionTier::GreedyLargestFirst);
}

#[test]
fn test_exact_match_avoids_change() {
    setup();
    let selector = UtxoSelector::new();
    // 1-in 1-out at 1 sat/vB costs 110 sats
    let utxos = p2wpkh_utxos(&[100_000, 20_110, 10_000, 10_200]);
    let result = selector.select_utxos(&utxos, &pay(20_000), dec!(1)).unwrap();

    assert_eq!(result.tier, SelectionTier::ExactMatch);
    assert_eq!(result.input_count(), 1);
    assert_eq!(result.selected_utxos[0].value_sat(), 20_110);
    assert_eq!(result.change, Amount::ZERO);
    assert!(result.change_output.is_none());
    assert_eq!(result.fee, Amount::from_sat(110));
}

#[test]
fn test_sub_dust_leftover_is_absorbed() {
    setup();
    let selector = UtxoSelector::new();
    let result = selector
        .select_utxos(&p2wpkh_utxos(&[20_200]), &pay(20_000), dec!(1))
        .unwrap();

    assert_eq!(result.change, Amount::ZERO);
    assert_eq!(result.fee, Amount::from_sat(200));
    // Spending below the long-term rate outweighs the 90 sats burned
    assert!(result.waste_score < 0);
}

#[test]
fn test_uneconomical_utxos_are_filtered_but_reported() {
    setup();
    let selector = UtxoSelector::new();
    // Spending a P2WPKH input costs 680 sats at 10 sat/vB
    let utxos = p2wpkh_utxos(&[500, 100_000]);
    let result = selector.select_utxos(&utxos, &pay(20_000), dec!(10)).unwrap();

    assert_eq!(result.input_count(), 1);
    assert_eq!(result.selected_utxos[0].value_sat(), 100_000);
    assert_eq!(result.diagnostics.available_count, 2);
    assert_eq!(result.diagnostics.spendable_count, 1);
    assert_eq!(result.diagnostics.dust_filtered.len(), 1);
    assert_eq!(result.diagnostics.dust_filtered[0].value_sat(), 500);
}

#[test]
fn test_all_dust() {
    setup();
    let selector = UtxoSelector::new();
    let err = selector
        .select_utxos(&p2wpkh_utxos(&[500, 600]), &pay(1000), dec!(10))
        .unwrap_err();

    assert_eq!(err.kind(), "all_utxos_dust");
    let SelectionError::AllUtxosDust(details) = &err else {
        panic!("expected all dust, got {:?}", err);
    };
    assert_eq!(details.count, 2);
    assert_eq!(details.total_value, 1100);
    assert_eq!(details.min_spend_cost, 680);
    assert!(!err.recommendations().is_empty());

    // The same coins are fine at a lower rate
    assert!(selector
        .select_utxos(&p2wpkh_utxos(&[5000, 6000]), &pay(1000), dec!(1))
        .is_ok());
}

#[test]
fn test_no_utxos() {
    setup();
    let selector = UtxoSelector::new();
    let err = selector.select_utxos(&[], &pay(1000), dec!(1)).unwrap_err();
    assert_eq!(err.kind(), "no_spendable_utxos");
    assert_eq!(err.diagnostics().map(|d| d.available_count), Some(0));
}

#[test]
fn test_unspendable_script_types_are_skipped() {
    setup();
    let selector = UtxoSelector::new();
    let utxos = vec![
        utxo_of(0, 50_000, ScriptType::OpReturn),
        utxo_of(1, 70_000, ScriptType::OpReturn),
    ];
    let err = selector.select_utxos(&utxos, &pay(1000), dec!(1)).unwrap_err();
    assert_eq!(err.kind(), "no_spendable_utxos");
    assert_eq!(err.diagnostics().map(|d| d.unspendable.len()), Some(2));
}

#[test]
fn test_invalid_fee_rate() {
    setup();
    let selector = UtxoSelector::new();
    let utxos = p2wpkh_utxos(&[50_000]);
    for rate in [dec!(0), dec!(-1)] {
        let err = selector.select_utxos(&utxos, &pay(1000), rate).unwrap_err();
        assert_eq!(err, SelectionError::InvalidFeeRate(rate));
        assert!(err.diagnostics().is_none());
    }
}

#[test]
fn test_fewer_inputs_preferred() {
    setup();
    let selector = UtxoSelector::new();
    let utxos = p2wpkh_utxos(&[30_000, 30_000, 30_000, 80_000]);
    let result = selector.select_utxos(&utxos, &pay(60_000), dec!(2)).unwrap();
    assert_eq!(result.input_count(), 1);
    assert_eq!(result.selected_utxos[0].value_sat(), 80_000);
}

#[test]
fn test_over_waste_greedy_result_is_kept_when_nothing_beats_it() {
    setup();
    let selector = UtxoSelector::new();
    // Fee rate far above the long-term rate makes any input wasteful
    let result = selector
        .select_utxos(&p2wpkh_utxos(&[100_000]), &pay(1000), dec!(50))
        .unwrap();

    assert_eq!(result.tier, SelectionTier::GreedyLargestFirst);
    let attempts = &result.diagnostics.attempts;
    assert_eq!(attempts.len(), 3);
    assert!(matches!(
        attempts[1].outcome,
        TierOutcome::Rejected {
            reason: RejectionReason::OverWaste { .. }
        }
    ));
    assert!(matches!(
        attempts[2].outcome,
        TierOutcome::Rejected {
            reason: RejectionReason::NotImproved
        }
    ));
}

#[test]
fn test_branch_and_bound_beats_wasteful_greedy_pick() {
    setup();
    let selector = UtxoSelector::new();
    let utxos = vec![
        utxo_of(0, 200_000, ScriptType::P2pkh),
        utxo_of(1, 60_000, ScriptType::P2tr),
    ];
    let result = selector.select_utxos(&utxos, &pay(50_000), dec!(50)).unwrap();

    assert_eq!(result.tier, SelectionTier::BranchAndBound);
    assert_eq!(result.input_count(), 1);
    assert_eq!(result.selected_utxos[0].script_type, ScriptType::P2tr);
    // 1 P2TR in, payment and change: 130 vB at 50 sat/vB
    assert_eq!(result.vsize, 130);
    assert_eq!(result.fee, Amount::from_sat(6500));
    assert_eq!(result.change, Amount::from_sat(3500));
    // 58 vB x (50 - 10) + cost of change (1550 + 680)
    assert_eq!(result.waste_score, 4550);

    let attempts = &result.diagnostics.attempts;
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts[0].outcome,
        TierOutcome::Rejected {
            reason: RejectionReason::NoMatch
        }
    );
    assert_eq!(
        attempts[1].outcome,
        TierOutcome::Rejected {
            reason: RejectionReason::OverWaste {
                waste: 8150,
                limit: 5000
            }
        }
    );
    assert_eq!(attempts[2].tier, SelectionTier::BranchAndBound);
    assert_eq!(
        attempts[2].outcome,
        TierOutcome::Selected {
            inputs: 1,
            waste: 4550
        }
    );
}

#[test]
fn test_out_of_range_amounts_do_not_overflow() {
    setup();
    let selector = UtxoSelector::new();

    let mut utxos = p2wpkh_utxos(&[50_000]);
    utxos.push(utxo_of(7, u64::MAX, ScriptType::P2wpkh));
    let result = selector.select_utxos(&utxos, &pay(20_000), dec!(10)).unwrap();
    assert_eq!(result.input_count(), 1);
    assert_eq!(result.selected_utxos[0].value_sat(), 50_000);
    assert_eq!(result.diagnostics.unspendable.len(), 1);

    let outputs = vec![
        Output::new(u64::MAX, ScriptType::P2wpkh),
        Output::new(u64::MAX, ScriptType::P2wpkh),
    ];
    let err = selector
        .select_utxos(&p2wpkh_utxos(&[50_000, 30_000]), &outputs, dec!(1))
        .unwrap_err();
    let SelectionError::InsufficientFunds(details) = &err else {
        panic!("expected insufficient funds, got {:?}", err);
    };
    assert_eq!(details.target, u64::MAX);
    assert_eq!(details.have, 80_000);
    assert_eq!(details.need, u64::MAX);
}

#[test]
fn test_later_tiers_skipped_after_success() {
    setup();
    let selector = UtxoSelector::new();
    let result = selector
        .select_utxos(&p2wpkh_utxos(&[50_000]), &pay(20_000), dec!(10))
        .unwrap();
    let last = result.diagnostics.attempts.last().unwrap();
    assert_eq!(last.tier, SelectionTier::BranchAndBound);
    assert_eq!(last.outcome, TierOutcome::Skipped);
    assert_eq!(last.duration_ms, 0);
}

#[test]
fn test_tier_attempts_carry_duration() {
    setup();
    let selector = UtxoSelector::new();
    let result = selector
        .select_utxos(&p2wpkh_utxos(&[50_000, 30_000]), &pay(20_000), dec!(10))
        .unwrap();

    let json = serde_json::to_value(&result.diagnostics).unwrap();
    let attempts = json["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 3);
    for attempt in attempts {
        assert!(attempt["duration_ms"].is_u64());
    }

    // Records written before durations were tracked still load
    let mut legacy = attempts[0].clone();
    legacy.as_object_mut().unwrap().remove("duration_ms");
    let restored: bitvault_fees::utxo_selection::TierAttempt =
        serde_json::from_value(legacy).unwrap();
    assert_eq!(restored.duration_ms, 0);
    assert_eq!(restored.tier, result.diagnostics.attempts[0].tier);
}

#[test]
fn test_taproot_change_type() {
    setup();
    let selector = UtxoSelector::new().with_change_type(ScriptType::P2tr);
    assert_eq!(selector.dust_threshold(), 330);

    let result = selector
        .select_utxos(&p2wpkh_utxos(&[50_000]), &pay(20_000), dec!(1))
        .unwrap();
    assert_eq!(
        result.change_output.map(|o| o.script_type),
        Some(ScriptType::P2tr)
    );
}

#[test]
fn test_custom_config_is_respected() {
    setup();
    let config = SelectionConfig {
        bnb_candidate_limit: 2,
        ..SelectionConfig::default()
    };
    let selector = UtxoSelector::with_config(config, DustPolicy::default());
    assert_eq!(selector.config().bnb_candidate_limit, 2);

    let result = selector
        .select_utxos(&p2wpkh_utxos(&[40_000, 30_000, 20_000]), &pay(60_000), dec!(1))
        .unwrap();
    assert_eq!(result.input_count(), 2);
}

#[test]
fn test_legacy_inputs_priced_correctly() {
    setup();
    let selector = UtxoSelector::new();
    let utxos = vec![utxo_of(0, 100_000, ScriptType::P2pkh)];
    let result = selector.select_utxos(&utxos, &pay(20_000), dec!(1)).unwrap();

    let spec = TransactionSizeSpec::for_spend(&result.selected_utxos, &pay(20_000))
        .with_change(ScriptType::P2wpkh);
    assert_eq!(result.vsize, SizeEstimator::quiet().estimate_size(&spec));
    assert_eq!(result.vsize, 10 + 148 + 31 + 31);
}

const FUNDING_TYPES: [ScriptType; 5] = [
    ScriptType::P2pkh,
    ScriptType::P2sh,
    ScriptType::P2wpkh,
    ScriptType::P2wsh,
    ScriptType::P2tr,
];

#[derive(Debug, Clone)]
struct Scenario {
    utxos: Vec<(u64, ScriptType)>,
    target: u64,
    fee_rate: u64,
}

impl Scenario {
    fn utxos(&self) -> Vec<Utxo> {
        self.utxos
            .iter()
            .enumerate()
            .map(|(i, (value, script_type))| utxo_of(i as u32, *value, *script_type))
            .collect()
    }
}

impl Arbitrary for Scenario {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = 1 + usize::arbitrary(g) % 10;
        let utxos = (0..count)
            .map(|_| {
                let script_type = *g.choose(&FUNDING_TYPES).unwrap_or(&ScriptType::P2wpkh);
                (1_000 + u64::arbitrary(g) % 500_000, script_type)
            })
            .collect();
        Scenario {
            utxos,
            target: 1_000 + u64::arbitrary(g) % 1_000_000,
            fee_rate: 1 + u64::arbitrary(g) % 60,
        }
    }
}

#[quickcheck]
fn selection_balances_and_never_creates_dust_change(scenario: Scenario) -> TestResult {
    let selector = UtxoSelector::new();
    let outputs = pay(scenario.target);
    let fee_rate = Decimal::from(scenario.fee_rate);

    match selector.select_utxos(&scenario.utxos(), &outputs, fee_rate) {
        Ok(result) => {
            let balanced = result.total_input_value.to_sat()
                == total_output_value(&outputs) + result.fee.to_sat() + result.change.to_sat();
            let change = result.change.to_sat();
            let change_ok = change == 0 || change >= selector.dust_threshold();
            let fee_ok = result.fee.to_sat() >= calculate_fee(fee_rate, result.vsize);
            let sum: u64 = result.selected_utxos.iter().map(Utxo::value_sat).sum();
            TestResult::from_bool(
                balanced && change_ok && fee_ok && sum == result.total_input_value.to_sat(),
            )
        }
        Err(SelectionError::InsufficientFunds(details)) => {
            TestResult::from_bool(details.deficit > 0 && details.need > details.have)
        }
        Err(SelectionError::AllUtxosDust(_)) => TestResult::discard(),
        Err(other) => TestResult::error(format!("unexpected error: {}", other)),
    }
}
