//! Tests for transaction size estimation
//!
//! Reference sizes are the commonly quoted vbyte figures for standard
//! transaction shapes.

use bitvault_fees::logging::{self, LogConfig, LogLevel};
use bitvault_fees::size_estimator::{calculate_fee, DustPolicy, SizeEstimator, SizeWarning};
use bitvault_fees::types::{ScriptType, TransactionSizeSpec};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use rust_decimal_macros::dec;
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

#[test]
fn test_legacy_one_in_two_out() {
    setup();
    let spec = TransactionSizeSpec::new()
        .with_input(ScriptType::P2pkh, false)
        .with_output(ScriptType::P2pkh)
        .with_change(ScriptType::P2pkh);

    let estimate = SizeEstimator::new().estimate(&spec);
    assert_eq!(estimate.vsize, 226);
    assert_eq!(estimate.weight, 904);
    assert_eq!(estimate.witness_bytes, 0);
    assert!(estimate.warnings.is_empty());
}

#[test]
fn test_native_segwit_one_in_one_out() {
    setup();
    let spec = TransactionSizeSpec::new()
        .with_input(ScriptType::P2wpkh, true)
        .with_output(ScriptType::P2wpkh);

    let estimate = SizeEstimator::new().estimate(&spec);
    // 82 non-witness bytes, marker/flag + 108 witness bytes
    assert_eq!(estimate.non_witness_bytes, 82);
    assert_eq!(estimate.witness_bytes, 110);
    assert_eq!(estimate.weight, 438);
    assert_eq!(estimate.vsize, 110);
}

#[test]
fn test_taproot_key_path() {
    setup();
    let spec = TransactionSizeSpec::new()
        .with_input(ScriptType::P2tr, true)
        .with_output(ScriptType::P2tr);
    assert_eq!(SizeEstimator::new().estimate_size(&spec), 111);
}

#[test]
fn test_change_output_adds_its_size() {
    setup();
    let estimator = SizeEstimator::new();
    let base = TransactionSizeSpec::new()
        .with_input(ScriptType::P2wpkh, true)
        .with_output(ScriptType::P2wpkh);

    let without = estimator.estimate_weight(&base);
    let with = estimator.estimate_weight(&base.clone().with_change(ScriptType::P2wpkh));
    assert_eq!(with - without, 31 * 4);
}

#[test]
fn test_mixed_inputs_pay_for_empty_witness_stacks() {
    setup();
    let spec = TransactionSizeSpec::new()
        .with_input(ScriptType::P2pkh, false)
        .with_input(ScriptType::P2wpkh, true)
        .with_output(ScriptType::P2wpkh);

    let estimate = SizeEstimator::new().estimate(&spec);
    // marker/flag, one P2WPKH stack and one empty stack for the legacy input
    assert_eq!(estimate.witness_bytes, 2 + 108 + 1);
}

#[test]
fn test_unknown_types_fall_back_with_warnings() {
    setup();
    let spec = TransactionSizeSpec::new()
        .with_input(ScriptType::Unknown, false)
        .with_output(ScriptType::Unknown);

    let estimate = SizeEstimator::new().estimate(&spec);
    assert!(estimate.vsize > 0);
    assert_eq!(
        estimate.warnings,
        vec![
            SizeWarning::UnknownInputType(ScriptType::Unknown),
            SizeWarning::UnknownOutputType(ScriptType::Unknown),
        ]
    );
    // Fallbacks are the largest standard sizes
    assert_eq!(estimate.non_witness_bytes, 10 + 148 + 43);
}

#[test]
fn test_witness_flag_without_witness_data_warns() {
    setup();
    let flagged = TransactionSizeSpec::new()
        .with_input(ScriptType::P2pkh, true)
        .with_output(ScriptType::P2wpkh);
    let estimate = SizeEstimator::quiet().estimate(&flagged);
    assert_eq!(
        estimate.warnings,
        vec![SizeWarning::WitnessFlagWithoutWitnessData(ScriptType::P2pkh)]
    );

    let unflagged = TransactionSizeSpec::new()
        .with_input(ScriptType::P2wpkh, false)
        .with_output(ScriptType::P2wpkh);
    let estimate = SizeEstimator::quiet().estimate(&unflagged);
    assert!(estimate.warnings.is_empty());
    assert_eq!(estimate.witness_bytes, 0);
}

#[test]
fn test_empty_spec_is_just_overhead() {
    setup();
    let spec = TransactionSizeSpec::new();
    assert_eq!(SizeEstimator::new().estimate_size(&spec), 10);
}

#[test]
fn test_many_outputs_use_larger_varint() {
    setup();
    let estimator = SizeEstimator::new();
    let spec_252 = TransactionSizeSpec::new()
        .with_input(ScriptType::P2pkh, false)
        .with_outputs(ScriptType::P2pkh, 252);
    let spec_253 = spec_252.clone().with_output(ScriptType::P2pkh);

    // 34-byte output plus 2 extra varint bytes
    assert_eq!(
        estimator.estimate_size(&spec_253) - estimator.estimate_size(&spec_252),
        36
    );
}

#[test]
fn test_fee_rounds_up() {
    assert_eq!(calculate_fee(dec!(1), 141), 141);
    assert_eq!(calculate_fee(dec!(1.5), 141), 212);
    assert_eq!(calculate_fee(dec!(0.1), 1), 1);
}

#[test]
fn test_dust_thresholds() {
    let dust = DustPolicy::default();
    assert_eq!(dust.threshold(ScriptType::P2pkh), 546);
    assert_eq!(dust.threshold(ScriptType::P2sh), 540);
    assert_eq!(dust.threshold(ScriptType::P2wpkh), 294);
    assert_eq!(dust.threshold(ScriptType::P2wsh), 330);
    assert_eq!(dust.threshold(ScriptType::P2tr), 330);
    assert_eq!(dust.threshold(ScriptType::OpReturn), 0);
    assert!(dust.is_dust(293, ScriptType::P2wpkh));
    assert!(!dust.is_dust(294, ScriptType::P2wpkh));

    let strict = DustPolicy::new(dec!(3), dec!(2));
    assert_eq!(strict.threshold(ScriptType::P2wpkh), 588);
}

#[derive(Debug, Clone)]
struct ArbSpec {
    spec: TransactionSizeSpec,
    extra: ScriptType,
}

fn arb_type(g: &mut Gen) -> ScriptType {
    *g.choose(&ScriptType::ALL).unwrap_or(&ScriptType::P2wpkh)
}

impl Arbitrary for ArbSpec {
    fn arbitrary(g: &mut Gen) -> Self {
        let inputs = usize::arbitrary(g) % 8;
        let outputs = usize::arbitrary(g) % 8;
        let mut spec = TransactionSizeSpec::new();
        for _ in 0..inputs {
            spec = spec.with_input(arb_type(g), bool::arbitrary(g));
        }
        for _ in 0..outputs {
            spec = spec.with_output(arb_type(g));
        }
        if bool::arbitrary(g) {
            spec = spec.with_change(arb_type(g));
        }
        ArbSpec {
            spec,
            extra: arb_type(g),
        }
    }
}

#[quickcheck]
fn adding_a_witness_input_never_shrinks(arb: ArbSpec) -> bool {
    let estimator = SizeEstimator::quiet();
    let before = estimator.estimate_size(&arb.spec);
    let after = estimator.estimate_size(&arb.spec.clone().with_input(arb.extra, true));
    after >= before
}

#[quickcheck]
fn estimate_is_deterministic(arb: ArbSpec) -> bool {
    let estimator = SizeEstimator::quiet();
    estimator.estimate(&arb.spec) == estimator.estimate(&arb.spec)
}

#[quickcheck]
fn non_empty_specs_have_positive_size(arb: ArbSpec) -> bool {
    let estimate = SizeEstimator::quiet().estimate(&arb.spec);
    let vsize_matches_weight = estimate.vsize == (estimate.weight + 3) / 4;
    let positive = arb.spec.inputs.is_empty() && arb.spec.output_count() == 0 || estimate.vsize > 0;
    vsize_matches_weight && positive
}
