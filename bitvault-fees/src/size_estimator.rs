//! Transaction size estimation
//!
//! Computes BIP141 weight and virtual size for a [`TransactionSizeSpec`]
//! without building the transaction. Non-witness bytes count four weight
//! units each, witness bytes count one, and the virtual size is
//! `ceil(weight / 4)`.
//!
//! The estimator never fails. Script types without a table entry are
//! priced with conservative fallback sizes and reported as
//! [`SizeWarning`]s (also logged), so adversarial or incomplete input
//! still yields a usable, non-zero estimate.
//!
//! Example:
//! ```
//! use bitvault_fees::size_estimator::SizeEstimator;
//! use bitvault_fees::types::{ScriptType, TransactionSizeSpec};
//!
//! let spec = TransactionSizeSpec::new()
//!     .with_input(ScriptType::P2wpkh, true)
//!     .with_output(ScriptType::P2wpkh)
//!     .with_change(ScriptType::P2wpkh);
//!
//! // 1-in 2-out native segwit spend
//! assert_eq!(SizeEstimator::new().estimate_size(&spec), 141);
//! ```

use log::warn;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::logging::{log_sizing, LogLevel};
use crate::types::{ScriptType, TransactionSizeSpec, TxInputSpec};
use serde_json::json;

/// Transaction version field
pub const TX_VERSION_BYTES: usize = 4;
/// Transaction locktime field
pub const TX_LOCKTIME_BYTES: usize = 4;
/// Segwit marker and flag, counted as witness data
pub const SEGWIT_MARKER_FLAG_BYTES: usize = 2;
/// BIP141 witness discount
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Non-witness size used when an input's script type has no entry (legacy P2PKH)
pub const FALLBACK_INPUT_BYTES: usize = 148;
/// Output size used when an output's script type has no entry (largest standard output)
pub const FALLBACK_OUTPUT_BYTES: usize = 43;

// outpoint (36) + script length (1) + sequence (4)
const TXIN_BASE_BYTES: usize = 41;

/// Non-witness bytes of one input, if the script type is spendable and known
///
/// P2SH depends on the witness flag: nested P2WPKH carries a 23-byte
/// redeem script push, while bare P2SH is priced as a 2-of-3 multisig.
pub fn input_non_witness_bytes(input: &TxInputSpec) -> Option<usize> {
    match input.script_type {
        ScriptType::P2pkh => Some(148),
        ScriptType::P2sh if input.is_witness => Some(TXIN_BASE_BYTES + 23),
        ScriptType::P2sh => Some(297),
        ScriptType::P2wpkh | ScriptType::P2wsh | ScriptType::P2tr => Some(TXIN_BASE_BYTES),
        ScriptType::OpReturn | ScriptType::Unknown => None,
    }
}

/// Witness stack bytes (including the item count) for a witness spend of this type
pub fn input_witness_bytes(script_type: ScriptType) -> Option<usize> {
    match script_type {
        // count + sig + pubkey
        ScriptType::P2wpkh | ScriptType::P2sh => Some(1 + 73 + 34),
        // count + OP_0 dummy + 2 sigs + 2-of-3 witness script
        ScriptType::P2wsh => Some(1 + 1 + 2 * 73 + 106),
        // count + schnorr sig
        ScriptType::P2tr => Some(1 + 65),
        ScriptType::P2pkh | ScriptType::OpReturn | ScriptType::Unknown => None,
    }
}

/// Serialized bytes of one output (value + script length + script)
pub fn output_bytes(script_type: ScriptType) -> Option<usize> {
    match script_type {
        ScriptType::P2pkh => Some(34),
        ScriptType::P2sh => Some(32),
        ScriptType::P2wpkh => Some(31),
        ScriptType::P2wsh | ScriptType::P2tr => Some(43),
        // 8 value + 1 length + 34 script (OP_RETURN + 32-byte push)
        ScriptType::OpReturn => Some(43),
        ScriptType::Unknown => None,
    }
}

/// Length of a Bitcoin CompactSize integer
pub fn compact_size_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Convert weight units to virtual bytes, rounding up
pub fn weight_to_vsize(weight: usize) -> usize {
    (weight + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
}

/// Fee in satoshis for `vsize` virtual bytes at `fee_rate` sat/vB, rounded up
///
/// A non-positive rate yields 0; a product too large for `u64` saturates.
pub fn calculate_fee(fee_rate: Decimal, vsize: usize) -> u64 {
    match fee_rate.checked_mul(Decimal::from(vsize)) {
        Some(fee) if fee <= Decimal::ZERO => 0,
        Some(fee) => fee.ceil().to_u64().unwrap_or(u64::MAX),
        None => u64::MAX,
    }
}

/// Something the estimator had to guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeWarning {
    /// Input script type has no size entry; fallback size used
    UnknownInputType(ScriptType),
    /// Output script type has no size entry; fallback size used
    UnknownOutputType(ScriptType),
    /// Input is witness-flagged but its type defines no witness stack
    WitnessFlagWithoutWitnessData(ScriptType),
}

/// Detailed result of a size estimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEstimate {
    /// Virtual size in vbytes
    pub vsize: usize,
    /// BIP141 weight units
    pub weight: usize,
    /// Bytes counted at full weight
    pub non_witness_bytes: usize,
    /// Bytes counted at witness weight, including segwit framing
    pub witness_bytes: usize,
    /// Fallbacks applied during estimation
    pub warnings: Vec<SizeWarning>,
}

/// Pure transaction size estimator
///
/// Holds no mutable state: safe to share and call concurrently.
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimator {
    log_warnings: bool,
}

impl Default for SizeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeEstimator {
    pub fn new() -> Self {
        Self { log_warnings: true }
    }

    /// Estimator that records fallbacks in [`SizeEstimate::warnings`] without logging them
    ///
    /// Used inside search loops that price the same inputs many times.
    pub fn quiet() -> Self {
        Self { log_warnings: false }
    }

    /// Virtual size of the transaction described by `spec`
    pub fn estimate_size(&self, spec: &TransactionSizeSpec) -> usize {
        self.estimate(spec).vsize
    }

    /// Weight of the transaction described by `spec`
    pub fn estimate_weight(&self, spec: &TransactionSizeSpec) -> usize {
        self.estimate(spec).weight
    }

    /// Full breakdown of the estimate, including any fallbacks applied
    pub fn estimate(&self, spec: &TransactionSizeSpec) -> SizeEstimate {
        let mut warnings = Vec::new();

        let mut non_witness_bytes = TX_VERSION_BYTES
            + TX_LOCKTIME_BYTES
            + compact_size_len(spec.inputs.len())
            + compact_size_len(spec.output_count());

        let mut witness_bytes = 0;
        let mut empty_witness_stacks = 0;
        for input in &spec.inputs {
            non_witness_bytes += self.input_base_size(input, &mut warnings);
            let witness = self.input_witness_size(input, &mut warnings);
            if witness == 0 {
                empty_witness_stacks += 1;
            }
            witness_bytes += witness;
        }

        // Once any input is witness-flagged, every input serializes a witness
        // stack; inputs without one carry a single zero count byte.
        if spec.has_witness_inputs() {
            witness_bytes += SEGWIT_MARKER_FLAG_BYTES + empty_witness_stacks;
        }

        for output in &spec.outputs {
            non_witness_bytes += self.output_size(*output, &mut warnings);
        }
        if spec.include_change_output {
            non_witness_bytes += self.output_size(spec.change_output_type, &mut warnings);
        }

        let weight = non_witness_bytes * WITNESS_SCALE_FACTOR + witness_bytes;

        if self.log_warnings && !warnings.is_empty() {
            log_sizing(
                LogLevel::Debug,
                "size estimate used fallback sizes",
                Some(json!({
                    "warnings": warnings.len(),
                    "inputs": spec.inputs.len(),
                    "outputs": spec.output_count(),
                })),
            );
        }

        SizeEstimate {
            vsize: weight_to_vsize(weight),
            weight,
            non_witness_bytes,
            witness_bytes,
            warnings,
        }
    }

    /// Standalone virtual size one input adds to a segwit transaction
    ///
    /// Used to price spending a single UTXO (dust filter, waste scoring).
    pub fn input_vsize(&self, input: &TxInputSpec) -> usize {
        let mut scratch = Vec::new();
        let base = self.input_base_size(input, &mut scratch);
        let witness = self.input_witness_size(input, &mut scratch);
        base + weight_to_vsize(witness)
    }

    /// Virtual size one output adds
    pub fn output_vsize(&self, script_type: ScriptType) -> usize {
        output_bytes(script_type).unwrap_or(FALLBACK_OUTPUT_BYTES)
    }

    fn input_base_size(&self, input: &TxInputSpec, warnings: &mut Vec<SizeWarning>) -> usize {
        match input_non_witness_bytes(input) {
            Some(size) => size,
            None => {
                if self.log_warnings {
                    warn!(
                        "No input size for script type {}, assuming {} bytes",
                        input.script_type, FALLBACK_INPUT_BYTES
                    );
                }
                warnings.push(SizeWarning::UnknownInputType(input.script_type));
                FALLBACK_INPUT_BYTES
            }
        }
    }

    fn input_witness_size(&self, input: &TxInputSpec, warnings: &mut Vec<SizeWarning>) -> usize {
        if !input.is_witness {
            return 0;
        }
        match input_witness_bytes(input.script_type) {
            Some(size) => size,
            None => {
                if self.log_warnings {
                    warn!(
                        "Input of type {} is flagged as witness but has no witness stack size",
                        input.script_type
                    );
                }
                warnings.push(SizeWarning::WitnessFlagWithoutWitnessData(input.script_type));
                0
            }
        }
    }

    fn output_size(&self, script_type: ScriptType, warnings: &mut Vec<SizeWarning>) -> usize {
        match output_bytes(script_type) {
            Some(size) => size,
            None => {
                if self.log_warnings {
                    warn!(
                        "No output size for script type {}, assuming {} bytes",
                        script_type, FALLBACK_OUTPUT_BYTES
                    );
                }
                warnings.push(SizeWarning::UnknownOutputType(script_type));
                FALLBACK_OUTPUT_BYTES
            }
        }
    }
}

/// Relay dust policy
///
/// An output is dust when its value is below what it would cost to create
/// and later spend it at the dust relay fee, following Bitcoin Core's
/// `GetDustThreshold`. With the default 3 sat/vB this gives 546 sats for
/// P2PKH, 540 for P2SH, 294 for P2WPKH and 330 for P2WSH/P2TR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DustPolicy {
    /// Dust relay fee in sat/vB
    pub dust_relay_fee: Decimal,
    /// Scales the relay fee, for operators wanting stricter change rules
    pub dust_fee_rate_multiplier: Decimal,
}

impl Default for DustPolicy {
    fn default() -> Self {
        Self {
            dust_relay_fee: dec!(3),
            dust_fee_rate_multiplier: dec!(1),
        }
    }
}

impl DustPolicy {
    pub fn new(dust_relay_fee: Decimal, dust_fee_rate_multiplier: Decimal) -> Self {
        Self {
            dust_relay_fee,
            dust_fee_rate_multiplier,
        }
    }

    /// Smallest non-dust value for an output of `script_type`
    pub fn threshold(&self, script_type: ScriptType) -> u64 {
        let (output_size, spend_size) = match script_type {
            ScriptType::OpReturn => return 0,
            // Unknown scripts are treated like P2PKH, the most expensive standard case
            ScriptType::Unknown => (34, 148),
            ScriptType::P2pkh | ScriptType::P2sh => {
                (output_bytes(script_type).unwrap_or(34), 148)
            }
            // 32 + 4 + 1 + 107/4 + 4
            ScriptType::P2wpkh | ScriptType::P2wsh | ScriptType::P2tr => {
                (output_bytes(script_type).unwrap_or(43), 67)
            }
        };
        let rate = self.dust_relay_fee * self.dust_fee_rate_multiplier;
        calculate_fee(rate, output_size + spend_size)
    }

    /// Whether `value_sat` is dust for an output of `script_type`
    pub fn is_dust(&self, value_sat: u64, script_type: ScriptType) -> bool {
        value_sat < self.threshold(script_type)
    }
}
