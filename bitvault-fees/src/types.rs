//! Core data types shared by the sizing, selection and estimation layers
//!
//! These types describe what the engine is handed by its collaborators
//! (UTXO lists from a blockchain source, outputs requested by the caller)
//! and the stateless size specification consumed by the
//! [`SizeEstimator`](crate::size_estimator::SizeEstimator).
//!
//! A [`Utxo`] is immutable once fetched. Selection filters and copies
//! UTXOs into result sets but never mutates them.

use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Script template of an input or output
///
/// The set is closed: anything a UTXO source reports that we do not
/// recognise is mapped to [`ScriptType::Unknown`] and priced with
/// conservative fallback sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptType {
    /// Legacy pay-to-pubkey-hash
    #[serde(rename = "P2PKH")]
    P2pkh,
    /// Pay-to-script-hash (nested segwit when witness-flagged)
    #[serde(rename = "P2SH")]
    P2sh,
    /// Native segwit v0 pay-to-witness-pubkey-hash
    #[serde(rename = "P2WPKH")]
    P2wpkh,
    /// Native segwit v0 pay-to-witness-script-hash
    #[serde(rename = "P2WSH")]
    P2wsh,
    /// Taproot (segwit v1)
    #[serde(rename = "P2TR")]
    P2tr,
    /// Provably unspendable data carrier
    #[serde(rename = "OP_RETURN")]
    OpReturn,
    /// Anything else
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl ScriptType {
    /// All script types, in declaration order
    pub const ALL: [ScriptType; 7] = [
        ScriptType::P2pkh,
        ScriptType::P2sh,
        ScriptType::P2wpkh,
        ScriptType::P2wsh,
        ScriptType::P2tr,
        ScriptType::OpReturn,
        ScriptType::Unknown,
    ];

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::P2pkh => "P2PKH",
            ScriptType::P2sh => "P2SH",
            ScriptType::P2wpkh => "P2WPKH",
            ScriptType::P2wsh => "P2WSH",
            ScriptType::P2tr => "P2TR",
            ScriptType::OpReturn => "OP_RETURN",
            ScriptType::Unknown => "UNKNOWN",
        }
    }

    /// Whether outputs of this type are spent with witness data by default
    ///
    /// P2SH is reported as non-witness here; nested segwit P2SH inputs must
    /// be flagged explicitly on the [`Utxo`].
    pub fn is_native_witness(&self) -> bool {
        matches!(self, ScriptType::P2wpkh | ScriptType::P2wsh | ScriptType::P2tr)
    }

    /// Whether an output of this type can ever be spent
    pub fn is_spendable(&self) -> bool {
        !matches!(self, ScriptType::OpReturn)
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = std::convert::Infallible;

    /// Parsing never fails: unrecognised names become `Unknown`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "P2PKH" => ScriptType::P2pkh,
            "P2SH" | "P2SH_P2WPKH" => ScriptType::P2sh,
            "P2WPKH" | "V0_P2WPKH" => ScriptType::P2wpkh,
            "P2WSH" | "V0_P2WSH" => ScriptType::P2wsh,
            "P2TR" | "V1_P2TR" => ScriptType::P2tr,
            "OP_RETURN" | "OPRETURN" | "NULLDATA" => ScriptType::OpReturn,
            _ => ScriptType::Unknown,
        })
    }
}

/// Unspent transaction output handed to the selector
///
/// Serialized in the shape UTXO sources deliver:
/// `{ "txid": hex64, "vout": u32, "value": sats, "scriptType": "P2WPKH" }`,
/// with an optional `isWitness` flag that defaults from the script type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "UtxoRecord", into = "UtxoRecord")]
pub struct Utxo {
    /// Reference to the transaction output (txid and vout)
    pub outpoint: OutPoint,
    /// Value held by the output
    pub value: Amount,
    /// Script template of the output being spent
    pub script_type: ScriptType,
    /// Whether spending this output carries witness data
    pub is_witness: bool,
}

impl Utxo {
    /// Create a UTXO, deriving the witness flag from the script type
    pub fn new(outpoint: OutPoint, value: Amount, script_type: ScriptType) -> Self {
        Self {
            outpoint,
            value,
            script_type,
            is_witness: script_type.is_native_witness(),
        }
    }

    /// Override the witness flag (e.g. nested segwit P2SH)
    pub fn with_witness(mut self, is_witness: bool) -> Self {
        self.is_witness = is_witness;
        self
    }

    /// Value in satoshis
    pub fn value_sat(&self) -> u64 {
        self.value.to_sat()
    }

    /// Size-spec view of this UTXO when used as an input
    pub fn input_spec(&self) -> TxInputSpec {
        TxInputSpec {
            script_type: self.script_type,
            is_witness: self.is_witness,
        }
    }
}

/// Wire shape of a [`Utxo`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UtxoRecord {
    txid: String,
    vout: u32,
    value: u64,
    script_type: ScriptType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_witness: Option<bool>,
}

impl TryFrom<UtxoRecord> for Utxo {
    type Error = String;

    fn try_from(record: UtxoRecord) -> Result<Self, Self::Error> {
        let txid = Txid::from_str(&record.txid)
            .map_err(|e| format!("invalid txid '{}': {}", record.txid, e))?;
        let utxo = Utxo::new(
            OutPoint::new(txid, record.vout),
            Amount::from_sat(record.value),
            record.script_type,
        );
        Ok(match record.is_witness {
            Some(flag) => utxo.with_witness(flag),
            None => utxo,
        })
    }
}

impl From<Utxo> for UtxoRecord {
    fn from(utxo: Utxo) -> Self {
        UtxoRecord {
            txid: utxo.outpoint.txid.to_string(),
            vout: utxo.outpoint.vout,
            value: utxo.value.to_sat(),
            script_type: utxo.script_type,
            is_witness: Some(utxo.is_witness),
        }
    }
}

/// Output to be funded by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Value sent to the output
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    /// Script template of the output
    pub script_type: ScriptType,
}

impl Output {
    /// Create an output from a satoshi value
    pub fn new(value_sat: u64, script_type: ScriptType) -> Self {
        Self {
            value: Amount::from_sat(value_sat),
            script_type,
        }
    }

    /// Value in satoshis
    pub fn value_sat(&self) -> u64 {
        self.value.to_sat()
    }
}

/// Sum of output values in satoshis
pub fn total_output_value(outputs: &[Output]) -> u64 {
    outputs
        .iter()
        .map(Output::value_sat)
        .fold(0, u64::saturating_add)
}

/// One input entry of a [`TransactionSizeSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInputSpec {
    pub script_type: ScriptType,
    pub is_witness: bool,
}

impl TxInputSpec {
    pub fn new(script_type: ScriptType, is_witness: bool) -> Self {
        Self { script_type, is_witness }
    }

    /// Input of the given type with its default witness flag
    pub fn of(script_type: ScriptType) -> Self {
        Self::new(script_type, script_type.is_native_witness())
    }
}

/// Everything the size estimator needs to price a transaction
///
/// Stateless and rebuilt for each estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSizeSpec {
    pub inputs: Vec<TxInputSpec>,
    pub outputs: Vec<ScriptType>,
    pub include_change_output: bool,
    pub change_output_type: ScriptType,
}

impl Default for TransactionSizeSpec {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            include_change_output: false,
            change_output_type: ScriptType::P2wpkh,
        }
    }
}

impl TransactionSizeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec for spending `utxos` into `outputs`, without change
    pub fn for_spend(utxos: &[Utxo], outputs: &[Output]) -> Self {
        Self {
            inputs: utxos.iter().map(Utxo::input_spec).collect(),
            outputs: outputs.iter().map(|o| o.script_type).collect(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, script_type: ScriptType, is_witness: bool) -> Self {
        self.inputs.push(TxInputSpec::new(script_type, is_witness));
        self
    }

    pub fn with_inputs(mut self, script_type: ScriptType, is_witness: bool, count: usize) -> Self {
        self.inputs
            .extend(std::iter::repeat(TxInputSpec::new(script_type, is_witness)).take(count));
        self
    }

    pub fn with_output(mut self, script_type: ScriptType) -> Self {
        self.outputs.push(script_type);
        self
    }

    pub fn with_outputs(mut self, script_type: ScriptType, count: usize) -> Self {
        self.outputs.extend(std::iter::repeat(script_type).take(count));
        self
    }

    /// Include a change output of the given type
    pub fn with_change(mut self, change_type: ScriptType) -> Self {
        self.include_change_output = true;
        self.change_output_type = change_type;
        self
    }

    /// Drop the change output, keeping the configured change type
    pub fn without_change(mut self) -> Self {
        self.include_change_output = false;
        self
    }

    /// Total number of outputs, counting change
    pub fn output_count(&self) -> usize {
        self.outputs.len() + usize::from(self.include_change_output)
    }

    pub fn has_witness_inputs(&self) -> bool {
        self.inputs.iter().any(|i| i.is_witness)
    }
}
