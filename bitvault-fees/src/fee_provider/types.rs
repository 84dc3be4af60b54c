//! Fee estimate types
//!
//! Providers answer in their own shapes. Each shape is a variant of
//! [`RawFeeResponse`] and is checked field by field when converted into
//! the canonical [`FeeEstimate`]; nothing downstream sees raw numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::circuit_breaker::BreakerFailure;
use crate::config::StaticFallbackRates;

/// Confidence in a fee estimate, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeConfidence {
    Low,
    Medium,
    High,
}

impl FeeConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeConfidence::Low => "low",
            FeeConfidence::Medium => "medium",
            FeeConfidence::High => "high",
        }
    }
}

impl fmt::Display for FeeConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical fee estimate, all rates in sat/vB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub recommended_fee: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_hour_fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economy_fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_fee: Option<u64>,
    pub confidence: FeeConfidence,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fallback_used: bool,
    /// Failures seen before this estimate was produced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FeeEstimate {
    /// Estimate from the built-in static rates
    pub fn from_static(rates: &StaticFallbackRates, errors: Vec<String>) -> Self {
        Self {
            recommended_fee: rates.conservative,
            fastest_fee: Some(rates.conservative),
            half_hour_fee: Some(rates.normal),
            hour_fee: Some(rates.normal),
            economy_fee: Some(rates.minimum),
            minimum_fee: Some(rates.minimum),
            confidence: FeeConfidence::Low,
            source: "static".to_string(),
            timestamp: Utc::now(),
            fallback_used: true,
            errors,
        }
    }

    /// Present tiered rates from fastest to minimum
    pub fn tiers(&self) -> Vec<u64> {
        [
            self.fastest_fee,
            self.half_hour_fee,
            self.hour_fee,
            self.economy_fee,
            self.minimum_fee,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn is_static(&self) -> bool {
        self.source == "static"
    }
}

/// mempool.space `/api/v1/fees/recommended` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolFees {
    pub fastest_fee: Option<f64>,
    pub half_hour_fee: Option<f64>,
    pub hour_fee: Option<f64>,
    pub economy_fee: Option<f64>,
    pub minimum_fee: Option<f64>,
    /// Reported by some self-hosted mempool backends
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `estimatesmartfee` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartFeeResponse {
    /// BTC per kvB
    pub feerate: Option<f64>,
    pub blocks: Option<u32>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Raw provider responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "data", rename_all = "snake_case")]
pub enum RawFeeResponse {
    Mempool(MempoolFees),
    QuickNode(SmartFeeResponse),
    Static(StaticFallbackRates),
}

impl RawFeeResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            RawFeeResponse::Mempool(_) => "mempool",
            RawFeeResponse::QuickNode(_) => "quicknode",
            RawFeeResponse::Static(_) => "static",
        }
    }

    /// Convert into a canonical estimate attributed to `source`
    ///
    /// Malformed numbers (missing, negative, non-finite) are rejected here;
    /// range and ordering checks belong to the validator.
    pub fn into_estimate(self, source: &str) -> Result<FeeEstimate, ProviderError> {
        match self {
            RawFeeResponse::Mempool(fees) => {
                let fastest = rate_field("fastestFee", fees.fastest_fee)?;
                let half_hour = rate_field("halfHourFee", fees.half_hour_fee)?;
                let recommended = fastest
                    .filter(|rate| *rate >= 1)
                    .or_else(|| half_hour.filter(|rate| *rate >= 1))
                    .ok_or_else(|| {
                        ProviderError::InvalidFeeData(
                            "neither fastestFee nor halfHourFee is usable".to_string(),
                        )
                    })?;

                Ok(FeeEstimate {
                    recommended_fee: recommended,
                    fastest_fee: fastest,
                    half_hour_fee: half_hour,
                    hour_fee: rate_field("hourFee", fees.hour_fee)?,
                    economy_fee: rate_field("economyFee", fees.economy_fee)?,
                    minimum_fee: rate_field("minimumFee", fees.minimum_fee)?,
                    confidence: FeeConfidence::High,
                    source: source.to_string(),
                    timestamp: fees.timestamp.unwrap_or_else(Utc::now),
                    fallback_used: false,
                    errors: Vec::new(),
                })
            }
            RawFeeResponse::QuickNode(smart) => {
                if !smart.errors.is_empty() && smart.feerate.is_none() {
                    return Err(ProviderError::InvalidFeeData(smart.errors.join("; ")));
                }
                let btc_per_kvb = smart.feerate.ok_or_else(|| {
                    ProviderError::MalformedResponse("estimatesmartfee returned no feerate".into())
                })?;
                let sat_per_vb = rate_value("feerate", btc_per_kvb * 100_000_000.0 / 1000.0)?;
                let confidence = match smart.blocks {
                    Some(blocks) if blocks <= 2 => FeeConfidence::High,
                    Some(blocks) if blocks <= 6 => FeeConfidence::Medium,
                    _ => FeeConfidence::Low,
                };

                Ok(FeeEstimate {
                    recommended_fee: sat_per_vb,
                    fastest_fee: None,
                    half_hour_fee: None,
                    hour_fee: None,
                    economy_fee: None,
                    minimum_fee: None,
                    confidence,
                    source: source.to_string(),
                    timestamp: Utc::now(),
                    fallback_used: false,
                    errors: Vec::new(),
                })
            }
            RawFeeResponse::Static(rates) => {
                let mut estimate = FeeEstimate::from_static(&rates, Vec::new());
                estimate.source = source.to_string();
                Ok(estimate)
            }
        }
    }
}

fn rate_value(field: &str, value: f64) -> Result<u64, ProviderError> {
    if !value.is_finite() {
        return Err(ProviderError::InvalidFeeData(format!(
            "{} is not a finite number",
            field
        )));
    }
    if value < 0.0 {
        return Err(ProviderError::InvalidFeeData(format!(
            "{} is negative: {}",
            field, value
        )));
    }
    if value > u64::MAX as f64 {
        return Err(ProviderError::InvalidFeeData(format!(
            "{} is out of range: {}",
            field, value
        )));
    }
    Ok(value.round() as u64)
}

fn rate_field(field: &str, value: Option<f64>) -> Result<Option<u64>, ProviderError> {
    value.map(|v| rate_value(field, v)).transpose()
}

/// Errors from a single fee provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Invalid fee data: {0}")]
    InvalidFeeData(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Provider unavailable for legal reasons: {0}")]
    LegalRestriction(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::InvalidFeeData(_) => "invalid_fee_data",
            ProviderError::Transport(_) => "transport",
            ProviderError::HttpStatus { .. } => "http_status",
            ProviderError::LegalRestriction(_) => "legal_restriction",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::Rpc { .. } => "rpc",
        }
    }
}

impl BreakerFailure for ProviderError {
    fn permanent_reason(&self) -> Option<String> {
        match self {
            ProviderError::LegalRestriction(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ProviderError::MalformedResponse(error.to_string())
        } else {
            match error.status() {
                Some(status) => ProviderError::HttpStatus {
                    status: status.as_u16(),
                    message: error.to_string(),
                },
                None => ProviderError::Transport(error.to_string()),
            }
        }
    }
}
