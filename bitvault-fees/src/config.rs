//! Configuration for the fee engine.
//!
//! All tunables live in [`EngineConfig`], which can be stored as TOML.
//! Every section has serde defaults, so a partial file (or an empty one)
//! yields a working configuration.
//!
//! Configuration is always passed explicitly to the components that need
//! it; nothing here reads process-global state.
//!
//! ```toml
//! [selection]
//! change_script_type = "P2WPKH"
//! long_term_fee_rate = "10"
//!
//! [default_breaker]
//! failure_threshold = 3
//! recovery_timeout_ms = 30000
//!
//! [breakers.quicknode]
//! timeout_ms = 5000
//! ```

use anyhow::{anyhow, bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::logging::LogConfig;
use crate::size_estimator::DustPolicy;
use crate::types::ScriptType;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub dust: DustPolicy,

    #[serde(default)]
    pub fee_validation: FeeValidationConfig,

    #[serde(default)]
    pub static_fallback: StaticFallbackRates,

    #[serde(default)]
    pub provider_chain: ProviderChainConfig,

    /// Breaker settings for providers without an override
    #[serde(default)]
    pub default_breaker: CircuitBreakerConfig,

    /// Per-provider breaker overrides, keyed by provider name
    #[serde(default)]
    pub breakers: HashMap<String, CircuitBreakerConfig>,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Coin selection tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Script type of change outputs
    #[serde(default = "default_change_script_type")]
    pub change_script_type: ScriptType,

    /// Fee rate (sat/vB) assumed for spending outputs later, used in waste scoring
    #[serde(default = "default_long_term_fee_rate")]
    pub long_term_fee_rate: Decimal,

    /// Greedy results wasting more than this share of the payment trigger a deeper search
    #[serde(default = "default_max_waste_fraction")]
    pub max_waste_fraction: Decimal,

    /// Search budget for the changeless match tier
    #[serde(default = "default_max_tries")]
    pub exact_match_max_tries: usize,

    /// Number of largest UTXOs the changeless match tier considers
    #[serde(default = "default_exact_match_candidate_limit")]
    pub exact_match_candidate_limit: usize,

    /// Search budget for branch and bound
    #[serde(default = "default_max_tries")]
    pub bnb_max_tries: usize,

    /// Number of largest UTXOs branch and bound considers
    #[serde(default = "default_bnb_candidate_limit")]
    pub bnb_candidate_limit: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            change_script_type: default_change_script_type(),
            long_term_fee_rate: default_long_term_fee_rate(),
            max_waste_fraction: default_max_waste_fraction(),
            exact_match_max_tries: default_max_tries(),
            exact_match_candidate_limit: default_exact_match_candidate_limit(),
            bnb_max_tries: default_max_tries(),
            bnb_candidate_limit: default_bnb_candidate_limit(),
        }
    }
}

/// Sanity bounds applied to every provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeValidationConfig {
    /// Lowest acceptable recommended fee (sat/vB)
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: u64,

    /// Highest acceptable recommended fee (sat/vB)
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: u64,

    /// How far in the future a provider timestamp may be
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,

    /// Rate changes beyond this factor versus the last accepted estimate are logged
    #[serde(default = "default_dramatic_change_factor")]
    pub dramatic_change_factor: u64,
}

impl Default for FeeValidationConfig {
    fn default() -> Self {
        Self {
            min_fee_rate: default_min_fee_rate(),
            max_fee_rate: default_max_fee_rate(),
            max_future_skew_secs: default_max_future_skew_secs(),
            dramatic_change_factor: default_dramatic_change_factor(),
        }
    }
}

/// Rates used when every provider has failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticFallbackRates {
    #[serde(default = "default_conservative_rate")]
    pub conservative: u64,

    #[serde(default = "default_normal_rate")]
    pub normal: u64,

    #[serde(default = "default_minimum_rate")]
    pub minimum: u64,
}

impl Default for StaticFallbackRates {
    fn default() -> Self {
        Self {
            conservative: default_conservative_rate(),
            normal: default_normal_rate(),
            minimum: default_minimum_rate(),
        }
    }
}

/// Retry behaviour of the provider chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChainConfig {
    /// Extra attempts per provider before moving to the next one
    #[serde(default)]
    pub max_retries: u32,

    /// First retry delay; doubles per attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for the retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ProviderChainConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl ProviderChainConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize config: {}", e))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = self.to_toml_string()?;
        fs::write(path.as_ref(), content)
            .map_err(|e| anyhow!("Failed to write config file: {}", e))
    }

    /// Breaker settings for a provider, falling back to the default
    pub fn breaker_config(&self, provider: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.selection.long_term_fee_rate < Decimal::ZERO {
            bail!("Invalid long-term fee rate: must not be negative");
        }
        if self.selection.max_waste_fraction < Decimal::ZERO {
            bail!("Invalid max waste fraction: must not be negative");
        }
        if self.selection.bnb_candidate_limit == 0 || self.selection.exact_match_candidate_limit == 0 {
            bail!("Invalid selection candidate limit: must be greater than 0");
        }
        if self.selection.change_script_type == ScriptType::OpReturn
            || self.selection.change_script_type == ScriptType::Unknown
        {
            bail!(
                "Invalid change script type: {}",
                self.selection.change_script_type
            );
        }

        if self.dust.dust_relay_fee < Decimal::ZERO || self.dust.dust_fee_rate_multiplier <= Decimal::ZERO {
            bail!("Invalid dust policy: relay fee must be >= 0 and multiplier > 0");
        }

        let validation = &self.fee_validation;
        if validation.min_fee_rate == 0 || validation.min_fee_rate > validation.max_fee_rate {
            bail!(
                "Invalid fee bounds: min {} / max {}",
                validation.min_fee_rate,
                validation.max_fee_rate
            );
        }

        let fallback = &self.static_fallback;
        if !(fallback.conservative >= fallback.normal && fallback.normal >= fallback.minimum) {
            bail!("Invalid static fallback rates: expected conservative >= normal >= minimum");
        }
        if fallback.conservative < validation.min_fee_rate
            || fallback.conservative > validation.max_fee_rate
        {
            bail!("Static fallback rate is outside the accepted fee bounds");
        }

        self.default_breaker
            .validate()
            .map_err(|e| anyhow!("default_breaker: {}", e))?;
        for (name, breaker) in &self.breakers {
            breaker
                .validate()
                .map_err(|e| anyhow!("breakers.{}: {}", name, e))?;
        }

        Ok(())
    }
}

// Default value functions

fn default_change_script_type() -> ScriptType {
    ScriptType::P2wpkh
}

fn default_long_term_fee_rate() -> Decimal {
    dec!(10)
}

fn default_max_waste_fraction() -> Decimal {
    dec!(0.10)
}

fn default_max_tries() -> usize {
    100_000
}

fn default_exact_match_candidate_limit() -> usize {
    64
}

fn default_bnb_candidate_limit() -> usize {
    25
}

fn default_min_fee_rate() -> u64 {
    1
}

fn default_max_fee_rate() -> u64 {
    1000
}

fn default_max_future_skew_secs() -> u64 {
    60
}

fn default_dramatic_change_factor() -> u64 {
    10
}

fn default_conservative_rate() -> u64 {
    10
}

fn default_normal_rate() -> u64 {
    6
}

fn default_minimum_rate() -> u64 {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}
