//! Sanity checks for converted fee estimates
//!
//! A failed check is a provider failure: it is returned through the
//! provider's breaker like any transport error.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::warn;

use super::types::{FeeEstimate, ProviderError};
use crate::config::FeeValidationConfig;

#[derive(Debug, Clone, Default)]
pub struct FeeValidator {
    config: FeeValidationConfig,
}

impl FeeValidator {
    pub fn new(config: FeeValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeeValidationConfig {
        &self.config
    }

    pub fn validate(&self, estimate: &FeeEstimate) -> Result<(), ProviderError> {
        self.validate_at(estimate, Utc::now())
    }

    /// Validate against an explicit clock
    pub fn validate_at(&self, estimate: &FeeEstimate, now: DateTime<Utc>) -> Result<(), ProviderError> {
        check_monotonic(estimate)?;

        if estimate.recommended_fee < self.config.min_fee_rate {
            return Err(ProviderError::InvalidFeeData(format!(
                "recommended fee {} sat/vB is below the minimum of {}",
                estimate.recommended_fee, self.config.min_fee_rate
            )));
        }
        if estimate.recommended_fee > self.config.max_fee_rate {
            return Err(ProviderError::InvalidFeeData(format!(
                "recommended fee {} sat/vB exceeds the maximum of {}",
                estimate.recommended_fee, self.config.max_fee_rate
            )));
        }

        let skew = ChronoDuration::seconds(
            i64::try_from(self.config.max_future_skew_secs).unwrap_or(i64::MAX / 1000),
        );
        if estimate.timestamp > now + skew {
            return Err(ProviderError::InvalidFeeData(format!(
                "timestamp {} is in the future",
                estimate.timestamp.to_rfc3339()
            )));
        }

        Ok(())
    }

    /// Log when `current` moved more than the configured factor from `previous`
    ///
    /// Returns whether the change counted as dramatic. The estimate is
    /// accepted either way.
    pub fn check_dramatic_change(&self, previous: &FeeEstimate, current: &FeeEstimate) -> bool {
        let factor = self.config.dramatic_change_factor;
        if factor == 0 || previous.recommended_fee == 0 {
            return false;
        }

        let old = previous.recommended_fee;
        let new = current.recommended_fee;
        let dramatic = new > old.saturating_mul(factor) || new.saturating_mul(factor) < old;
        if dramatic {
            warn!(
                "Dramatic fee change from {}: {} -> {} sat/vB (previous source {})",
                current.source, old, new, previous.source
            );
        }
        dramatic
    }
}

/// Tiered rates must not increase from fastest to minimum
pub fn check_monotonic(estimate: &FeeEstimate) -> Result<(), ProviderError> {
    const NAMES: [&str; 5] = ["fastestFee", "halfHourFee", "hourFee", "economyFee", "minimumFee"];
    let tiers = [
        estimate.fastest_fee,
        estimate.half_hour_fee,
        estimate.hour_fee,
        estimate.economy_fee,
        estimate.minimum_fee,
    ];

    let mut previous: Option<(&str, u64)> = None;
    for (name, rate) in NAMES.into_iter().zip(tiers) {
        let Some(rate) = rate else { continue };
        if let Some((prev_name, prev_rate)) = previous {
            if rate > prev_rate {
                return Err(ProviderError::InvalidFeeData(format!(
                    "fee tiers out of order: {} ({}) > {} ({})",
                    name, rate, prev_name, prev_rate
                )));
            }
        }
        previous = Some((name, rate));
    }
    Ok(())
}
