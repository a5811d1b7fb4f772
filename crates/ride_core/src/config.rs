//! Engine configuration.
//!
//! Loaded from JSON; every field has a default so an empty object `{}` is a
//! valid configuration. Call [EngineConfig::validate] (done by
//! [crate::engine::RideEngine::new]) before use.

use std::fs;
use std::path::Path;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::catalog::{default_coupons, PricingCatalog};
use crate::error::ConfigError;
use crate::fare::{
    Coupon, DiscountKind, FarePolicy, RateCards, DEFAULT_INSURANCE_FEE, DEFAULT_ROUNDING_UNIT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FareConfig {
    pub rounding_unit: u64,
    pub insurance_fee: u64,
    pub rate_cards: RateCards,
    pub coupons: Vec<Coupon>,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            rounding_unit: DEFAULT_ROUNDING_UNIT,
            insurance_fee: DEFAULT_INSURANCE_FEE,
            rate_cards: RateCards::default(),
            coupons: default_coupons(),
        }
    }
}

impl FareConfig {
    pub fn catalog(&self) -> PricingCatalog {
        PricingCatalog::new(
            self.rate_cards.clone(),
            FarePolicy {
                rounding_unit: self.rounding_unit,
                insurance_fee: self.insurance_fee,
            },
            self.coupons.clone(),
        )
    }
}

/// Matching coordinator policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
pub struct MatchingConfig {
    /// Seconds a candidate has to confirm an offer before it is auto-declined.
    pub offer_timeout_secs: u64,
    /// Length of a scheduled ride's backup chain, including the active entry.
    pub backup_capacity: usize,
    /// Seconds a quote stays usable for a match request.
    pub quote_ttl_secs: u64,
    /// Ranked candidates tried per search round before backing off.
    pub max_reserve_attempts: usize,
    /// Delay before searching again when every attempt lost a reservation race.
    pub search_retry_secs: u64,
    /// A session still searching this long after creation expires.
    pub max_search_secs: u64,
    /// Max H3 grid distance (cells) between pickup and candidate. 0 = same cell only.
    pub match_radius: u32,
    /// Assumed speed for pickup ETA estimates (km/h).
    pub eta_speed_kmh: f64,
    /// Seed for ranking tie-breaks.
    pub seed: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            offer_timeout_secs: 30,
            backup_capacity: 3,
            quote_ttl_secs: 300,
            max_reserve_attempts: 5,
            search_retry_secs: 5,
            max_search_secs: 600,
            match_radius: 20,
            eta_speed_kmh: 40.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Unix ms corresponding to engine time 0. `None` uses the wall clock at startup.
    pub epoch_ms: Option<i64>,
    pub fare: FareConfig,
    pub matching: MatchingConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_epoch_ms(mut self, epoch_ms: i64) -> Self {
        self.epoch_ms = Some(epoch_ms);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.matching.seed = seed;
        self
    }

    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        let fare = &self.fare;
        if fare.rounding_unit == 0 {
            return invalid("fare.rounding_unit must be at least 1".into());
        }
        if fare.rate_cards.is_empty() {
            return invalid("fare.rate_cards cannot be empty".into());
        }
        for (class, card) in fare.rate_cards.iter() {
            let fields = [card.base, card.per_km, card.per_minute];
            if fields.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return invalid(format!(
                    "rate card `{class}` must have non-negative finite rates"
                ));
            }
        }
        for coupon in &fare.coupons {
            if coupon.code.trim().is_empty() {
                return invalid("coupon code cannot be empty".into());
            }
            let in_range = match coupon.kind {
                DiscountKind::Percentage => (0.0..=100.0).contains(&coupon.value),
                DiscountKind::Fixed => coupon.value.is_finite() && coupon.value >= 0.0,
            };
            if !in_range {
                return invalid(format!(
                    "coupon `{}` has out-of-range value {}",
                    coupon.code, coupon.value
                ));
            }
        }

        let matching = &self.matching;
        if matching.offer_timeout_secs == 0 {
            return invalid("matching.offer_timeout_secs must be positive".into());
        }
        if matching.backup_capacity == 0 {
            return invalid("matching.backup_capacity must be at least 1".into());
        }
        if matching.quote_ttl_secs == 0 {
            return invalid("matching.quote_ttl_secs must be positive".into());
        }
        if matching.max_reserve_attempts == 0 {
            return invalid("matching.max_reserve_attempts must be at least 1".into());
        }
        if matching.search_retry_secs == 0 {
            return invalid("matching.search_retry_secs must be positive".into());
        }
        if matching.max_search_secs < matching.offer_timeout_secs {
            return invalid("matching.max_search_secs must cover at least one offer".into());
        }
        if !(matching.eta_speed_kmh.is_finite() && matching.eta_speed_kmh > 0.0) {
            return invalid("matching.eta_speed_kmh must be positive".into());
        }
        Ok(())
    }
}
