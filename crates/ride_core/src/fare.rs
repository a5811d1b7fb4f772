//! Fare engine: converts a trip estimate into an itemized, currency-rounded price.
//!
//! Everything here is a pure function of its inputs. The caller supplies the
//! current time for coupon expiry checks, so quoting has no hidden clock.
//!
//! Composition order:
//!
//! 1. `base + distance_km * per_km + duration_min * per_minute`
//! 2. `× demand_multiplier`
//! 3. `× SHARING_DISCOUNT_FACTOR` for shared rides
//! 4. round, then floor at the rate card's minimum fare
//! 5. ceil to the rounding unit (this is `base_fare`)
//! 6. coupon against `base_fare`, result rounded to a whole unit
//! 7. flat insurance fee on top, never discounted

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FareError;

/// Shared rides cost 60% of the solo fare.
pub const SHARING_DISCOUNT_FACTOR: f64 = 0.6;

/// Quotes are ceiled to a multiple of this many currency units.
pub const DEFAULT_ROUNDING_UNIT: u64 = 10;

/// Flat ride insurance fee in currency units.
pub const DEFAULT_INSURANCE_FEE: u64 = 5;

/// Largest fare, in currency units, the engine will quote.
pub const MAX_FARE: u64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Auto,
    Mini,
    Sedan,
    Suv,
    WheelchairAccessible,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 5] = [
        VehicleClass::Auto,
        VehicleClass::Mini,
        VehicleClass::Sedan,
        VehicleClass::Suv,
        VehicleClass::WheelchairAccessible,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Auto => "auto",
            VehicleClass::Mini => "mini",
            VehicleClass::Sedan => "sedan",
            VehicleClass::Suv => "suv",
            VehicleClass::WheelchairAccessible => "wheelchair_accessible",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleClass {
    type Err = FareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        VehicleClass::ALL
            .into_iter()
            .find(|class| class.as_str() == normalized)
            .ok_or_else(|| FareError::UnknownVehicleClass(s.to_string()))
    }
}

/// Per-class tariff. Loaded once from configuration and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateCard {
    pub base: f64,
    pub per_km: f64,
    pub per_minute: f64,
    pub minimum_fare: u64,
}

impl RateCard {
    pub const fn new(base: f64, per_km: f64, per_minute: f64, minimum_fare: u64) -> Self {
        Self {
            base,
            per_km,
            per_minute,
            minimum_fare,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateCards(BTreeMap<VehicleClass, RateCard>);

impl RateCards {
    pub fn new(cards: impl IntoIterator<Item = (VehicleClass, RateCard)>) -> Self {
        Self(cards.into_iter().collect())
    }

    pub fn get(&self, class: VehicleClass) -> Result<&RateCard, FareError> {
        self.0
            .get(&class)
            .ok_or_else(|| FareError::UnknownVehicleClass(class.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VehicleClass, &RateCard)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RateCards {
    fn default() -> Self {
        Self::new([
            (VehicleClass::Auto, RateCard::new(30.0, 12.0, 1.0, 40)),
            (VehicleClass::Mini, RateCard::new(40.0, 15.0, 1.5, 60)),
            (VehicleClass::Sedan, RateCard::new(50.0, 18.0, 2.0, 80)),
            (VehicleClass::Suv, RateCard::new(60.0, 22.0, 2.5, 100)),
            (
                VehicleClass::WheelchairAccessible,
                RateCard::new(50.0, 18.0, 2.0, 80),
            ),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub distance_km: f64,
    pub duration_min: f64,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default = "default_demand_multiplier")]
    pub demand_multiplier: f64,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub insurance_requested: bool,
}

fn default_demand_multiplier() -> f64 {
    1.0
}

impl QuoteRequest {
    pub fn new(vehicle_class: VehicleClass, distance_km: f64, duration_min: f64) -> Self {
        Self {
            distance_km,
            duration_min,
            vehicle_class,
            is_shared: false,
            demand_multiplier: default_demand_multiplier(),
            coupon_code: None,
            insurance_requested: false,
        }
    }

    pub fn shared(mut self, is_shared: bool) -> Self {
        self.is_shared = is_shared;
        self
    }

    pub fn with_demand_multiplier(mut self, multiplier: f64) -> Self {
        self.demand_multiplier = multiplier;
        self
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn with_insurance(mut self, insurance_requested: bool) -> Self {
        self.insurance_requested = insurance_requested;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub kind: DiscountKind,
    /// Percent (0-100) for [DiscountKind::Percentage], currency units for [DiscountKind::Fixed].
    pub value: f64,
    pub min_fare: u64,
    pub expires_at: DateTime<Utc>,
}

impl Coupon {
    /// Checks expiry and minimum fare against the pre-coupon `fare`.
    pub fn validate(&self, fare: u64, now: DateTime<Utc>) -> Result<(), FareError> {
        if now > self.expires_at {
            return Err(FareError::ExpiredCoupon(self.code.clone()));
        }
        if fare < self.min_fare {
            return Err(FareError::CouponMinFareNotMet {
                code: self.code.clone(),
                min_fare: self.min_fare,
                fare,
            });
        }
        Ok(())
    }

    /// Returns the discounted fare, rounded to a whole unit and clamped at zero.
    pub fn apply(&self, fare: u64) -> u64 {
        let fare = fare as f64;
        let discounted = match self.kind {
            DiscountKind::Percentage => fare * (1.0 - self.value.clamp(0.0, 100.0) / 100.0),
            DiscountKind::Fixed => fare - self.value.max(0.0),
        };
        discounted.max(0.0).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarePolicy {
    pub rounding_unit: u64,
    pub insurance_fee: u64,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            rounding_unit: DEFAULT_ROUNDING_UNIT,
            insurance_fee: DEFAULT_INSURANCE_FEE,
        }
    }
}

/// Itemized fare. All amounts are whole currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub vehicle_class: VehicleClass,
    pub is_shared: bool,
    /// Fare after demand, sharing, minimum and rounding; before coupon and insurance.
    pub base_fare: u64,
    pub discount: u64,
    pub insurance_fee: u64,
    pub total_fare: u64,
    pub rounding_unit: u64,
    pub coupon_code: Option<String>,
}

/// Ceiling division to the next multiple of `unit`. `None` on overflow.
pub fn ceil_to_unit(value: u64, unit: u64) -> Option<u64> {
    let unit = unit.max(1);
    value.div_ceil(unit).checked_mul(unit)
}

/// Fare before any coupon or insurance: steps 1-5 of the module docs.
pub fn base_fare(
    request: &QuoteRequest,
    rate_cards: &RateCards,
    policy: &FarePolicy,
) -> Result<u64, FareError> {
    let card = rate_cards.get(request.vehicle_class)?;

    let estimate_ok = |v: f64| v.is_finite() && v > 0.0;
    if !estimate_ok(request.distance_km) || !estimate_ok(request.duration_min) {
        return Err(FareError::InvalidTripEstimate {
            distance: request.distance_km,
            duration: request.duration_min,
        });
    }
    if !estimate_ok(request.demand_multiplier) {
        return Err(FareError::InvalidMultiplier(request.demand_multiplier));
    }

    let mut fare =
        card.base + request.distance_km * card.per_km + request.duration_min * card.per_minute;
    fare *= request.demand_multiplier;
    if request.is_shared {
        fare *= SHARING_DISCOUNT_FACTOR;
    }

    let rounded = fare.round();
    if rounded.is_nan() || rounded > MAX_FARE as f64 {
        return Err(FareError::FareOutOfRange(rounded));
    }
    let floored = (rounded as u64).max(card.minimum_fare);
    ceil_to_unit(floored, policy.rounding_unit)
        .filter(|fare| *fare <= MAX_FARE)
        .ok_or(FareError::FareOutOfRange(floored as f64))
}

/// Computes the full itemized fare for `request`.
///
/// `coupon` must already be resolved from `request.coupon_code`; resolving an
/// unknown code is the catalog's job ([crate::catalog::PricingCatalog::quote]).
pub fn compute_fare(
    request: &QuoteRequest,
    rate_cards: &RateCards,
    coupon: Option<&Coupon>,
    policy: &FarePolicy,
    now: DateTime<Utc>,
) -> Result<FareBreakdown, FareError> {
    let base_fare = base_fare(request, rate_cards, policy)?;

    let (discount, coupon_code) = match coupon {
        Some(coupon) => {
            coupon.validate(base_fare, now)?;
            (base_fare - coupon.apply(base_fare), Some(coupon.code.clone()))
        }
        None => (0, None),
    };

    let insurance_fee = if request.insurance_requested {
        policy.insurance_fee
    } else {
        0
    };

    let total_fare = (base_fare - discount)
        .checked_add(insurance_fee)
        .ok_or(FareError::FareOutOfRange(base_fare as f64))?;

    Ok(FareBreakdown {
        vehicle_class: request.vehicle_class,
        is_shared: request.is_shared,
        base_fare,
        discount,
        insurance_fee,
        total_fare,
        rounding_unit: policy.rounding_unit,
        coupon_code,
    })
}

/// Shared and solo prices for the same trip, each computed from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingComparison {
    pub shared: FareBreakdown,
    pub solo: FareBreakdown,
    pub savings: u64,
}

/// Quotes `request` both shared and solo. Coupons are left out so that a
/// minimum-fare rejection on one side cannot hide the other price.
pub fn sharing_comparison(
    request: &QuoteRequest,
    rate_cards: &RateCards,
    policy: &FarePolicy,
    now: DateTime<Utc>,
) -> Result<SharingComparison, FareError> {
    let mut request = request.clone();
    request.coupon_code = None;

    let shared = compute_fare(&request.clone().shared(true), rate_cards, None, policy, now)?;
    let solo = compute_fare(&request.shared(false), rate_cards, None, policy, now)?;
    let savings = solo.total_fare.saturating_sub(shared.total_fare);
    Ok(SharingComparison {
        shared,
        solo,
        savings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn quote(request: &QuoteRequest, coupon: Option<&Coupon>) -> Result<FareBreakdown, FareError> {
        compute_fare(
            request,
            &RateCards::default(),
            coupon,
            &FarePolicy::default(),
            now(),
        )
    }

    fn coupon(kind: DiscountKind, value: f64, min_fare: u64) -> Coupon {
        Coupon {
            code: "TEST".to_string(),
            kind,
            value,
            min_fare,
            expires_at: now() + Duration::days(30),
        }
    }

    #[test]
    fn mini_solo_fare_rounds_up_to_ten() {
        let fare = quote(&QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0), None).expect("fare");
        // 40 + 150 + 45 = 235 -> 240
        assert_eq!(fare.base_fare, 240);
        assert_eq!(fare.total_fare, 240);
        assert_eq!(fare.discount, 0);
    }

    #[test]
    fn mini_shared_fare_applies_sharing_factor() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).shared(true);
        let fare = quote(&request, None).expect("fare");
        // 235 * 0.6 = 141 -> 150
        assert_eq!(fare.base_fare, 150);
        assert!(fare.is_shared);
    }

    #[test]
    fn short_trip_is_floored_at_minimum_fare() {
        let fare = quote(&QuoteRequest::new(VehicleClass::Suv, 0.1, 0.5), None).expect("fare");
        // 60 + 2.2 + 1.25 rounds to 63, below the 100 minimum
        assert_eq!(fare.base_fare, 100);
    }

    #[test]
    fn base_fare_is_multiple_of_rounding_unit_and_above_minimum() {
        let cards = RateCards::default();
        for class in VehicleClass::ALL {
            let minimum = cards.get(class).expect("card").minimum_fare;
            for distance in [0.3, 1.7, 5.0, 12.4, 38.9] {
                for duration in [1.0, 9.5, 42.0] {
                    for shared in [false, true] {
                        for demand in [0.8, 1.0, 1.75] {
                            let request = QuoteRequest::new(class, distance, duration)
                                .shared(shared)
                                .with_demand_multiplier(demand);
                            let fare = quote(&request, None).expect("fare");
                            assert_eq!(fare.base_fare % DEFAULT_ROUNDING_UNIT, 0);
                            assert!(fare.base_fare >= minimum);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn shared_fare_is_at_most_sixty_percent_of_solo_within_rounding() {
        for class in VehicleClass::ALL {
            for distance in [4.0, 10.0, 25.0] {
                let solo = quote(&QuoteRequest::new(class, distance, 30.0), None).expect("solo");
                let shared = quote(&QuoteRequest::new(class, distance, 30.0).shared(true), None)
                    .expect("shared");
                let bound = solo.base_fare as f64 * SHARING_DISCOUNT_FACTOR
                    + DEFAULT_ROUNDING_UNIT as f64;
                assert!(
                    shared.base_fare as f64 <= bound,
                    "{class}: shared {} vs solo {}",
                    shared.base_fare,
                    solo.base_fare
                );
            }
        }
    }

    #[test]
    fn demand_multiplier_scales_fare() {
        let surge = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_demand_multiplier(2.0);
        // 235 * 2 = 470
        assert_eq!(quote(&surge, None).expect("fare").base_fare, 470);
    }

    #[test]
    fn non_positive_multiplier_is_rejected() {
        for multiplier in [0.0, -1.0, f64::NAN] {
            let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0)
                .with_demand_multiplier(multiplier);
            assert!(matches!(
                quote(&request, None),
                Err(FareError::InvalidMultiplier(_))
            ));
        }
    }

    #[test]
    fn non_positive_estimates_are_rejected() {
        let request = QuoteRequest::new(VehicleClass::Mini, 0.0, 30.0);
        assert!(matches!(
            quote(&request, None),
            Err(FareError::InvalidTripEstimate { .. })
        ));
    }

    #[test]
    fn huge_finite_estimate_is_out_of_range() {
        let request = QuoteRequest::new(VehicleClass::Mini, 1e20, 30.0);
        assert!(matches!(
            quote(&request, None),
            Err(FareError::FareOutOfRange(_))
        ));
    }

    #[test]
    fn minimum_fare_near_u64_max_does_not_overflow_rounding() {
        let card = RateCard::new(40.0, 15.0, 1.5, u64::MAX);
        let cards = RateCards::new([(VehicleClass::Mini, card)]);
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0);
        let err = compute_fare(&request, &cards, None, &FarePolicy::default(), now())
            .expect_err("minimum fare cannot be rounded");
        assert!(matches!(err, FareError::FareOutOfRange(_)));
    }

    #[test]
    fn insurance_fee_overflow_is_rejected() {
        let policy = FarePolicy {
            insurance_fee: u64::MAX,
            ..FarePolicy::default()
        };
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_insurance(true);
        let err = compute_fare(&request, &RateCards::default(), None, &policy, now())
            .expect_err("total overflows");
        assert!(matches!(err, FareError::FareOutOfRange(_)));
    }

    #[test]
    fn ceil_to_unit_reports_overflow() {
        assert_eq!(ceil_to_unit(231, 10), Some(240));
        assert_eq!(ceil_to_unit(u64::MAX, 10), None);
    }

    #[test]
    fn missing_rate_card_is_unknown_vehicle_class() {
        let cards = RateCards::new([(VehicleClass::Mini, RateCard::new(40.0, 15.0, 1.5, 60))]);
        let request = QuoteRequest::new(VehicleClass::Sedan, 10.0, 30.0);
        let err = compute_fare(&request, &cards, None, &FarePolicy::default(), now())
            .expect_err("no sedan card");
        assert_eq!(err, FareError::UnknownVehicleClass("sedan".to_string()));
    }

    #[test]
    fn vehicle_class_parses_case_insensitively() {
        assert_eq!("MINI".parse::<VehicleClass>(), Ok(VehicleClass::Mini));
        assert_eq!(
            "wheelchair-accessible".parse::<VehicleClass>(),
            Ok(VehicleClass::WheelchairAccessible)
        );
        assert_eq!(
            "rickshaw".parse::<VehicleClass>(),
            Err(FareError::UnknownVehicleClass("rickshaw".to_string()))
        );
    }

    #[test]
    fn percentage_coupon_is_applied_without_re_rounding() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0);
        let coupon = coupon(DiscountKind::Percentage, 25.0, 100);
        let fare = quote(&request, Some(&coupon)).expect("fare");
        assert_eq!(fare.base_fare, 240);
        assert_eq!(fare.discount, 60);
        assert_eq!(fare.total_fare, 180);
        assert_eq!(fare.coupon_code.as_deref(), Some("TEST"));
    }

    #[test]
    fn percentage_discount_rounds_to_whole_unit() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0);
        let coupon = coupon(DiscountKind::Percentage, 12.5, 0);
        let fare = quote(&request, Some(&coupon)).expect("fare");
        // 240 * 0.875 = 210
        assert_eq!(fare.total_fare, 210);
        let odd = self::coupon(DiscountKind::Percentage, 33.0, 0);
        let fare = quote(&request, Some(&odd)).expect("fare");
        // 240 * 0.67 = 160.8 -> 161, not ceiled to 170
        assert_eq!(fare.total_fare, 161);
        assert_eq!(fare.discount, 79);
    }

    #[test]
    fn fixed_coupon_is_clamped_at_zero() {
        let request = QuoteRequest::new(VehicleClass::Auto, 1.0, 2.0);
        let coupon = coupon(DiscountKind::Fixed, 500.0, 0);
        let fare = quote(&request, Some(&coupon)).expect("fare");
        assert_eq!(fare.total_fare, 0);
        assert_eq!(fare.discount, fare.base_fare);
    }

    #[test]
    fn coupon_below_min_fare_is_rejected() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).shared(true);
        let coupon = coupon(DiscountKind::Fixed, 50.0, 200);
        let err = quote(&request, Some(&coupon)).expect_err("150 < 200");
        assert_eq!(
            err,
            FareError::CouponMinFareNotMet {
                code: "TEST".to_string(),
                min_fare: 200,
                fare: 150,
            }
        );
    }

    #[test]
    fn expired_coupon_is_rejected() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0);
        let mut expired = coupon(DiscountKind::Percentage, 20.0, 0);
        expired.expires_at = now() - Duration::seconds(1);
        assert_eq!(
            quote(&request, Some(&expired)),
            Err(FareError::ExpiredCoupon("TEST".to_string()))
        );
    }

    #[test]
    fn insurance_is_added_after_coupon_and_never_discounted() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_insurance(true);
        let coupon = coupon(DiscountKind::Percentage, 100.0, 0);
        let fare = quote(&request, Some(&coupon)).expect("fare");
        assert_eq!(fare.discount, 240);
        assert_eq!(fare.insurance_fee, DEFAULT_INSURANCE_FEE);
        assert_eq!(fare.total_fare, DEFAULT_INSURANCE_FEE);
    }

    #[test]
    fn sharing_comparison_recomputes_solo_fare() {
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0)
            .shared(true)
            .with_insurance(true)
            .with_coupon("IGNORED");
        let comparison = sharing_comparison(
            &request,
            &RateCards::default(),
            &FarePolicy::default(),
            now(),
        )
        .expect("comparison");
        assert_eq!(comparison.shared.total_fare, 155);
        assert_eq!(comparison.solo.total_fare, 245);
        assert_eq!(comparison.savings, 90);
        // The old 1.67x shortcut would have produced round(155 * 1.67) = 259.
        assert_ne!(comparison.solo.total_fare, 259);
    }
}
