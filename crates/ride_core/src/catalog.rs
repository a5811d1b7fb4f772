//! Static pricing configuration: rate cards, coupon lookup and insurance fee.

use std::collections::HashMap;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::FareError;
use crate::fare::{
    compute_fare, sharing_comparison, Coupon, DiscountKind, FareBreakdown, FarePolicy,
    QuoteRequest, RateCards, SharingComparison,
};

/// Read-only pricing data shared by every quote. Built once from configuration.
#[derive(Debug, Clone, Resource)]
pub struct PricingCatalog {
    rate_cards: RateCards,
    policy: FarePolicy,
    coupons: HashMap<String, Coupon>,
}

impl PricingCatalog {
    pub fn new(rate_cards: RateCards, policy: FarePolicy, coupons: Vec<Coupon>) -> Self {
        let coupons = coupons
            .into_iter()
            .map(|coupon| (normalize_code(&coupon.code), coupon))
            .collect();
        Self {
            rate_cards,
            policy,
            coupons,
        }
    }

    pub fn rate_cards(&self) -> &RateCards {
        &self.rate_cards
    }

    pub fn policy(&self) -> &FarePolicy {
        &self.policy
    }

    /// Case-insensitive coupon lookup.
    pub fn find_coupon(&self, code: &str) -> Option<&Coupon> {
        self.coupons.get(&normalize_code(code))
    }

    pub fn coupons(&self) -> impl Iterator<Item = &Coupon> {
        self.coupons.values()
    }

    /// Resolves the request's coupon code and computes the fare.
    pub fn quote(
        &self,
        request: &QuoteRequest,
        now: DateTime<Utc>,
    ) -> Result<FareBreakdown, FareError> {
        let coupon = match request.coupon_code.as_deref() {
            Some(code) => Some(
                self.find_coupon(code)
                    .ok_or_else(|| FareError::InvalidCouponCode(code.to_string()))?,
            ),
            None => None,
        };
        compute_fare(request, &self.rate_cards, coupon, &self.policy, now)
    }

    pub fn sharing_comparison(
        &self,
        request: &QuoteRequest,
        now: DateTime<Utc>,
    ) -> Result<SharingComparison, FareError> {
        sharing_comparison(request, &self.rate_cards, &self.policy, now)
    }
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::new(RateCards::default(), FarePolicy::default(), default_coupons())
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn midnight_utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Launch promotions.
pub fn default_coupons() -> Vec<Coupon> {
    vec![
        Coupon {
            code: "WELCOME20".to_string(),
            kind: DiscountKind::Percentage,
            value: 20.0,
            min_fare: 100,
            expires_at: midnight_utc(2025, 1, 31),
        },
        Coupon {
            code: "FLAT50".to_string(),
            kind: DiscountKind::Fixed,
            value: 50.0,
            min_fare: 200,
            expires_at: midnight_utc(2024, 7, 30),
        },
        Coupon {
            code: "SUMMER25".to_string(),
            kind: DiscountKind::Percentage,
            value: 25.0,
            min_fare: 150,
            expires_at: midnight_utc(2024, 10, 1),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fare::VehicleClass;

    fn june_2024() -> DateTime<Utc> {
        midnight_utc(2024, 6, 1)
    }

    #[test]
    fn coupon_lookup_ignores_case_and_whitespace() {
        let catalog = PricingCatalog::default();
        assert!(catalog.find_coupon(" welcome20 ").is_some());
        assert!(catalog.find_coupon("NOPE").is_none());
    }

    #[test]
    fn unknown_coupon_code_is_rejected_not_ignored() {
        let catalog = PricingCatalog::default();
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_coupon("FREE100");
        assert_eq!(
            catalog.quote(&request, june_2024()),
            Err(FareError::InvalidCouponCode("FREE100".to_string()))
        );
    }

    #[test]
    fn flat50_applies_to_fare_over_two_hundred() {
        let catalog = PricingCatalog::default();
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_coupon("flat50");
        let fare = catalog.quote(&request, june_2024()).expect("fare");
        assert_eq!(fare.base_fare, 240);
        assert_eq!(fare.total_fare, 190);
    }

    #[test]
    fn flat50_expires_after_july() {
        let catalog = PricingCatalog::default();
        let request = QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0).with_coupon("FLAT50");
        assert_eq!(
            catalog.quote(&request, midnight_utc(2024, 8, 1)),
            Err(FareError::ExpiredCoupon("FLAT50".to_string()))
        );
    }
}
