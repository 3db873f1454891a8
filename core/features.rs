//! Derived features computed from the raw fields of an observation.
//!
//! Every function here is total. Divisions by zero and logarithms of non-positive
//! values do not fail; they yield `0.0` instead. The substitution is not numerically
//! meaningful, but estimators trained on the historical data expect it, so it must be
//! reproduced exactly.

use crate::observation::Observation;
use serde::{Deserialize, Serialize};

/// Secondary quantities derived from one observation snapshot. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub rainfall_temp_interaction: f64,
    pub price_to_yield_ratio: f64,
    pub demand_supply_balance: f64,
    pub log_production: f64,
    pub log_area: f64,
    pub log_transport_cost: f64,
}

impl DerivedFeatures {
    pub fn derive(observation: &Observation) -> Self {
        let derived = Self {
            rainfall_temp_interaction: rainfall_temp_interaction(
                observation.rainfall,
                observation.temperature,
            ),
            price_to_yield_ratio: price_to_yield_ratio(
                observation.price_per_tonne,
                observation.production,
                observation.area_harvested,
            ),
            demand_supply_balance: ratio_or_zero(
                observation.demand_supply_gap,
                observation.production,
            ),
            log_production: ln_or_zero(observation.production),
            log_area: ln_or_zero(observation.area_harvested),
            log_transport_cost: ln_or_zero(observation.transport_cost),
        };
        log::debug!("Derived features for {observation}: {derived:?}");
        derived
    }
}

pub fn rainfall_temp_interaction(rainfall: f64, temperature: f64) -> f64 {
    rainfall * temperature
}

/// Price divided by yield (production per hectare).
///
/// Zero when the area is not positive, and also when the yield itself is zero.
pub fn price_to_yield_ratio(price_per_tonne: f64, production: f64, area_harvested: f64) -> f64 {
    if area_harvested > 0.0 {
        let crop_yield = production / area_harvested;
        if crop_yield != 0.0 {
            return price_per_tonne / crop_yield;
        }
    }
    0.0
}

/// `numerator / denominator` when the denominator is strictly positive, else zero.
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Natural logarithm for strictly positive values, else zero.
pub fn ln_or_zero(value: f64) -> f64 {
    if value > 0.0 { value.ln() } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn observation(area: f64, production: f64, transport: f64) -> Observation {
        Observation {
            country: "Kenya".to_string(),
            crop: "Maize".to_string(),
            year: 2023,
            area_harvested: area,
            production,
            rainfall: 200.0,
            temperature: 25.0,
            price_per_tonne: 300.0,
            policy_flag: "Subsidy".to_string(),
            transport_cost: transport,
            demand_supply_gap: 10.0,
            productivity_index: 0.0,
        }
    }

    #[test]
    fn derives_literal_fixture() {
        let derived = DerivedFeatures::derive(&observation(10.0, 50.0, 100.0));
        assert_eq!(derived.rainfall_temp_interaction, 5000.0);
        // yield is 5 t/ha, so 300 / 5
        assert_abs_diff_eq!(derived.price_to_yield_ratio, 60.0, epsilon = 1e-12);
        assert_abs_diff_eq!(derived.demand_supply_balance, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(derived.log_production, 50.0_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(derived.log_area, 10.0_f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(derived.log_transport_cost, 100.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn zero_production_substitutes_zero() {
        let derived = DerivedFeatures::derive(&observation(10.0, 0.0, 100.0));
        assert_eq!(derived.demand_supply_balance, 0.0);
        assert_eq!(derived.log_production, 0.0);
        assert_eq!(derived.price_to_yield_ratio, 0.0);
    }

    #[test]
    fn zero_area_substitutes_zero() {
        let derived = DerivedFeatures::derive(&observation(0.0, 50.0, 100.0));
        assert_eq!(derived.price_to_yield_ratio, 0.0);
        assert_eq!(derived.log_area, 0.0);
    }

    #[test]
    fn non_positive_transport_cost_has_zero_log() {
        for cost in [0.0, -1.0, -250.0] {
            let derived = DerivedFeatures::derive(&observation(10.0, 50.0, cost));
            assert_eq!(derived.log_transport_cost, 0.0);
        }
    }

    #[test]
    fn helpers_never_produce_non_finite_values_for_zero_inputs() {
        assert_eq!(ratio_or_zero(5.0, 0.0), 0.0);
        assert_eq!(ratio_or_zero(5.0, -2.0), 0.0);
        assert_eq!(ln_or_zero(0.0), 0.0);
        assert_eq!(ln_or_zero(-3.0), 0.0);
        assert_eq!(price_to_yield_ratio(300.0, 0.0, 0.0), 0.0);
        assert_eq!(rainfall_temp_interaction(0.0, -12.0), 0.0);
    }
}
