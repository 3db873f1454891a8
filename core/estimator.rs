//! The estimator contract and the closed-form reference estimator.

use crate::vector::{FeatureName, FeatureVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Predicted production (tonnes), yield (tonnes per hectare) and price (USD per tonne).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub predicted_production: f64,
    pub predicted_yield: f64,
    pub predicted_price: f64,
}

impl EstimationResult {
    /// Packages the three predictions, rejecting non-finite values.
    pub fn checked(production: f64, crop_yield: f64, price: f64) -> Result<Self, EstimationError> {
        for (target, value) in [
            ("production", production),
            ("yield", crop_yield),
            ("price", price),
        ] {
            if !value.is_finite() {
                return Err(EstimationError::NonFinite { target, value });
            }
        }
        Ok(Self {
            predicted_production: production,
            predicted_yield: crop_yield,
            predicted_price: price,
        })
    }
}

/// The declared feature set of an estimator differs from the one it was given.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Feature mismatch: missing {missing:?}, unexpected {unexpected:?}")]
pub struct FeatureMismatch {
    /// Declared by the estimator but absent from the vector or schema.
    pub missing: Vec<String>,
    /// Present in the vector or schema but not declared by the estimator.
    pub unexpected: Vec<String>,
}

impl FeatureMismatch {
    /// Compares two name sets. Returns `None` when they are identical.
    pub fn between<'a, E, F>(expected: E, found: F) -> Option<Self>
    where
        E: IntoIterator<Item = &'a str>,
        F: IntoIterator<Item = &'a str>,
    {
        let expected: BTreeSet<&str> = expected.into_iter().collect();
        let found: BTreeSet<&str> = found.into_iter().collect();
        let missing: Vec<String> = expected.difference(&found).map(|s| s.to_string()).collect();
        let unexpected: Vec<String> = found.difference(&expected).map(|s| s.to_string()).collect();
        if missing.is_empty() && unexpected.is_empty() {
            None
        } else {
            Some(Self {
                missing,
                unexpected,
            })
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error(transparent)]
    FeatureMismatch(#[from] FeatureMismatch),
    #[error("Feature '{0}' is not present in the vector")]
    MissingFeature(String),
    #[error("Feature '{name}' holds a value of the wrong kind; expected {expected}")]
    WrongKind { name: String, expected: &'static str },
    #[error("Estimation produced a non-finite {target}: {value}")]
    NonFinite { target: &'static str, value: f64 },
    #[error("Expected a row of {expected} values, got {found}")]
    RowLength { expected: usize, found: usize },
    #[error("The '{head}' head has {coefficients} coefficients for {features} features")]
    HeadShape {
        head: &'static str,
        coefficients: usize,
        features: usize,
    },
}

/// A pluggable mapping from a feature vector to production, yield and price.
///
/// Implementations are shared across request threads, so they must be `Send + Sync`
/// and must not mutate observable state in `predict` beyond fault tracking.
pub trait Estimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks that the estimator can consume vectors carrying exactly `schema`.
    fn verify_schema(&self, schema: &[&str]) -> Result<(), FeatureMismatch>;

    fn predict(&self, vector: &FeatureVector) -> Result<EstimationResult, EstimationError>;
}

/// The closed-form reference estimator. It has no learned parameters.
///
/// Negative temperatures drive production and yield negative. That output is
/// returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    const INPUTS: [FeatureName; 6] = [
        FeatureName::AreaHarvested,
        FeatureName::Rainfall,
        FeatureName::Temperature,
        FeatureName::PolicyFlagNumeric,
        FeatureName::PricePerTonne,
        FeatureName::DemandSupplyGap,
    ];

    fn input(vector: &FeatureVector, feature: FeatureName) -> Result<f64, EstimationError> {
        let value = vector
            .get(feature.as_str())
            .ok_or_else(|| EstimationError::MissingFeature(feature.as_str().to_string()))?;
        value.as_numeric().ok_or_else(|| EstimationError::WrongKind {
            name: feature.as_str().to_string(),
            expected: "numeric",
        })
    }
}

impl Estimator for HeuristicEstimator {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn verify_schema(&self, schema: &[&str]) -> Result<(), FeatureMismatch> {
        let missing: Vec<String> = Self::INPUTS
            .iter()
            .map(|feature| feature.as_str())
            .filter(|name| !schema.contains(name))
            .map(str::to_string)
            .collect();
        // Extra features are ignored; only the six inputs matter.
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeatureMismatch {
                missing,
                unexpected: Vec::new(),
            })
        }
    }

    fn predict(&self, vector: &FeatureVector) -> Result<EstimationResult, EstimationError> {
        let area = Self::input(vector, FeatureName::AreaHarvested)?;
        let rainfall = Self::input(vector, FeatureName::Rainfall)?;
        let temperature = Self::input(vector, FeatureName::Temperature)?;
        let policy = if Self::input(vector, FeatureName::PolicyFlagNumeric)? == 1.0 {
            1.0
        } else {
            0.0
        };
        let price_per_tonne = Self::input(vector, FeatureName::PricePerTonne)?;
        let gap = Self::input(vector, FeatureName::DemandSupplyGap)?;

        let production = area * (rainfall / 100.0) * (temperature / 20.0) * (1.0 + policy);
        let crop_yield = if area > 0.0 { production / area } else { 0.0 };
        let price = price_per_tonne * (1.0 + gap / 100.0);

        EstimationResult::checked(production, crop_yield, price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FeatureValue;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn heuristic_inputs(area: f64, rainfall: f64, temperature: f64, policy: f64) -> FeatureVector {
        FeatureVector::from_entries([
            ("area_harvested", area),
            ("rainfall", rainfall),
            ("temperature", temperature),
            ("policy_flag_numeric", policy),
            ("price_per_tonne", 300.0),
            ("demand_supply_gap", 10.0),
        ])
    }

    #[test]
    fn reference_scenario() {
        let result = HeuristicEstimator
            .predict(&heuristic_inputs(10.0, 200.0, 25.0, 1.0))
            .unwrap();
        assert_eq!(result.predicted_production, 50.0);
        assert_eq!(result.predicted_yield, 5.0);
        assert_eq!(result.predicted_price, 330.0);
    }

    #[test]
    fn zero_area_guards_yield() {
        let result = HeuristicEstimator
            .predict(&heuristic_inputs(0.0, 200.0, 25.0, 0.0))
            .unwrap();
        assert_eq!(result.predicted_production, 0.0);
        assert_eq!(result.predicted_yield, 0.0);
    }

    #[test]
    fn negative_temperature_is_not_clamped() {
        let result = HeuristicEstimator
            .predict(&heuristic_inputs(10.0, 200.0, -10.0, 0.0))
            .unwrap();
        assert_eq!(result.predicted_production, -10.0);
        assert_eq!(result.predicted_yield, -1.0);
    }

    #[test]
    fn only_exact_one_counts_as_policy() {
        let with_policy = HeuristicEstimator
            .predict(&heuristic_inputs(10.0, 200.0, 25.0, 1.0))
            .unwrap();
        let odd_code = HeuristicEstimator
            .predict(&heuristic_inputs(10.0, 200.0, 25.0, 2.0))
            .unwrap();
        assert_eq!(with_policy.predicted_production, 2.0 * odd_code.predicted_production);
    }

    #[test]
    fn yield_is_production_over_area_for_random_inputs() {
        let mut rng = StdRng::seed_from_u64(0xA61_2023);
        for _ in 0..500 {
            let area = rng.gen_range(0.001..10_000.0);
            let rainfall = rng.gen_range(0.0..3_000.0);
            let temperature = rng.gen_range(-30.0..50.0);
            let policy = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
            let result = HeuristicEstimator
                .predict(&heuristic_inputs(area, rainfall, temperature, policy))
                .unwrap();
            assert_eq!(result.predicted_yield, result.predicted_production / area);
        }
    }

    #[test]
    fn overflow_is_an_estimation_failure() {
        let result = HeuristicEstimator.predict(&heuristic_inputs(1e200, 1e200, 25.0, 0.0));
        match result {
            Err(EstimationError::NonFinite { target, .. }) => assert_eq!(target, "production"),
            other => panic!("expected NonFinite(production), got {other:?}"),
        }
    }

    #[test]
    fn missing_and_categorical_inputs_fail() {
        let mut vector = heuristic_inputs(10.0, 200.0, 25.0, 1.0);
        vector.insert("rainfall", FeatureValue::Category("wet".to_string()));
        assert_eq!(
            HeuristicEstimator.predict(&vector),
            Err(EstimationError::WrongKind {
                name: "rainfall".to_string(),
                expected: "numeric"
            })
        );

        let partial = FeatureVector::from_entries([("area_harvested", 1.0)]);
        assert_eq!(
            HeuristicEstimator.predict(&partial),
            Err(EstimationError::MissingFeature("rainfall".to_string()))
        );
    }

    #[test]
    fn heuristic_schema_check_ignores_extras() {
        assert!(HeuristicEstimator.verify_schema(&crate::vector::schema()).is_ok());
        let err = HeuristicEstimator
            .verify_schema(&["area_harvested", "rainfall", "extra"])
            .unwrap_err();
        assert_eq!(err.missing.len(), 4);
        assert!(err.unexpected.is_empty());
    }

    #[test]
    fn mismatch_lists_both_directions() {
        let mismatch = FeatureMismatch::between(["A", "B"], ["A", "B", "C"]).unwrap();
        assert!(mismatch.missing.is_empty());
        assert_eq!(mismatch.unexpected, vec!["C".to_string()]);
        assert!(FeatureMismatch::between(["A", "B"], ["B", "A"]).is_none());
    }
}
