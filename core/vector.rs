// ========================================================================================
//
//                               The Feature Vector Contract
//
// ========================================================================================
//
// Estimators consume a name-to-value mapping over a fixed eighteen-entry schema. The
// builder emits the entries in schema order, so positional consumers can rely on it,
// while the lookup API lets name-sensitive consumers project the vector into whatever
// order their artifact declares.

use crate::features::DerivedFeatures;
use crate::observation::{Observation, SUBSIDY_POLICY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// The canonical feature names, in the order the builder emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureName {
    Country,
    Crop,
    Year,
    AreaHarvested,
    Rainfall,
    Temperature,
    PolicyFlagNumeric,
    TransportCost,
    DemandSupplyGap,
    RainfallTempInteraction,
    PriceToYieldRatio,
    Production,
    LogArea,
    DemandSupplyBalance,
    LogTransportCost,
    PricePerTonne,
    ProductivityIndex,
    LogProduction,
}

impl FeatureName {
    pub const ALL: [FeatureName; 18] = [
        FeatureName::Country,
        FeatureName::Crop,
        FeatureName::Year,
        FeatureName::AreaHarvested,
        FeatureName::Rainfall,
        FeatureName::Temperature,
        FeatureName::PolicyFlagNumeric,
        FeatureName::TransportCost,
        FeatureName::DemandSupplyGap,
        FeatureName::RainfallTempInteraction,
        FeatureName::PriceToYieldRatio,
        FeatureName::Production,
        FeatureName::LogArea,
        FeatureName::DemandSupplyBalance,
        FeatureName::LogTransportCost,
        FeatureName::PricePerTonne,
        FeatureName::ProductivityIndex,
        FeatureName::LogProduction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureName::Country => "country",
            FeatureName::Crop => "crop",
            FeatureName::Year => "year",
            FeatureName::AreaHarvested => "area_harvested",
            FeatureName::Rainfall => "rainfall",
            FeatureName::Temperature => "temperature",
            FeatureName::PolicyFlagNumeric => "policy_flag_numeric",
            FeatureName::TransportCost => "transport_cost",
            FeatureName::DemandSupplyGap => "demand_supply_gap",
            FeatureName::RainfallTempInteraction => "rainfall_temp_interaction",
            FeatureName::PriceToYieldRatio => "price_to_yield_ratio",
            FeatureName::Production => "production",
            FeatureName::LogArea => "log_area",
            FeatureName::DemandSupplyBalance => "demand_supply_balance",
            FeatureName::LogTransportCost => "log_transport_cost",
            FeatureName::PricePerTonne => "price_per_tonne",
            FeatureName::ProductivityIndex => "productivity_index",
            FeatureName::LogProduction => "log_production",
        }
    }

    /// The column name used by models trained on the historical export.
    pub fn legacy_name(self) -> &'static str {
        match self {
            FeatureName::Country => "Country",
            FeatureName::Crop => "Crop",
            FeatureName::Year => "Year",
            FeatureName::AreaHarvested => "Area_harvested_ha",
            FeatureName::Rainfall => "Rainfall_mm",
            FeatureName::Temperature => "Temperature_C",
            FeatureName::PolicyFlagNumeric => "Policy_Flag",
            FeatureName::TransportCost => "Transport_Cost_USD",
            FeatureName::DemandSupplyGap => "Demand_Supply_Gap",
            FeatureName::RainfallTempInteraction => "Rainfall_Temp_interaction",
            FeatureName::PriceToYieldRatio => "Price_to_Yield_ratio",
            FeatureName::Production => "Production_tonnes",
            FeatureName::LogArea => "log_Area_harvested_ha",
            FeatureName::DemandSupplyBalance => "Demand_Supply_balance",
            FeatureName::LogTransportCost => "log_Transport_Cost_USD",
            FeatureName::PricePerTonne => "Price_USD_per_tonne",
            FeatureName::ProductivityIndex => "Productivity_index",
            FeatureName::LogProduction => "log_Production_tonnes",
        }
    }

    /// Accepts either the canonical or the legacy spelling.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|feature| feature.as_str() == name || feature.legacy_name() == name)
    }

    pub fn is_categorical(self) -> bool {
        matches!(self, FeatureName::Country | FeatureName::Crop)
    }

    /// Computed from raw fields rather than copied from the observation.
    pub fn is_derived(self) -> bool {
        matches!(
            self,
            FeatureName::RainfallTempInteraction
                | FeatureName::PriceToYieldRatio
                | FeatureName::LogArea
                | FeatureName::DemandSupplyBalance
                | FeatureName::LogTransportCost
                | FeatureName::LogProduction
        )
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical schema as plain names.
pub fn schema() -> [&'static str; 18] {
    FeatureName::ALL.map(FeatureName::as_str)
}

/// Maps a legacy spelling onto its canonical name; unknown names pass through.
pub fn canonical_name(name: &str) -> String {
    FeatureName::parse(name).map_or_else(|| name.to_string(), |feature| feature.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Category(String),
}

impl FeatureValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(value) => Some(*value),
            FeatureValue::Category(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Numeric(value) => write!(f, "{value}"),
            FeatureValue::Category(level) => write!(f, "{level:?}"),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Numeric(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(level: &str) -> Self {
        FeatureValue::Category(level.to_string())
    }
}

/// An insertion-ordered mapping from feature name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    entries: Vec<(String, FeatureValue)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FeatureValue>,
    {
        let mut vector = Self::new();
        for (name, value) in entries {
            vector.insert(name, value);
        }
        vector
    }

    /// Inserts a value, replacing an existing entry of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FeatureValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter().position(|(existing, _)| *existing == name) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FeatureValue::as_numeric)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn key_set(&self) -> BTreeSet<&str> {
        self.names().collect()
    }

    /// Values in the requested order. On failure, returns the names that are absent.
    pub fn project<'a, S: AsRef<str>>(
        &'a self,
        order: &[S],
    ) -> Result<Vec<&'a FeatureValue>, Vec<String>> {
        let mut missing = Vec::new();
        let mut row = Vec::with_capacity(order.len());
        for name in order {
            match self.get(name.as_ref()) {
                Some(value) => row.push(value),
                None => missing.push(name.as_ref().to_string()),
            }
        }
        if missing.is_empty() { Ok(row) } else { Err(missing) }
    }
}

/// Raised when the builder receives an observation that bypassed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("Invalid observation: feature '{feature}' is not finite ({value})")]
    NonFinite { feature: FeatureName, value: f64 },
    #[error("Invalid observation: categorical feature '{0}' is blank")]
    BlankCategory(FeatureName),
}

/// Reference encoding of the policy flag: `1` for the exact literal `"Subsidy"`,
/// `0` for anything else, including other casings and the empty string.
pub fn policy_flag_numeric(policy_flag: &str) -> f64 {
    if policy_flag == SUBSIDY_POLICY { 1.0 } else { 0.0 }
}

/// Assembles the eighteen-entry vector in schema order.
pub fn build(
    observation: &Observation,
    derived: &DerivedFeatures,
) -> Result<FeatureVector, VectorError> {
    let mut entries = Vec::with_capacity(FeatureName::ALL.len());
    for feature in FeatureName::ALL {
        let value = match feature {
            FeatureName::Country => category(feature, &observation.country)?,
            FeatureName::Crop => category(feature, &observation.crop)?,
            FeatureName::Year => FeatureValue::Numeric(f64::from(observation.year)),
            FeatureName::AreaHarvested => numeric(feature, observation.area_harvested)?,
            FeatureName::Rainfall => numeric(feature, observation.rainfall)?,
            FeatureName::Temperature => numeric(feature, observation.temperature)?,
            FeatureName::PolicyFlagNumeric => {
                FeatureValue::Numeric(policy_flag_numeric(&observation.policy_flag))
            }
            FeatureName::TransportCost => numeric(feature, observation.transport_cost)?,
            FeatureName::DemandSupplyGap => numeric(feature, observation.demand_supply_gap)?,
            FeatureName::RainfallTempInteraction => {
                numeric(feature, derived.rainfall_temp_interaction)?
            }
            FeatureName::PriceToYieldRatio => numeric(feature, derived.price_to_yield_ratio)?,
            FeatureName::Production => numeric(feature, observation.production)?,
            FeatureName::LogArea => numeric(feature, derived.log_area)?,
            FeatureName::DemandSupplyBalance => numeric(feature, derived.demand_supply_balance)?,
            FeatureName::LogTransportCost => numeric(feature, derived.log_transport_cost)?,
            FeatureName::PricePerTonne => numeric(feature, observation.price_per_tonne)?,
            FeatureName::ProductivityIndex => numeric(feature, observation.productivity_index)?,
            FeatureName::LogProduction => numeric(feature, derived.log_production)?,
        };
        entries.push((feature.as_str().to_string(), value));
    }
    Ok(FeatureVector { entries })
}

fn numeric(feature: FeatureName, value: f64) -> Result<FeatureValue, VectorError> {
    if value.is_finite() {
        Ok(FeatureValue::Numeric(value))
    } else {
        Err(VectorError::NonFinite { feature, value })
    }
}

fn category(feature: FeatureName, level: &str) -> Result<FeatureValue, VectorError> {
    if level.trim().is_empty() {
        Err(VectorError::BlankCategory(feature))
    } else {
        Ok(FeatureValue::Category(level.to_string()))
    }
}
