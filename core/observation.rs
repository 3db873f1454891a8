//! # Observation Intake and Validation
//!
//! This module is the exclusive entry point for user-submitted observations.
//! A payload arrives as an `ObservationInput`, where every field may be absent,
//! and leaves as a fully populated `Observation` or a `ValidationError`.
//!
//! - Exhaustive Reporting: validation never stops at the first problem. Every
//!   violated field is collected so the caller can surface all of them at once.
//! - Raw Field Names: the payload uses the unit-suffixed names of the submission
//!   form (`area_harvested_ha`, `rainfall_mm`, ...). These names are part of the
//!   contract with external collaborators and are shared with the JSON export.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use thiserror::Error;

/// Earliest accepted observation year.
pub const MIN_YEAR: i32 = 2000;
/// Latest accepted observation year.
pub const MAX_YEAR: i32 = 2100;

/// The single policy category the reference encoding treats as active.
pub const SUBSIDY_POLICY: &str = "Subsidy";

/// The raw, unvalidated payload of one observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationInput {
    pub country: Option<String>,
    pub crop: Option<String>,
    pub year: Option<i32>,
    #[serde(rename = "area_harvested_ha")]
    pub area_harvested: Option<f64>,
    #[serde(rename = "production_tonnes")]
    pub production: Option<f64>,
    #[serde(rename = "rainfall_mm")]
    pub rainfall: Option<f64>,
    #[serde(rename = "temperature_c")]
    pub temperature: Option<f64>,
    #[serde(rename = "price_usd_per_tonne")]
    pub price_per_tonne: Option<f64>,
    #[serde(default)]
    pub policy_flag: Option<String>,
    #[serde(rename = "transport_cost_usd")]
    pub transport_cost: Option<f64>,
    pub demand_supply_gap: Option<f64>,
    #[serde(default)]
    pub productivity_index: Option<f64>,
}

/// A validated agricultural observation.
///
/// Units: hectares, tonnes, millimetres, degrees Celsius and US dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub country: String,
    pub crop: String,
    pub year: i32,
    #[serde(rename = "area_harvested_ha")]
    pub area_harvested: f64,
    #[serde(rename = "production_tonnes")]
    pub production: f64,
    #[serde(rename = "rainfall_mm")]
    pub rainfall: f64,
    #[serde(rename = "temperature_c")]
    pub temperature: f64,
    #[serde(rename = "price_usd_per_tonne")]
    pub price_per_tonne: f64,
    pub policy_flag: String,
    #[serde(rename = "transport_cost_usd")]
    pub transport_cost: f64,
    pub demand_supply_gap: f64,
    pub productivity_index: f64,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {} ({})", self.crop, self.country, self.year)
    }
}

impl From<&Observation> for ObservationInput {
    fn from(observation: &Observation) -> Self {
        Self {
            country: Some(observation.country.clone()),
            crop: Some(observation.crop.clone()),
            year: Some(observation.year),
            area_harvested: Some(observation.area_harvested),
            production: Some(observation.production),
            rainfall: Some(observation.rainfall),
            temperature: Some(observation.temperature),
            price_per_tonne: Some(observation.price_per_tonne),
            policy_flag: Some(observation.policy_flag.clone()),
            transport_cost: Some(observation.transport_cost),
            demand_supply_gap: Some(observation.demand_supply_gap),
            productivity_index: Some(observation.productivity_index),
        }
    }
}

/// Identifies one field of the raw payload, by its raw name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Country,
    Crop,
    Year,
    AreaHarvested,
    Production,
    Rainfall,
    Temperature,
    PricePerTonne,
    PolicyFlag,
    TransportCost,
    DemandSupplyGap,
    ProductivityIndex,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Country => "country",
            Field::Crop => "crop",
            Field::Year => "year",
            Field::AreaHarvested => "area_harvested_ha",
            Field::Production => "production_tonnes",
            Field::Rainfall => "rainfall_mm",
            Field::Temperature => "temperature_c",
            Field::PricePerTonne => "price_usd_per_tonne",
            Field::PolicyFlag => "policy_flag",
            Field::TransportCost => "transport_cost_usd",
            Field::DemandSupplyGap => "demand_supply_gap",
            Field::ProductivityIndex => "productivity_index",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong with a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    Missing,
    Blank,
    YearOutOfRange { found: i32 },
    NotFinite { found: f64 },
    Negative { found: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub field: Field,
    pub kind: ViolationKind,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Missing => write!(f, "{}: this field is required", self.field),
            ViolationKind::Blank => write!(f, "{}: must not be blank", self.field),
            ViolationKind::YearOutOfRange { found } => write!(
                f,
                "{}: year must be between {MIN_YEAR} and {MAX_YEAR} (found {found})",
                self.field
            ),
            ViolationKind::NotFinite { found } => {
                write!(f, "{}: must be a finite number (found {found})", self.field)
            }
            ViolationKind::Negative { found } => {
                write!(f, "{}: must not be negative (found {found})", self.field)
            }
        }
    }
}

/// Raised when a payload violates the observation invariants.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Observation is not valid ({} violation(s)): {}", .violations.len(), describe(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// The distinct fields that failed, in payload order.
    pub fn fields(&self) -> Vec<Field> {
        self.violations.iter().map(|v| v.field).unique().collect()
    }
}

fn describe(violations: &[FieldViolation]) -> String {
    violations.iter().join("; ")
}

impl ObservationInput {
    /// Validates the payload, reporting every violated field.
    ///
    /// Text fields are trimmed before they are checked and stored, including the
    /// policy flag. A missing policy flag becomes the empty string and a missing
    /// productivity index becomes `0`.
    pub fn validate(&self) -> Result<Observation, ValidationError> {
        let mut violations = Vec::new();

        let country = required_text(Field::Country, self.country.as_deref(), &mut violations);
        let crop = required_text(Field::Crop, self.crop.as_deref(), &mut violations);
        let year = match self.year {
            None => {
                violations.push(FieldViolation {
                    field: Field::Year,
                    kind: ViolationKind::Missing,
                });
                None
            }
            Some(found) if !(MIN_YEAR..=MAX_YEAR).contains(&found) => {
                violations.push(FieldViolation {
                    field: Field::Year,
                    kind: ViolationKind::YearOutOfRange { found },
                });
                None
            }
            Some(found) => Some(found),
        };

        let area_harvested = non_negative(Field::AreaHarvested, self.area_harvested, &mut violations);
        let production = non_negative(Field::Production, self.production, &mut violations);
        let rainfall = non_negative(Field::Rainfall, self.rainfall, &mut violations);
        let temperature = finite(Field::Temperature, self.temperature, &mut violations);
        let price_per_tonne = non_negative(Field::PricePerTonne, self.price_per_tonne, &mut violations);
        let policy_flag = self
            .policy_flag
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let transport_cost = non_negative(Field::TransportCost, self.transport_cost, &mut violations);
        let demand_supply_gap = finite(Field::DemandSupplyGap, self.demand_supply_gap, &mut violations);
        let productivity_index = non_negative(
            Field::ProductivityIndex,
            Some(self.productivity_index.unwrap_or(0.0)),
            &mut violations,
        );

        // Every recorded violation leaves its slot empty, so a fully populated tuple
        // implies an empty violation list.
        let (
            Some(country),
            Some(crop),
            Some(year),
            Some(area_harvested),
            Some(production),
            Some(rainfall),
            Some(temperature),
            Some(price_per_tonne),
            Some(transport_cost),
            Some(demand_supply_gap),
            Some(productivity_index),
        ) = (
            country,
            crop,
            year,
            area_harvested,
            production,
            rainfall,
            temperature,
            price_per_tonne,
            transport_cost,
            demand_supply_gap,
            productivity_index,
        )
        else {
            return Err(ValidationError { violations });
        };

        Ok(Observation {
            country,
            crop,
            year,
            area_harvested,
            production,
            rainfall,
            temperature,
            price_per_tonne,
            policy_flag,
            transport_cost,
            demand_supply_gap,
            productivity_index,
        })
    }
}

fn required_text(
    field: Field,
    value: Option<&str>,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match value.map(str::trim) {
        None => {
            violations.push(FieldViolation {
                field,
                kind: ViolationKind::Missing,
            });
            None
        }
        Some("") => {
            violations.push(FieldViolation {
                field,
                kind: ViolationKind::Blank,
            });
            None
        }
        Some(text) => Some(text.to_string()),
    }
}

fn finite(field: Field, value: Option<f64>, violations: &mut Vec<FieldViolation>) -> Option<f64> {
    match value {
        None => {
            violations.push(FieldViolation {
                field,
                kind: ViolationKind::Missing,
            });
            None
        }
        Some(found) if !found.is_finite() => {
            violations.push(FieldViolation {
                field,
                kind: ViolationKind::NotFinite { found },
            });
            None
        }
        Some(found) => Some(found),
    }
}

fn non_negative(
    field: Field,
    value: Option<f64>,
    violations: &mut Vec<FieldViolation>,
) -> Option<f64> {
    let found = finite(field, value, violations)?;
    if found < 0.0 {
        violations.push(FieldViolation {
            field,
            kind: ViolationKind::Negative { found },
        });
        return None;
    }
    Some(found)
}

/// Reads observation payloads from a headed CSV source using the raw field names.
///
/// Empty cells become absent fields; they are reported later by `validate`.
pub fn read_inputs_csv<R: Read>(reader: R) -> Result<Vec<ObservationInput>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv_reader.deserialize().collect()
}
