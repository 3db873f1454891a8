//! Tabular and JSON exports of stored predictions.
//!
//! The CSV column titles and the JSON keys are consumed by downstream spreadsheets and
//! scripts, so both layouts are fixed.

use crate::store::StoredRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CSV_HEADER: [&str; 13] = [
    "Crop",
    "Country",
    "Year",
    "Area Harvested (ha)",
    "Rainfall (mm)",
    "Temperature (C)",
    "Policy Flag",
    "Transport Cost (USD)",
    "Demand Supply Gap",
    "Predicted Production",
    "Predicted Yield",
    "Predicted Price",
    "Date Created",
];

/// `strftime` layout of the "Date Created" column.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error while writing export: {0}")]
    Io(#[from] io::Error),
}

/// One JSON export object. Field order is the key order in the output.
#[derive(Serialize)]
struct JsonRow<'a> {
    crop: &'a str,
    country: &'a str,
    year: i32,
    area_harvested_ha: f64,
    rainfall_mm: f64,
    temperature_c: f64,
    policy_flag: &'a str,
    transport_cost_usd: f64,
    demand_supply_gap: f64,
    predicted_production: f64,
    predicted_yield: f64,
    predicted_price: f64,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a StoredRecord> for JsonRow<'a> {
    fn from(record: &'a StoredRecord) -> Self {
        let observation = &record.observation;
        Self {
            crop: &observation.crop,
            country: &observation.country,
            year: observation.year,
            area_harvested_ha: observation.area_harvested,
            rainfall_mm: observation.rainfall,
            temperature_c: observation.temperature,
            policy_flag: &observation.policy_flag,
            transport_cost_usd: observation.transport_cost,
            demand_supply_gap: observation.demand_supply_gap,
            predicted_production: record.estimate.predicted_production,
            predicted_yield: record.estimate.predicted_yield,
            predicted_price: record.estimate.predicted_price,
            created_at: record.created_at,
        }
    }
}

/// Shortest round-trip form, always with a decimal point or exponent (`50.0`).
fn float_cell(buffer: &mut ryu::Buffer, value: f64) -> String {
    buffer.format(value).to_string()
}

pub fn write_csv<W: Write>(writer: W, records: &[StoredRecord]) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;

    let mut ryu_buffer = ryu::Buffer::new();
    for record in records {
        let observation = &record.observation;
        let estimate = &record.estimate;
        csv_writer.write_record([
            observation.crop.clone(),
            observation.country.clone(),
            observation.year.to_string(),
            float_cell(&mut ryu_buffer, observation.area_harvested),
            float_cell(&mut ryu_buffer, observation.rainfall),
            float_cell(&mut ryu_buffer, observation.temperature),
            observation.policy_flag.clone(),
            float_cell(&mut ryu_buffer, observation.transport_cost),
            float_cell(&mut ryu_buffer, observation.demand_supply_gap),
            float_cell(&mut ryu_buffer, estimate.predicted_production),
            float_cell(&mut ryu_buffer, estimate.predicted_yield),
            float_cell(&mut ryu_buffer, estimate.predicted_price),
            record.created_at.format(DATE_FORMAT).to_string(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(writer: W, records: &[StoredRecord]) -> Result<(), ExportError> {
    let rows: Vec<JsonRow> = records.iter().map(JsonRow::from).collect();
    serde_json::to_writer_pretty(writer, &rows)?;
    Ok(())
}

pub fn write_export<W: Write>(
    writer: W,
    records: &[StoredRecord],
    format: ExportFormat,
) -> Result<(), ExportError> {
    match format {
        ExportFormat::Csv => write_csv(writer, records),
        ExportFormat::Json => write_json(writer, records),
    }
}

/// Writes the export to `path` through a temporary sibling file, so a failed write
/// never leaves a truncated export behind.
pub fn export_to_path(
    path: &Path,
    records: &[StoredRecord],
    format: ExportFormat,
) -> Result<(), ExportError> {
    let temp_path = temp_sibling(path);
    let write_result = (|| -> Result<(), ExportError> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        write_export(&mut writer, records, format)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(io::Error::other)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let cleanup = fs::remove_file(&temp_path);
        if let Err(cleanup_err) = cleanup {
            log::debug!("Could not remove '{}': {cleanup_err}", temp_path.display());
        }
        return Err(err);
    }

    fs::rename(&temp_path, path)?;
    log::info!("Wrote {} records to '{}'", records.len(), path.display());
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimationResult;
    use crate::observation::Observation;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn record() -> StoredRecord {
        StoredRecord {
            id: 7,
            observation: Observation {
                country: "Kenya".to_string(),
                crop: "Maize".to_string(),
                year: 2023,
                area_harvested: 10.0,
                production: 50.0,
                rainfall: 200.0,
                temperature: 25.0,
                price_per_tonne: 300.0,
                policy_flag: "Subsidy".to_string(),
                transport_cost: 100.0,
                demand_supply_gap: 10.0,
                productivity_index: 0.0,
            },
            estimate: EstimationResult {
                predicted_production: 50.0,
                predicted_yield: 5.0,
                predicted_price: 330.0,
            },
            created_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
        }
    }

    #[test]
    fn csv_has_fixed_header_and_round_trip_floats() {
        let mut out = Vec::new();
        write_csv(&mut out, &[record()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Crop,Country,Year,Area Harvested (ha),Rainfall (mm),Temperature (C),Policy Flag,\
             Transport Cost (USD),Demand Supply Gap,Predicted Production,Predicted Yield,\
             Predicted Price,Date Created"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Maize,Kenya,2023,10.0,200.0,25.0,Subsidy,100.0,10.0,50.0,5.0,330.0,2024-03-09 14:05:07"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn json_uses_raw_field_names_in_order() {
        let mut out = Vec::new();
        write_json(&mut out, &[record()]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let row = &value[0];
        assert_eq!(row["crop"], "Maize");
        assert_eq!(row["area_harvested_ha"], 10.0);
        assert_eq!(row["predicted_price"], 330.0);
        assert_eq!(row["created_at"], "2024-03-09T14:05:07Z");
        // identifiers and the raw production are not part of the export
        assert!(row.get("id").is_none());
        assert!(row.get("production_tonnes").is_none());

        let text = String::from_utf8(out).unwrap();
        let crop_at = text.find("\"crop\"").unwrap();
        let created_at = text.find("\"created_at\"").unwrap();
        assert!(crop_at < created_at);
    }

    #[test]
    fn empty_export_still_has_header() {
        let mut out = Vec::new();
        write_export(&mut out, &[], ExportFormat::Csv).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);

        let mut out = Vec::new();
        write_export(&mut out, &[], ExportFormat::Json).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[]");
    }

    #[test]
    fn export_to_path_leaves_no_temporary_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        export_to_path(&path, &[record()], ExportFormat::Csv).unwrap();
        assert!(path.exists());
        assert!(!temp_sibling(&path).exists());
    }
}
