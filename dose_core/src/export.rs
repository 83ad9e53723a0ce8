//! Export helpers for calculated doses.
//!
//! Two artifacts are supported:
//! - a CSV report with one row per medication
//! - a form-field payload (JSON) keyed by the field identifiers of the
//!   printed dose chart template
//!
//! Both are written atomically so a reader never sees a half-written file.

use crate::engine::format_fixed;
use crate::types::{CalculatedDose, CalculationResult};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, TimeZone};
use fs2::FileExt;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Form field holding the patient weight
pub const WEIGHT_FIELD: &str = "Weight";

/// Form field holding the chart date
pub const DATE_FIELD: &str = "Date";

/// Lowercase "name route" or "name" keys to template field identifiers
static FIELD_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("epinephrine 1:10,000 iv/io", "EpinephrineIV"),
        ("epinephrine 1:10,000", "EpinephrineIV"),
        ("epinephrine 1:1,000 et", "EpinephrineET"),
        ("epinephrine 1:1,000", "EpinephrineET"),
        ("atropine 1 mg/10 ml iv", "Atropine_01_IV"),
        ("atropine 0.5 mg/ml iv", "Atropine_05_IV"),
        ("atropine 0.6 mg/ml iv", "Atropine_06_IV"),
        ("atropine et 1 mg/10 ml et", "Atropine_01_ET"),
        ("atropine et 0.5 mg/ml et", "Atropine_05_ET"),
        ("atropine et 0.6 mg/ml et", "Atropine_06_ET"),
        ("amiodarone", "Amiodarone"),
        ("adenosine 1st", "Adenosine1"),
        ("adenosine 2nd", "Adenosine2"),
        ("calcium", "Calcium"),
        ("flumazenil", "Flumazenil"),
        ("naloxone iv", "NaloxoneIV"),
        ("naloxone et", "NaloxoneET"),
        ("glucagon", "Glucagon"),
        ("lidocaine iv", "LidocaineIV"),
        ("lidocaine et", "LidocaineET"),
        ("rocuronium", "Rocuronium"),
        ("sodium bicarbonate", "Bicarbonate"),
        ("sodium chloride", "VolumeExpanders"),
    ])
});

/// Template field for a record, looked up by "name route" then by name
pub fn field_id(name: &str, route: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    let with_route = format!("{} {}", name, route.trim().to_lowercase());
    FIELD_MAP
        .get(with_route.as_str())
        .or_else(|| FIELD_MAP.get(name.as_str()))
        .copied()
}

/// Rough age bracket for a pediatric weight, for report headers
pub fn estimate_age(weight: f64) -> &'static str {
    match weight {
        w if w < 3.0 => "Newborn",
        w if w < 6.0 => "1-3 months",
        w if w < 8.0 => "3-6 months",
        w if w < 10.0 => "6-9 months",
        w if w < 12.0 => "9-12 months",
        w if w < 14.0 => "1-2 years",
        w if w < 16.0 => "2-3 years",
        w if w < 20.0 => "4-5 years",
        w if w < 25.0 => "6-8 years",
        w if w < 35.0 => "9-11 years",
        w if w < 45.0 => "12-14 years",
        _ => "15+ years",
    }
}

/// Total dose for display: the amount with its unit, or the volume in mL
/// when the concentration gives no amount
pub fn format_total_dose(result: &CalculationResult, precision: usize) -> String {
    match result {
        Ok(calc) if calc.volume_ml > 0.0 => match (calc.dose_amount, calc.dose_unit) {
            (Some(amount), Some(unit)) => {
                format!("{} {}", format_fixed(amount, precision), unit.symbol())
            }
            _ => format!("{} mL", format_fixed(calc.volume_ml, precision)),
        },
        _ => "Error".to_string(),
    }
}

/// Name of a generated report, e.g. `DrugDoses_20260101_093000.csv`
pub fn report_file_name<Tz: TimeZone>(now: &DateTime<Tz>, extension: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("DrugDoses_{}.{}", now.format("%Y%m%d_%H%M%S"), extension)
}

/// Field payload for the dose chart template
///
/// Contains the weight, the date, and the display volume of every successful
/// record that maps to a field. When two records map to the same field the
/// first one wins.
pub fn build_field_payload(
    weight: f64,
    date: NaiveDate,
    doses: &[CalculatedDose<'_>],
    precision: usize,
) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert(WEIGHT_FIELD.to_string(), weight.to_string());
    payload.insert(DATE_FIELD.to_string(), date.format("%Y-%m-%d").to_string());

    for dose in doses {
        let Ok(calc) = &dose.result else {
            continue;
        };
        match field_id(&dose.record.name, &dose.record.route) {
            Some(field) => {
                payload
                    .entry(field.to_string())
                    .or_insert_with(|| format!("{} mL", format_fixed(calc.volume_ml, precision)));
            }
            None => tracing::debug!("No template field for {}", dose.record.name),
        }
    }

    payload
}

/// A row in the CSV report
#[derive(Debug, serde::Serialize)]
struct ReportRow<'a> {
    weight_kg: f64,
    partition: &'static str,
    name: &'a str,
    route: &'a str,
    category: &'a str,
    concentration: &'a str,
    volume_ml: Option<String>,
    total_dose: String,
    notes: &'a str,
    error: Option<String>,
}

impl<'a> ReportRow<'a> {
    fn new(weight: f64, dose: &'a CalculatedDose<'a>, precision: usize) -> Self {
        let record = dose.record;
        ReportRow {
            weight_kg: weight,
            partition: record.partition.label(),
            name: &record.name,
            route: &record.route,
            category: &record.category,
            concentration: &record.concentration.label,
            volume_ml: dose
                .result
                .as_ref()
                .ok()
                .map(|c| format_fixed(c.volume_ml, precision)),
            total_dose: format_total_dose(&dose.result, precision),
            notes: &record.notes,
            error: dose.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Write a CSV report of `doses` to `path`, replacing any existing file
///
/// Returns the number of rows written.
pub fn write_csv_report(
    path: &Path,
    weight: f64,
    doses: &[CalculatedDose<'_>],
    precision: usize,
) -> Result<usize> {
    write_atomically(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for dose in doses {
            writer.serialize(ReportRow::new(weight, dose, precision))?;
        }
        writer.flush()?;
        Ok(())
    })?;

    tracing::info!("Wrote {} rows to {:?}", doses.len(), path);
    Ok(doses.len())
}

/// Write a field payload as pretty JSON to `path`, replacing any existing file
pub fn write_field_payload(path: &Path, payload: &BTreeMap<String, String>) -> Result<()> {
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, payload)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    })?;

    tracing::info!("Wrote {} fields to {:?}", payload.len(), path);
    Ok(())
}

/// Write through a locked temp file in the target directory, then rename
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&std::fs::File) -> Result<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    write(temp.as_file())?;

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
