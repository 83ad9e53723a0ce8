//! Core domain types for the pediatric dose calculator.
//!
//! This module defines the fundamental types used throughout the system:
//! - Medication records and their partitions
//! - Concentrations and dose units
//! - Calculation outputs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CalcError;

// ============================================================================
// Partitions
// ============================================================================

/// Which fixed group of the table a medication belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Emergency,
    /// Routine / non-emergency protocol medications
    Prrt,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Emergency => "emergency",
            Partition::Prrt => "prrt",
        }
    }

    /// Heading used by presentation and export layers
    pub fn label(&self) -> &'static str {
        match self {
            Partition::Emergency => "Emergency",
            Partition::Prrt => "PRRT",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selection over the table: one partition or both
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionFilter {
    Emergency,
    Prrt,
    #[default]
    All,
}

impl PartitionFilter {
    pub fn includes(&self, partition: Partition) -> bool {
        match self {
            PartitionFilter::Emergency => partition == Partition::Emergency,
            PartitionFilter::Prrt => partition == Partition::Prrt,
            PartitionFilter::All => true,
        }
    }
}

impl From<Partition> for PartitionFilter {
    fn from(partition: Partition) -> Self {
        match partition {
            Partition::Emergency => PartitionFilter::Emergency,
            Partition::Prrt => PartitionFilter::Prrt,
        }
    }
}

impl FromStr for PartitionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "emergency" => Ok(PartitionFilter::Emergency),
            "prrt" => Ok(PartitionFilter::Prrt),
            "all" => Ok(PartitionFilter::All),
            other => Err(format!(
                "unknown medication type '{}' (expected emergency, prrt or all)",
                other
            )),
        }
    }
}

// ============================================================================
// Concentration
// ============================================================================

/// Unit of the amount delivered per mL
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Mg,
    MEq,
}

impl DoseUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            DoseUnit::Mg => "mg",
            DoseUnit::MEq => "mEq",
        }
    }
}

/// Concentration of a preparation
///
/// `label` is what clinicians read; `per_ml` is the amount of `unit` in one mL
/// and is `None` when no dose amount can be derived (e.g. "0.9%").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Concentration {
    pub label: String,
    pub per_ml: Option<f64>,
    pub unit: DoseUnit,
}

impl Concentration {
    /// Concentration in mg/mL, labelled the usual way
    pub fn mg_per_ml(amount: f64) -> Self {
        Self {
            label: format!("{} mg/mL", amount),
            per_ml: Some(amount),
            unit: DoseUnit::Mg,
        }
    }

    pub fn meq_per_ml(amount: f64) -> Self {
        Self {
            label: format!("{} mEq/mL", amount),
            per_ml: Some(amount),
            unit: DoseUnit::MEq,
        }
    }

    /// A display-only concentration with no derivable amount
    pub fn label_only(label: &str) -> Self {
        Self {
            label: label.to_string(),
            per_ml: None,
            unit: DoseUnit::Mg,
        }
    }

    /// Amount per mL when it is usable for dose derivation
    pub fn usable_per_ml(&self) -> Option<f64> {
        self.per_ml.filter(|c| c.is_finite() && *c > 0.0)
    }
}

// ============================================================================
// Medication Record
// ============================================================================

/// One row of the medication table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub name: String,
    pub concentration: Concentration,
    /// Formula over `W` (weight, kg) and optionally `D` (secondary dose)
    pub equation: String,
    pub min_volume_ml: Option<f64>,
    pub max_volume_ml: Option<f64>,
    pub route: String,
    pub category: String,
    pub notes: String,
    pub partition: Partition,
    #[serde(default)]
    pub requires_dose_input: bool,
}

// ============================================================================
// Calculation Output
// ============================================================================

/// A successful calculation for one record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseCalculation {
    /// Volume after clamping
    pub volume_ml: f64,
    /// `volume_ml * concentration`, in the concentration's unit, when derivable
    pub dose_amount: Option<f64>,
    pub dose_unit: Option<DoseUnit>,
    /// Volume rounded to the configured precision
    pub display_volume: String,
    /// Equation text with symbols replaced by their values
    pub equation_used: String,
}

/// Outcome of a single calculation: numbers or an error, never both
pub type CalculationResult = std::result::Result<DoseCalculation, CalcError>;

/// A batch entry pairing a record with its own outcome
#[derive(Clone, Debug)]
pub struct CalculatedDose<'a> {
    pub record: &'a MedicationRecord,
    pub result: CalculationResult,
}

impl CalculatedDose<'_> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

// ============================================================================
// Table statistics
// ============================================================================

/// Descriptive summary of the medication table
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FormularyStats {
    pub total: usize,
    pub emergency_count: usize,
    pub prrt_count: usize,
    pub distinct_categories: BTreeSet<String>,
    pub distinct_routes: BTreeSet<String>,
}
