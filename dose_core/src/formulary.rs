//! Built-in medication reference table.
//!
//! The table holds two fixed partitions, `emergency` and `prrt`, in
//! declaration order. It is built once and never mutated; every query
//! borrows from it.

use crate::equation::{Equation, Symbol};
use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Cached default formulary, built on first use
static DEFAULT_FORMULARY: Lazy<Formulary> = Lazy::new(build_default_formulary);

/// Get a reference to the process-wide default formulary
pub fn get_default_formulary() -> &'static Formulary {
    &DEFAULT_FORMULARY
}

/// Combined filter used by presentation layers
///
/// Every populated field must match; empty strings are ignored.
#[derive(Clone, Debug, Default)]
pub struct RecordQuery {
    pub partition: PartitionFilter,
    pub search: Option<String>,
    pub category: Option<String>,
    pub route: Option<String>,
}

/// An ordered, read-only medication table
#[derive(Clone, Debug)]
pub struct Formulary {
    records: Vec<MedicationRecord>,
}

impl Formulary {
    /// Wrap a list of records. Declaration order is preserved per partition.
    pub fn new(records: Vec<MedicationRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[MedicationRecord] {
        &self.records
    }

    fn in_partition(&self, partition: Partition) -> impl Iterator<Item = &MedicationRecord> {
        self.records.iter().filter(move |r| r.partition == partition)
    }

    /// Records for one partition, or emergency followed by prrt for `All`
    pub fn by_type(&self, filter: PartitionFilter) -> Vec<&MedicationRecord> {
        match filter {
            PartitionFilter::Emergency => self.in_partition(Partition::Emergency).collect(),
            PartitionFilter::Prrt => self.in_partition(Partition::Prrt).collect(),
            PartitionFilter::All => self
                .in_partition(Partition::Emergency)
                .chain(self.in_partition(Partition::Prrt))
                .collect(),
        }
    }

    /// Case-insensitive substring match on name, category, route or notes
    pub fn search(&self, query: &str) -> Vec<&MedicationRecord> {
        let needle = query.to_lowercase();
        self.by_type(PartitionFilter::All)
            .into_iter()
            .filter(|r| matches_query(r, &needle))
            .collect()
    }

    /// Exact, case-insensitive category match
    pub fn filter_by_category(&self, category: &str) -> Vec<&MedicationRecord> {
        let wanted = category.to_lowercase();
        self.by_type(PartitionFilter::All)
            .into_iter()
            .filter(|r| r.category.to_lowercase() == wanted)
            .collect()
    }

    /// Case-insensitive substring match on route (`"IM"` matches `"IV/IM"`)
    pub fn filter_by_route(&self, route: &str) -> Vec<&MedicationRecord> {
        let wanted = route.to_lowercase();
        self.by_type(PartitionFilter::All)
            .into_iter()
            .filter(|r| r.route.to_lowercase().contains(&wanted))
            .collect()
    }

    /// Records of `query.partition` matching every other populated filter
    pub fn select(&self, query: &RecordQuery) -> Vec<&MedicationRecord> {
        let search = non_empty(&query.search).map(str::to_lowercase);
        let category = non_empty(&query.category).map(str::to_lowercase);
        let route = non_empty(&query.route).map(str::to_lowercase);

        self.by_type(query.partition)
            .into_iter()
            .filter(|r| search.as_deref().map_or(true, |q| matches_query(r, q)))
            .filter(|r| {
                category
                    .as_deref()
                    .map_or(true, |c| r.category.to_lowercase() == c)
            })
            .filter(|r| {
                route
                    .as_deref()
                    .map_or(true, |rt| r.route.to_lowercase().contains(rt))
            })
            .collect()
    }

    /// Records that cannot be calculated without a secondary dose
    pub fn requiring_dose_input(&self) -> Vec<&MedicationRecord> {
        self.by_type(PartitionFilter::All)
            .into_iter()
            .filter(|r| r.requires_dose_input)
            .collect()
    }

    /// Look up a record by case-insensitive name
    ///
    /// Some names exist in both partitions; without a partition the
    /// emergency entry is returned first.
    pub fn find(&self, name: &str, partition: Option<Partition>) -> Option<&MedicationRecord> {
        let filter = partition.map(PartitionFilter::from).unwrap_or_default();
        self.by_type(filter)
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn stats(&self) -> FormularyStats {
        let emergency_count = self.in_partition(Partition::Emergency).count();
        let prrt_count = self.in_partition(Partition::Prrt).count();

        FormularyStats {
            total: self.records.len(),
            emergency_count,
            prrt_count,
            distinct_categories: self.records.iter().map(|r| r.category.clone()).collect(),
            distinct_routes: self.records.iter().map(|r| r.route.clone()).collect(),
        }
    }

    /// Check the table for authoring mistakes
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen: HashSet<(Partition, String)> = HashSet::new();

        for record in &self.records {
            let name = &record.name;
            if name.trim().is_empty() {
                errors.push(format!("{} record has empty name", record.partition));
            }
            if !seen.insert((record.partition, name.to_lowercase())) {
                errors.push(format!(
                    "Duplicate name '{}' in {} partition",
                    name, record.partition
                ));
            }
            if record.concentration.label.trim().is_empty() {
                errors.push(format!("'{}' has empty concentration label", name));
            }

            match Equation::parse(&record.equation) {
                Ok(equation) => {
                    let uses_dose = equation.uses(Symbol::Dose);
                    if record.requires_dose_input && !uses_dose {
                        errors.push(format!(
                            "'{}' requires dose input but equation '{}' has no D",
                            name, record.equation
                        ));
                    }
                    if !record.requires_dose_input && uses_dose {
                        errors.push(format!(
                            "'{}' equation '{}' uses D but dose input is not required",
                            name, record.equation
                        ));
                    }
                    if !record.requires_dose_input && !equation.uses(Symbol::Weight) {
                        errors.push(format!(
                            "'{}' equation '{}' does not reference W",
                            name, record.equation
                        ));
                    }
                }
                Err(e) => errors.push(format!(
                    "'{}' equation '{}' does not parse: {}",
                    name, record.equation, e
                )),
            }

            if let (Some(min), Some(max)) = (record.min_volume_ml, record.max_volume_ml) {
                if min > max {
                    errors.push(format!(
                        "'{}': min volume {} mL > max volume {} mL",
                        name, min, max
                    ));
                }
            }
        }

        errors
    }
}

fn matches_query(record: &MedicationRecord, needle: &str) -> bool {
    [&record.name, &record.category, &record.route, &record.notes]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn emergency(
    name: &str,
    concentration: Concentration,
    equation: &str,
    bounds: (Option<f64>, Option<f64>),
    route: &str,
    category: &str,
    notes: &str,
) -> MedicationRecord {
    MedicationRecord {
        name: name.into(),
        concentration,
        equation: equation.into(),
        min_volume_ml: bounds.0,
        max_volume_ml: bounds.1,
        route: route.into(),
        category: category.into(),
        notes: notes.into(),
        partition: Partition::Emergency,
        requires_dose_input: false,
    }
}

fn prrt(
    name: &str,
    concentration: Concentration,
    equation: &str,
    bounds: (Option<f64>, Option<f64>),
    route: &str,
    category: &str,
    notes: &str,
) -> MedicationRecord {
    MedicationRecord {
        partition: Partition::Prrt,
        ..emergency(name, concentration, equation, bounds, route, category, notes)
    }
}

fn with_dose_input(record: MedicationRecord) -> MedicationRecord {
    MedicationRecord {
        requires_dose_input: true,
        ..record
    }
}

/// Builds the default formulary
///
/// **Note**: prefer `get_default_formulary()`, which returns a cached
/// reference. This is retained for tests and custom tables.
pub fn build_default_formulary() -> Formulary {
    use Concentration as C;

    let records = vec![
        // ====================================================================
        // Emergency
        // ====================================================================
        emergency(
            "Epinephrine 1:10,000",
            C::mg_per_ml(0.1),
            "0.1 * W",
            (Some(0.0), Some(10.0)),
            "IV/IO",
            "Cardiac",
            "Cardiac arrest, symptomatic bradycardia",
        ),
        emergency(
            "Epinephrine 1:1,000",
            C::mg_per_ml(1.0),
            "0.1 * W",
            (Some(0.0), Some(2.5)),
            "ET",
            "Cardiac",
            "Endotracheal administration",
        ),
        emergency(
            "Atropine 1 mg/10 ml",
            C::mg_per_ml(0.1),
            "0.2 * W",
            (Some(1.0), Some(5.0)),
            "IV",
            "Cardiac",
            "Minimum dose 1 mL, maximum dose 5 mL",
        ),
        emergency(
            "Atropine 0.5 mg/ml",
            C::mg_per_ml(0.5),
            "0.04 * W",
            (Some(0.2), Some(1.0)),
            "IV",
            "Cardiac",
            "Minimum dose 0.2 mL, maximum dose 1 mL",
        ),
        emergency(
            "Atropine 0.6 mg/ml",
            C::mg_per_ml(0.6),
            "0.033 * W",
            (Some(0.167), Some(0.833)),
            "IV",
            "Cardiac",
            "Minimum dose 0.167 mL, maximum dose 0.833 mL",
        ),
        emergency(
            "Atropine ET 1 mg/10 ml",
            C::mg_per_ml(0.1),
            "0.6 * W",
            (Some(0.0), Some(20.0)),
            "ET",
            "Cardiac",
            "Endotracheal administration",
        ),
        emergency(
            "Atropine ET 0.5 mg/ml",
            C::mg_per_ml(0.5),
            "0.12 * W",
            (Some(0.0), Some(4.0)),
            "ET",
            "Cardiac",
            "Endotracheal administration",
        ),
        emergency(
            "Atropine ET 0.6 mg/ml",
            C::mg_per_ml(0.6),
            "0.1 * W",
            (Some(0.0), Some(3.33)),
            "ET",
            "Cardiac",
            "Endotracheal administration",
        ),
        emergency(
            "Amiodarone",
            C::mg_per_ml(50.0),
            "0.1 * W",
            (Some(0.0), Some(300.0)),
            "IV",
            "Cardiac",
            "For refractory VF/VT",
        ),
        emergency(
            "Adenosine 1st",
            C::mg_per_ml(3.0),
            "0.033 * W",
            (Some(0.0), Some(6.0)),
            "IV",
            "Cardiac",
            "First dose for SVT, rapid push",
        ),
        emergency(
            "Adenosine 2nd",
            C::mg_per_ml(3.0),
            "0.067 * W",
            (Some(0.0), Some(12.0)),
            "IV",
            "Cardiac",
            "Second dose for SVT if needed",
        ),
        emergency(
            "Calcium",
            C::mg_per_ml(100.0),
            "0.2 * W",
            (Some(0.0), Some(20.0)),
            "IV",
            "Electrolyte",
            "Calcium gluconate or chloride",
        ),
        emergency(
            "Flumazenil",
            C::mg_per_ml(0.1),
            "0.1 * W",
            (Some(0.0), Some(2.0)),
            "IV",
            "Antidote",
            "Benzodiazepine reversal, max 2 mL",
        ),
        emergency(
            "Glucagon",
            C::mg_per_ml(1.0),
            "0.1 * W",
            (Some(0.0), Some(1.0)),
            "IV/IM",
            "Endocrine",
            "Hypoglycemia, maximum 1 mL",
        ),
        emergency(
            "Lidocaine IV",
            C::mg_per_ml(20.0),
            "0.05 * W",
            (Some(0.0), None),
            "IV",
            "Cardiac",
            "Ventricular arrhythmias",
        ),
        emergency(
            "Lidocaine ET",
            C::mg_per_ml(20.0),
            "0.1 * W",
            (Some(0.0), None),
            "ET",
            "Cardiac",
            "Endotracheal administration",
        ),
        emergency(
            "Naloxone IV",
            C::mg_per_ml(0.4),
            "0.025 * W",
            (Some(0.0), Some(2.0)),
            "IV",
            "Antidote",
            "Opioid reversal, maximum 2 mL",
        ),
        emergency(
            "Naloxone ET",
            C::mg_per_ml(0.4),
            "0.05 * W",
            (Some(0.0), None),
            "ET",
            "Antidote",
            "Endotracheal administration",
        ),
        emergency(
            "Rocuronium",
            C::mg_per_ml(10.0),
            "0.06 * W",
            (Some(0.0), None),
            "IV",
            "Neuromuscular",
            "Rapid sequence intubation",
        ),
        emergency(
            "Sodium Bicarbonate",
            C::meq_per_ml(1.0),
            "1.0 * W",
            (Some(0.0), None),
            "IV",
            "Electrolyte",
            "Metabolic acidosis",
        ),
        emergency(
            "Sodium Chloride",
            C::label_only("0.9%"),
            "20.0 * W",
            (Some(0.0), None),
            "IV",
            "Fluid",
            "Volume expansion, bolus",
        ),
        // ====================================================================
        // PRRT
        // ====================================================================
        prrt(
            "Epinephrine (IM)",
            C::mg_per_ml(1.0),
            "0.01 * W",
            (Some(0.0), Some(0.5)),
            "IM",
            "Allergy",
            "Anaphylaxis, severe allergic reaction",
        ),
        with_dose_input(prrt(
            "Hydrocortisone Na succinate",
            C::mg_per_ml(50.0),
            "D / 50",
            (Some(0.0), Some(2.0)),
            "IV",
            "Steroid",
            "Requires dose input, max 100 mg/dose",
        )),
        prrt(
            "Dexamethasone",
            C::mg_per_ml(4.0),
            "(0.6 * W) / 4",
            (Some(0.0), Some(4.0)),
            "IV/IM",
            "Steroid",
            "Croup, inflammation, max 16 mg",
        ),
        prrt(
            "Methylprednisolone",
            C::mg_per_ml(62.5),
            "(1 * W) / 62.5",
            (Some(0.0), None),
            "IV",
            "Steroid",
            "1-2 mg/kg, varies per protocol",
        ),
        prrt(
            "Acetaminophen",
            C::mg_per_ml(10.0),
            "(15 * W) / 10",
            (Some(0.0), Some(7.5)),
            "PO/PR",
            "Analgesic",
            "Fever and pain management, 15 mg/kg",
        ),
        prrt(
            "Diphenhydramine",
            C::mg_per_ml(50.0),
            "(1 * W) / 50",
            (Some(0.0), Some(1.0)),
            "IV/IM",
            "Antihistamine",
            "Allergic reactions, 1-2 mg/kg, max 50 mg",
        ),
        prrt(
            "Albuterol",
            C::mg_per_ml(2.0),
            "(0.15 * W) / 2",
            (Some(0.0), Some(2.5)),
            "Nebulized",
            "Respiratory",
            "Bronchospasm, max 5 mg",
        ),
        prrt(
            "Racepinephrine",
            C::mg_per_ml(22.5),
            "0.05 * W",
            (Some(0.0), None),
            "Nebulized",
            "Respiratory",
            "0.05-0.1 mL/kg, per clinical order",
        ),
        with_dose_input(prrt(
            "Ipratropium",
            C::mg_per_ml(0.25),
            "D * 4",
            (Some(0.0), Some(2.0)),
            "Nebulized",
            "Respiratory",
            "Requires dose input, max 0.5 mg",
        )),
        prrt(
            "Flumazenil",
            C::mg_per_ml(0.1),
            "(0.01 * W) / 0.1",
            (Some(0.0), Some(2.0)),
            "IV",
            "Antidote",
            "Benzodiazepine reversal, max 0.2 mg",
        ),
        prrt(
            "Naloxone",
            C::mg_per_ml(0.4),
            "(0.1 * W) / 0.4",
            (Some(0.0), Some(5.0)),
            "IV",
            "Antidote",
            "Opioid reversal, max 2 mg",
        ),
        prrt(
            "Levetiracetam",
            C::mg_per_ml(100.0),
            "(20 * W) / 100",
            (Some(0.0), Some(45.0)),
            "IV",
            "Anticonvulsant",
            "20-60 mg/kg, max 4500 mg",
        ),
        prrt(
            "Glucagon",
            C::mg_per_ml(1.0),
            "(0.02 * W) / 1",
            (Some(0.0), Some(1.0)),
            "IV/IM",
            "Endocrine",
            "Hypoglycemia, 0.02-0.03 mg/kg, max 1 mg",
        ),
        prrt(
            "Furosemide",
            C::mg_per_ml(10.0),
            "(1 * W) / 10",
            (Some(0.0), Some(4.0)),
            "IV",
            "Diuretic",
            "Edema, hypertension, max 40 mg",
        ),
    ];

    Formulary::new(records)
}
