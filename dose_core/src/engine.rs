//! Dose calculation engine.
//!
//! One calculation runs:
//! 1. Weight validation against the configured maximum
//! 2. Secondary dose check for records that need one
//! 3. Equation evaluation with `W` (and `D`) bound
//! 4. Clamping to the record's min then max volume
//! 5. Dose amount derivation from the concentration
//! 6. Fixed-precision formatting of the volume
//!
//! Every failure is returned inside the result, so batches never stop early.

use crate::config::MAX_PRECISION;
use crate::equation::{Bindings, Equation};
use crate::error::CalcError;
use crate::formulary::{get_default_formulary, Formulary};
use crate::types::*;

/// Decimal places used for display volumes unless configured otherwise
pub const DEFAULT_PRECISION: usize = 2;

/// Largest accepted patient weight (kg) unless configured otherwise
pub const DEFAULT_MAX_WEIGHT_KG: f64 = 200.0;

/// Tunables for a calculation run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalculationSettings {
    pub precision: usize,
    pub max_weight_kg: f64,
}

impl Default for CalculationSettings {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            max_weight_kg: DEFAULT_MAX_WEIGHT_KG,
        }
    }
}

/// Check that `weight` is finite and within `(0, max_weight_kg]`
pub fn validate_weight(weight: f64, max_weight_kg: f64) -> Result<f64, CalcError> {
    if weight.is_finite() && weight > 0.0 && weight <= max_weight_kg {
        Ok(weight)
    } else {
        Err(CalcError::InvalidWeight {
            weight,
            max: max_weight_kg,
        })
    }
}

/// Apply the lower bound, then the upper bound
///
/// When `min > max` the upper bound wins because it is applied last.
pub fn clamp_volume(volume: f64, min_ml: Option<f64>, max_ml: Option<f64>) -> f64 {
    let mut v = volume;
    if let Some(min) = min_ml {
        v = v.max(min);
    }
    if let Some(max) = max_ml {
        v = v.min(max);
    }
    v
}

/// Format with `precision` decimals, rounding half away from zero
///
/// Rounding applies to the binary value, so `1.005` (stored just below) gives
/// `"1.00"`. Precision is capped at [`MAX_PRECISION`].
pub fn format_fixed(value: f64, precision: usize) -> String {
    let precision = precision.min(MAX_PRECISION);
    let factor = 10f64.powi(precision as i32);
    let mut rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        // avoid "-0.00"
        rounded = 0.0;
    }
    format!("{:.*}", precision, rounded)
}

/// Calculate one record with default settings
pub fn calculate_volume(
    record: &MedicationRecord,
    weight: f64,
    custom_dose: Option<f64>,
) -> CalculationResult {
    calculate_volume_with(&CalculationSettings::default(), record, weight, custom_dose)
}

/// Calculate one record
pub fn calculate_volume_with(
    settings: &CalculationSettings,
    record: &MedicationRecord,
    weight: f64,
    custom_dose: Option<f64>,
) -> CalculationResult {
    let weight = validate_weight(weight, settings.max_weight_kg)?;

    if record.requires_dose_input {
        match custom_dose {
            None => {
                return Err(CalcError::MissingDoseInput {
                    name: record.name.clone(),
                })
            }
            Some(dose) if !(dose.is_finite() && dose > 0.0) => {
                return Err(CalcError::InvalidDose {
                    name: record.name.clone(),
                    dose,
                })
            }
            Some(_) => {}
        }
    }

    let bindings = Bindings::new(weight).with_dose(custom_dose);
    let equation = Equation::parse(&record.equation)?;
    let raw = equation.eval(&bindings)?;

    let volume_ml = clamp_volume(raw, record.min_volume_ml, record.max_volume_ml);
    let per_ml = record.concentration.usable_per_ml();
    let equation_used = equation.substituted(&bindings);

    tracing::debug!(
        "{}: {} = {} mL, clamped to {} mL",
        record.name,
        equation_used,
        raw,
        volume_ml
    );

    Ok(DoseCalculation {
        volume_ml,
        dose_amount: per_ml.map(|c| volume_ml * c),
        dose_unit: per_ml.map(|_| record.concentration.unit),
        display_volume: format_fixed(volume_ml, settings.precision),
        equation_used,
    })
}

/// Calculate every record of a partition selection in the default formulary
///
/// Records that need a secondary dose are skipped.
pub fn calculate_all(filter: PartitionFilter, weight: f64) -> Vec<CalculatedDose<'static>> {
    calculate_all_with(
        &CalculationSettings::default(),
        get_default_formulary(),
        filter,
        weight,
    )
}

/// Calculate every record of a partition selection in `formulary`
pub fn calculate_all_with<'a>(
    settings: &CalculationSettings,
    formulary: &'a Formulary,
    filter: PartitionFilter,
    weight: f64,
) -> Vec<CalculatedDose<'a>> {
    calculate_batch(settings, formulary.by_type(filter), weight)
}

/// Calculate a sequence of records, one independent result per record
///
/// Output order matches input order; records needing a secondary dose are
/// skipped since a batch has no way to supply one.
pub fn calculate_batch<'a, I>(
    settings: &CalculationSettings,
    records: I,
    weight: f64,
) -> Vec<CalculatedDose<'a>>
where
    I: IntoIterator<Item = &'a MedicationRecord>,
{
    let doses: Vec<CalculatedDose<'a>> = records
        .into_iter()
        .filter(|r| !r.requires_dose_input)
        .map(|record| {
            let result = calculate_volume_with(settings, record, weight, None);
            if let Err(ref e) = result {
                tracing::warn!("Calculation failed for {}: {}", record.name, e);
            }
            CalculatedDose { record, result }
        })
        .collect();

    let failed = doses.iter().filter(|d| !d.is_ok()).count();
    tracing::info!(
        "Calculated {} medications for {} kg ({} failed)",
        doses.len(),
        weight,
        failed
    );

    doses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulary::build_default_formulary;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn record(name: &str) -> MedicationRecord {
        get_default_formulary()
            .find(name, None)
            .unwrap_or_else(|| panic!("{} missing from formulary", name))
            .clone()
    }

    #[test]
    fn test_epinephrine_ten_kg() {
        let epi = record("Epinephrine 1:10,000");
        let calc = calculate_volume(&epi, 10.0, None).unwrap();

        assert!(approx(calc.volume_ml, 1.0));
        assert!(approx(calc.dose_amount.unwrap(), 0.1));
        assert_eq!(calc.dose_unit, Some(DoseUnit::Mg));
        assert_eq!(calc.display_volume, "1.00");
        assert_eq!(calc.equation_used, "0.1 * 10");
    }

    #[test]
    fn test_epinephrine_max_weight_is_clamped() {
        let epi = record("Epinephrine 1:10,000");
        let calc = calculate_volume(&epi, 200.0, None).unwrap();
        assert!(approx(calc.volume_ml, 10.0));
        assert_eq!(calc.display_volume, "10.00");
    }

    #[test]
    fn test_invalid_weights() {
        crate::logging::init_test();
        let epi = record("Epinephrine 1:10,000");

        for weight in [0.0, -1.0, 201.0, f64::NAN, f64::INFINITY] {
            let err = calculate_volume(&epi, weight, None).unwrap_err();
            assert!(
                matches!(err, CalcError::InvalidWeight { .. }),
                "weight {} gave {:?}",
                weight,
                err
            );
        }
    }

    #[test]
    fn test_hydrocortisone_requires_dose() {
        let hc = record("Hydrocortisone Na succinate");
        let err = calculate_volume(&hc, 10.0, None).unwrap_err();
        assert_eq!(
            err,
            CalcError::MissingDoseInput {
                name: "Hydrocortisone Na succinate".into()
            }
        );
        assert_eq!(
            err.to_string(),
            "dose input required for Hydrocortisone Na succinate"
        );
    }

    #[test]
    fn test_hydrocortisone_with_dose() {
        let hc = record("Hydrocortisone Na succinate");
        let calc = calculate_volume(&hc, 10.0, Some(100.0)).unwrap();
        assert!(approx(calc.volume_ml, 2.0));
        assert!(approx(calc.dose_amount.unwrap(), 100.0));
        assert_eq!(calc.equation_used, "100 / 50");

        // Above the max volume is clamped
        let calc = calculate_volume(&hc, 10.0, Some(250.0)).unwrap();
        assert!(approx(calc.volume_ml, 2.0));
    }

    #[test]
    fn test_invalid_dose_input() {
        let hc = record("Hydrocortisone Na succinate");
        for dose in [0.0, -5.0, f64::NAN] {
            assert!(matches!(
                calculate_volume(&hc, 10.0, Some(dose)),
                Err(CalcError::InvalidDose { .. })
            ));
        }
    }

    #[test]
    fn test_weight_checked_before_dose() {
        let hc = record("Hydrocortisone Na succinate");
        assert!(matches!(
            calculate_volume(&hc, 0.0, None),
            Err(CalcError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_min_clamp_applies() {
        // 0.2 * 3 = 0.6 mL, raised to the 1 mL minimum
        let atropine = record("Atropine 1 mg/10 ml");
        let calc = calculate_volume(&atropine, 3.0, None).unwrap();
        assert!(approx(calc.volume_ml, 1.0));
        assert!(approx(calc.dose_amount.unwrap(), 0.1));
    }

    #[test]
    fn test_no_dose_amount_without_numeric_concentration() {
        let saline = record("Sodium Chloride");
        let calc = calculate_volume(&saline, 10.0, None).unwrap();
        assert!(approx(calc.volume_ml, 200.0));
        assert_eq!(calc.dose_amount, None);
        assert_eq!(calc.dose_unit, None);
    }

    #[test]
    fn test_bicarbonate_dose_in_meq() {
        let bicarb = record("Sodium Bicarbonate");
        let calc = calculate_volume(&bicarb, 12.0, None).unwrap();
        assert!(approx(calc.dose_amount.unwrap(), 12.0));
        assert_eq!(calc.dose_unit, Some(DoseUnit::MEq));
    }

    #[test]
    fn test_volume_within_bounds_for_all_weights() {
        let formulary = get_default_formulary();
        for record in formulary.by_type(PartitionFilter::All) {
            if record.requires_dose_input {
                continue;
            }
            let mut weight = 0.5;
            while weight <= 200.0 {
                let first = calculate_volume(record, weight, None).unwrap();
                let again = calculate_volume(record, weight, None).unwrap();
                assert_eq!(first, again, "{} not deterministic", record.name);

                let lo = record.min_volume_ml.unwrap_or(f64::NEG_INFINITY);
                let hi = record.max_volume_ml.unwrap_or(f64::INFINITY);
                assert!(
                    first.volume_ml >= lo && first.volume_ml <= hi,
                    "{} at {} kg gave {} mL outside [{}, {}]",
                    record.name,
                    weight,
                    first.volume_ml,
                    lo,
                    hi
                );
                weight += 7.25;
            }
        }
    }

    #[test]
    fn test_clamp_idempotent() {
        let bounds = [
            (Some(0.0), Some(10.0)),
            (Some(1.0), Some(5.0)),
            (Some(0.0), None),
            (None, Some(2.0)),
            (None, None),
        ];
        for (min, max) in bounds {
            for v in [-3.0, 0.0, 0.5, 1.0, 4.99, 5.0, 20.0] {
                let once = clamp_volume(v, min, max);
                assert_eq!(clamp_volume(once, min, max), once);
            }
        }
    }

    #[test]
    fn test_min_then_max_order_when_inverted() {
        // Upper bound applied last wins
        assert_eq!(clamp_volume(0.0, Some(5.0), Some(1.0)), 1.0);
        assert_eq!(clamp_volume(10.0, Some(5.0), Some(1.0)), 1.0);
        assert_eq!(clamp_volume(3.0, Some(5.0), Some(1.0)), 1.0);
    }

    #[test]
    fn test_known_table_has_no_inverted_bounds() {
        for r in get_default_formulary().records() {
            if let (Some(min), Some(max)) = (r.min_volume_ml, r.max_volume_ml) {
                assert!(min <= max, "{} has min {} > max {}", r.name, min, max);
            }
        }
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(format_fixed(1.0, 2), "1.00");
        assert_eq!(format_fixed(0.125, 2), "0.13");
        assert_eq!(format_fixed(0.333333, 3), "0.333");
        assert_eq!(format_fixed(2.5, 0), "3");
        assert_eq!(format_fixed(-0.001, 2), "0.00");
    }

    #[test]
    fn test_precision_setting() {
        let settings = CalculationSettings {
            precision: 3,
            ..Default::default()
        };
        let atropine = record("Atropine 0.6 mg/ml");
        let calc = calculate_volume_with(&settings, &atropine, 10.0, None).unwrap();
        assert_eq!(calc.display_volume, "0.330");
    }

    #[test]
    fn test_precision_is_capped() {
        let settings = CalculationSettings {
            precision: 400,
            ..Default::default()
        };
        let epi = record("Epinephrine 1:10,000");
        let calc = calculate_volume_with(&settings, &epi, 10.0, None).unwrap();
        assert_eq!(calc.display_volume, "1.000000");
        assert_eq!(calc.equation_used, "0.1 * 10");

        // rounds the stored binary value, which sits just below 1.005
        assert_eq!(format_fixed(1.005, 2), "1.00");
    }

    #[test]
    fn test_configured_max_weight() {
        let settings = CalculationSettings {
            max_weight_kg: 150.0,
            ..Default::default()
        };
        let epi = record("Epinephrine 1:10,000");
        assert!(calculate_volume_with(&settings, &epi, 150.0, None).is_ok());
        assert_eq!(
            calculate_volume_with(&settings, &epi, 150.5, None),
            Err(CalcError::InvalidWeight {
                weight: 150.5,
                max: 150.0
            })
        );
    }

    #[test]
    fn test_calculate_all_lengths() {
        assert_eq!(calculate_all(PartitionFilter::Emergency, 10.0).len(), 21);
        assert_eq!(calculate_all(PartitionFilter::Prrt, 10.0).len(), 12);
        assert_eq!(calculate_all(PartitionFilter::All, 10.0).len(), 33);
    }

    #[test]
    fn test_calculate_all_preserves_order_and_skips_dose_input() {
        let doses = calculate_all(PartitionFilter::Prrt, 10.0);
        let names: Vec<&str> = doses.iter().map(|d| d.record.name.as_str()).collect();
        assert_eq!(names[0], "Epinephrine (IM)");
        assert_eq!(names[1], "Dexamethasone");
        assert!(!names.contains(&"Ipratropium"));
        assert!(doses.iter().all(|d| d.is_ok()));
    }

    #[test]
    fn test_calculate_all_invalid_weight_yields_error_per_record() {
        let doses = calculate_all(PartitionFilter::Emergency, 0.0);
        assert_eq!(doses.len(), 21);
        assert!(doses
            .iter()
            .all(|d| matches!(d.result, Err(CalcError::InvalidWeight { .. }))));
    }

    #[test]
    fn test_malformed_record_does_not_truncate_batch() {
        let formulary = build_default_formulary();
        let mut records: Vec<MedicationRecord> = formulary
            .by_type(PartitionFilter::Emergency)
            .into_iter()
            .cloned()
            .collect();
        let mut broken = records[5].clone();
        broken.name = "Broken".into();
        broken.equation = "0.1 * W +".into();
        let mut zero = records[6].clone();
        zero.name = "Divides by zero".into();
        zero.equation = "W / 0".into();
        records.insert(10, broken);
        records.insert(11, zero);

        let doses = calculate_batch(&CalculationSettings::default(), &records, 10.0);
        assert_eq!(doses.len(), 23);
        assert!(matches!(
            doses[10].result,
            Err(CalcError::Evaluation(crate::equation::EvalError::UnexpectedEnd))
        ));
        assert!(doses[10]
            .result
            .as_ref()
            .unwrap_err()
            .to_string()
            .starts_with("calculation error: "));
        assert!(matches!(
            doses[11].result,
            Err(CalcError::Evaluation(crate::equation::EvalError::DivisionByZero))
        ));
        assert_eq!(doses.iter().filter(|d| d.is_ok()).count(), 21);
        assert_eq!(doses[22].record.name, "Sodium Chloride");
    }
}
