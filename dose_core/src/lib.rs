#![forbid(unsafe_code)]

//! Core domain model and calculation engine for the pediatric dose calculator.
//!
//! This crate provides:
//! - Domain types (medication records, concentrations, calculation results)
//! - The built-in medication table and its queries
//! - A restricted arithmetic evaluator for dose equations
//! - The dose calculation engine
//! - Export helpers (CSV report, form-field payload)

pub mod types;
pub mod error;
pub mod equation;
pub mod formulary;
pub mod engine;
pub mod export;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{CalcError, Error, Result};
pub use types::*;
pub use equation::{evaluate, validate_equation, Bindings, EvalError};
pub use formulary::{build_default_formulary, get_default_formulary, Formulary, RecordQuery};
pub use engine::{
    calculate_all, calculate_all_with, calculate_batch, calculate_volume, calculate_volume_with,
    CalculationSettings,
};
pub use config::Config;
