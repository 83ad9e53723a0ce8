use clap::{Parser, Subcommand, ValueEnum};
use dose_core::engine::validate_weight;
use dose_core::export::{
    build_field_payload, estimate_age, format_total_dose, report_file_name, write_csv_report,
    write_field_payload,
};
use dose_core::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pedidose")]
#[command(about = "Pediatric weight-based medication dose calculator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Decimal places for volumes and doses
    #[arg(long, global = true)]
    precision: Option<usize>,

    /// Maximum accepted patient weight in kg
    #[arg(long, global = true)]
    max_weight: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate doses for every medication in a partition
    Calc {
        /// Patient weight in kg
        #[arg(long)]
        weight: f64,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Calculate a single medication, including ones that need a dose input
    Dose {
        /// Medication name (case-insensitive)
        #[arg(long)]
        name: String,

        /// Patient weight in kg
        #[arg(long)]
        weight: f64,

        /// Secondary dose substituted for D in the equation
        #[arg(long)]
        dose: Option<f64>,

        /// Partition to look in (emergency, prrt, all)
        #[arg(long = "type", default_value = "all")]
        partition: PartitionFilter,
    },

    /// List medications without calculating
    List {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show medication table statistics
    Stats,

    /// Export calculated doses to a file
    Export {
        /// Patient weight in kg
        #[arg(long)]
        weight: f64,

        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// Output file (defaults to a timestamped file in the export directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Partition to export (emergency, prrt, all)
        #[arg(long = "type", default_value = "all")]
        partition: PartitionFilter,
    },

    /// Check the medication table for authoring errors
    Validate,
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Partition (emergency, prrt, all)
    #[arg(long = "type", default_value = "all")]
    partition: PartitionFilter,

    /// Free-text search over name, category, route and notes
    #[arg(long)]
    search: Option<String>,

    /// Exact category, e.g. Cardiac
    #[arg(long)]
    category: Option<String>,

    /// Route substring, e.g. IM
    #[arg(long)]
    route: Option<String>,
}

impl From<FilterArgs> for RecordQuery {
    fn from(args: FilterArgs) -> Self {
        RecordQuery {
            partition: args.partition,
            search: args.search,
            category: args.category,
            route: args.route,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    /// One row per medication
    Csv,
    /// JSON map of dose chart form fields
    Fields,
}

fn main() -> ExitCode {
    // Initialize logging
    dose_core::logging::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(precision) = cli.precision {
        config.calculation.precision = precision;
    }
    if let Some(max_weight) = cli.max_weight {
        config.calculation.max_weight_kg = max_weight;
    }
    config.validate()?;

    let settings = config.calculation_settings();
    let formulary = get_default_formulary();

    match cli.command {
        Commands::Calc { weight, filters } => cmd_calc(formulary, &settings, weight, filters.into()),
        Commands::Dose {
            name,
            weight,
            dose,
            partition,
        } => cmd_dose(formulary, &settings, &name, weight, dose, partition),
        Commands::List { filters } => cmd_list(formulary, filters.into()),
        Commands::Stats => cmd_stats(formulary),
        Commands::Export {
            weight,
            format,
            output,
            partition,
        } => cmd_export(formulary, &settings, &config, weight, format, output, partition),
        Commands::Validate => cmd_validate(formulary),
    }
}

fn cmd_calc(
    formulary: &Formulary,
    settings: &CalculationSettings,
    weight: f64,
    query: RecordQuery,
) -> Result<()> {
    validate_weight(weight, settings.max_weight_kg)?;

    let doses = calculate_batch(settings, formulary.select(&query), weight);
    let emergency = doses
        .iter()
        .filter(|d| d.record.partition == Partition::Emergency)
        .count();

    println!(
        "Patient: {} kg (est. age {})",
        weight,
        estimate_age(weight)
    );
    println!(
        "{} medications | {} emergency | {} PRRT",
        doses.len(),
        emergency,
        doses.len() - emergency
    );
    println!();

    if doses.is_empty() {
        println!("No medications match the given filters.");
        return Ok(());
    }

    display_dose_table(&doses, settings.precision);
    Ok(())
}

fn cmd_dose(
    formulary: &Formulary,
    settings: &CalculationSettings,
    name: &str,
    weight: f64,
    dose: Option<f64>,
    partition: PartitionFilter,
) -> Result<()> {
    let partition = match partition {
        PartitionFilter::Emergency => Some(Partition::Emergency),
        PartitionFilter::Prrt => Some(Partition::Prrt),
        PartitionFilter::All => None,
    };
    let record = formulary
        .find(name, partition)
        .ok_or_else(|| Error::Other(format!("Unknown medication: {}", name)))?;

    let result = calculate_volume_with(settings, record, weight, dose);
    let total = format_total_dose(&result, settings.precision);
    let calc = result?;

    println!(
        "{} ({}, {})",
        record.name,
        record.partition.label(),
        record.route
    );
    println!("  Volume:        {} mL", calc.display_volume);
    println!("  Total dose:    {}", total);
    println!("  Concentration: {}", record.concentration.label);
    println!("  Equation:      {}", calc.equation_used);
    if !record.notes.is_empty() {
        println!("  Notes:         {}", record.notes);
    }

    Ok(())
}

fn cmd_list(formulary: &Formulary, query: RecordQuery) -> Result<()> {
    let records = formulary.select(&query);
    if records.is_empty() {
        println!("No medications match the given filters.");
        return Ok(());
    }

    println!(
        "{:<10} {:<28} {:<24} {:<10} {:<15} {}",
        "TYPE", "MEDICATION", "CONCENTRATION", "ROUTE", "CATEGORY", "EQUATION"
    );
    for record in &records {
        let equation = if record.requires_dose_input {
            format!("{} (dose input)", record.equation)
        } else {
            record.equation.clone()
        };
        println!(
            "{:<10} {:<28} {:<24} {:<10} {:<15} {}",
            record.partition.label(),
            record.name,
            record.concentration.label,
            record.route,
            record.category,
            equation
        );
    }
    println!();
    println!("{} medications", records.len());

    Ok(())
}

fn cmd_stats(formulary: &Formulary) -> Result<()> {
    let stats = formulary.stats();
    let dose_input = formulary.requiring_dose_input();

    println!("Total medications: {}", stats.total);
    println!("  Emergency:       {}", stats.emergency_count);
    println!("  PRRT:            {}", stats.prrt_count);
    println!("  Need dose input: {}", dose_input.len());
    println!(
        "Categories ({}): {}",
        stats.distinct_categories.len(),
        stats
            .distinct_categories
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Routes ({}): {}",
        stats.distinct_routes.len(),
        stats
            .distinct_routes
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

fn cmd_export(
    formulary: &Formulary,
    settings: &CalculationSettings,
    config: &Config,
    weight: f64,
    format: ExportFormat,
    output: Option<PathBuf>,
    partition: PartitionFilter,
) -> Result<()> {
    validate_weight(weight, settings.max_weight_kg)?;

    let now = chrono::Local::now();
    let extension = match format {
        ExportFormat::Csv => "csv",
        ExportFormat::Fields => "json",
    };
    let path = output.unwrap_or_else(|| {
        config
            .export
            .output_dir
            .join(report_file_name(&now, extension))
    });

    let doses = calculate_all_with(settings, formulary, partition, weight);

    match format {
        ExportFormat::Csv => {
            let count = write_csv_report(&path, weight, &doses, settings.precision)?;
            println!("✓ Exported {} medications", count);
        }
        ExportFormat::Fields => {
            let payload = build_field_payload(weight, now.date_naive(), &doses, settings.precision);
            write_field_payload(&path, &payload)?;
            println!("✓ Exported {} form fields", payload.len());
        }
    }
    println!("  File: {}", path.display());

    Ok(())
}

fn cmd_validate(formulary: &Formulary) -> Result<()> {
    let errors = formulary.validate();
    if !errors.is_empty() {
        eprintln!("Formulary validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::FormularyValidation(format!(
            "{} problem(s) found",
            errors.len()
        )));
    }

    println!("✓ Formulary OK ({} medications)", formulary.stats().total);
    Ok(())
}

fn display_dose_table(doses: &[CalculatedDose<'_>], precision: usize) {
    println!(
        "{:<10} {:<28} {:>12} {:>14} {:<24} {:<10} {}",
        "TYPE", "MEDICATION", "VOLUME", "TOTAL DOSE", "CONCENTRATION", "ROUTE", "NOTES"
    );

    for dose in doses {
        let record = dose.record;
        let (volume, total) = match &dose.result {
            Ok(calc) => (
                format!("{} mL", calc.display_volume),
                format_total_dose(&dose.result, precision),
            ),
            Err(e) => (e.to_string(), "-".to_string()),
        };
        println!(
            "{:<10} {:<28} {:>12} {:>14} {:<24} {:<10} {}",
            record.partition.label(),
            record.name,
            volume,
            total,
            record.concentration.label,
            record.route,
            record.notes
        );
    }
}
