// ========================================================================================
//
//                         The Command-Line Front End: agriyield
//
// ========================================================================================
//
// Parses arguments, selects the estimator from configuration and flags, and drives the
// prediction service. All domain behavior lives in the library; this file only turns
// user input into service calls and service results into terminal or file output.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use agriyield::config::AppConfig;
use agriyield::estimator::Estimator;
use agriyield::export::{ExportFormat, export_to_path};
use agriyield::observation::{ObservationInput, read_inputs_csv};
use agriyield::summary::summarize;
use agriyield::vector::schema;
use agriyield::{InMemoryStore, ModelEstimator, PredictionService};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

// ========================================================================================
//                         Command-line interface definition
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "agriyield",
    version,
    about = "Crop production, yield and price estimation from field observations"
)]
struct Cli {
    /// TOML configuration file selecting the estimator
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Model artifact to serve predictions with (overrides the configuration)
    #[arg(long, global = true, value_name = "ARTIFACT")]
    artifact: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate a single observation given on the command line
    #[command(about = "Estimate one observation")]
    Predict(ObservationArgs),

    /// Estimate every row of a CSV file and export the results
    #[command(about = "Estimate a CSV of observations (outputs: predictions.csv or .json)")]
    Batch {
        /// CSV file with one observation per row, using the raw field names as headers
        #[arg(value_name = "INPUT_CSV")]
        input: PathBuf,

        /// Where to write the export
        #[arg(long, short)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = ExportFormatCli::Csv)]
        format: ExportFormatCli,
    },

    /// Show the features a model artifact declares and whether they match the schema
    #[command(about = "Inspect a model artifact")]
    Inspect {
        #[arg(value_name = "ARTIFACT_TOML")]
        artifact: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum ExportFormatCli {
    Csv,
    Json,
}

impl From<ExportFormatCli> for ExportFormat {
    fn from(format: ExportFormatCli) -> Self {
        match format {
            ExportFormatCli::Csv => ExportFormat::Csv,
            ExportFormatCli::Json => ExportFormat::Json,
        }
    }
}

#[derive(Args)]
struct ObservationArgs {
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    crop: Option<String>,
    #[arg(long)]
    year: Option<i32>,
    /// Harvested area in hectares
    #[arg(long, allow_negative_numbers = true)]
    area: Option<f64>,
    /// Production in tonnes
    #[arg(long, allow_negative_numbers = true)]
    production: Option<f64>,
    /// Rainfall in millimetres
    #[arg(long, allow_negative_numbers = true)]
    rainfall: Option<f64>,
    /// Mean temperature in degrees Celsius
    #[arg(long, allow_negative_numbers = true)]
    temperature: Option<f64>,
    /// Market price in USD per tonne
    #[arg(long, allow_negative_numbers = true)]
    price: Option<f64>,
    /// Policy category, e.g. "Subsidy"
    #[arg(long)]
    policy_flag: Option<String>,
    /// Transport cost in USD
    #[arg(long, allow_negative_numbers = true)]
    transport_cost: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    demand_supply_gap: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    productivity_index: Option<f64>,
}

impl From<ObservationArgs> for ObservationInput {
    fn from(args: ObservationArgs) -> Self {
        Self {
            country: args.country,
            crop: args.crop,
            year: args.year,
            area_harvested: args.area,
            production: args.production,
            rainfall: args.rainfall,
            temperature: args.temperature,
            price_per_tonne: args.price,
            policy_flag: args.policy_flag,
            transport_cost: args.transport_cost,
            demand_supply_gap: args.demand_supply_gap,
            productivity_index: args.productivity_index,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        config,
        artifact,
        command,
    } = Cli::parse();

    let result = match command {
        Commands::Predict(args) => build_service(config, artifact)
            .and_then(|service| run_predict(&service, args.into())),
        Commands::Batch {
            input,
            output,
            format,
        } => build_service(config, artifact)
            .and_then(|service| run_batch(&service, input, output, format.into())),
        Commands::Inspect { artifact } => run_inspect(artifact),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn build_service(
    config: Option<PathBuf>,
    artifact: Option<PathBuf>,
) -> Result<PredictionService, Box<dyn Error>> {
    let mut app_config = match config {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    if let Some(path) = artifact {
        app_config = app_config.with_artifact(path);
    }
    let estimator = app_config.build_estimator()?;
    Ok(PredictionService::new(estimator, Arc::new(InMemoryStore::new()))?)
}

fn run_predict(service: &PredictionService, input: ObservationInput) -> Result<(), Box<dyn Error>> {
    let prediction = service.estimate(&input)?;
    let estimate = prediction.estimate;
    println!("{}", prediction.observation);
    println!("  Predicted production: {:.2} tonnes", estimate.predicted_production);
    println!("  Predicted yield:      {:.2} tonnes/ha", estimate.predicted_yield);
    println!("  Predicted price:      {:.2} USD/tonne", estimate.predicted_price);
    Ok(())
}

fn run_batch(
    service: &PredictionService,
    input: PathBuf,
    output: PathBuf,
    format: ExportFormat,
) -> Result<(), Box<dyn Error>> {
    let file = File::open(&input)
        .map_err(|e| format!("Could not open input file '{}': {e}", input.display()))?;
    let inputs = read_inputs_csv(BufReader::new(file))?;
    log::info!("Read {} observations from '{}'", inputs.len(), input.display());

    let pb = create_progress_bar(inputs.len() as u64, "Estimating observations...");
    let outcomes = service.estimate_batch_with(&inputs, |_| pb.inc(1));
    pb.finish_with_message("Estimation complete.");

    let mut rejected = 0usize;
    for (row, outcome) in outcomes.iter().enumerate() {
        if let Err(err) = outcome {
            rejected += 1;
            // Header is line 1, so data row `row` is on line `row + 2`.
            eprintln!("Row {} (line {}): {err}", row + 1, row + 2);
        }
    }

    let records = service.records();
    export_to_path(&output, &records, format)?;

    let summary = summarize(&records, DateTime::<Utc>::MIN_UTC);
    println!(
        "Estimated {} of {} observations ({} rejected); export written to {}",
        service.total(),
        inputs.len(),
        rejected,
        output.display()
    );
    if summary.count > 0 {
        println!(
            "  Mean production {:.2} t, mean yield {:.2} t/ha, mean price {:.2} USD/t",
            summary.avg_production, summary.avg_yield, summary.avg_price
        );
        let crops: Vec<String> = service
            .top_crops(3)
            .into_iter()
            .map(|(crop, count)| format!("{crop} ({count})"))
            .collect();
        println!("  Most frequent crops: {}", crops.join(", "));
    }
    Ok(())
}

fn run_inspect(path: PathBuf) -> Result<(), Box<dyn Error>> {
    let estimator = ModelEstimator::load(&path)?;
    let artifact = estimator.artifact();

    println!("Artifact: {}", path.display());
    if let Some(description) = &artifact.description {
        println!("Description: {description}");
    }
    println!("Declared features ({}):", artifact.feature_names.len());
    for name in &artifact.feature_names {
        match artifact.categories.get(name) {
            Some(encoding) => println!("  {name} (categorical, {} levels)", encoding.levels.len()),
            None => println!("  {name}"),
        }
    }

    match estimator.verify_schema(&schema()) {
        Ok(()) => println!("Schema parity: OK"),
        Err(mismatch) => {
            println!("Schema parity: MISMATCH");
            if !mismatch.missing.is_empty() {
                println!("  Not produced by the vector builder: {}", mismatch.missing.join(", "));
            }
            if !mismatch.unexpected.is_empty() {
                println!("  Produced but not declared: {}", mismatch.unexpected.join(", "));
            }
        }
    }
    Ok(())
}

/// A progress bar on stderr, hidden when stderr is not a terminal.
fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    match ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  ")),
        Err(err) => log::debug!("Falling back to the default progress style: {err}"),
    }
    pb.set_message(message.to_string());

    pb
}
