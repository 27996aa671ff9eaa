#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use tmle::config::RunConfig;
use tmle::data::load_dataset;
use tmle::estimate::{TMLEResult, tmle_all};
use tmle::nuisance::NuisanceParameters;

#[derive(Args)]
pub struct EstimateArgs {
    /// Path to a tab-separated data file with a header row
    pub data: String,

    /// Run configuration (learners, threshold, parameters) in TOML
    #[arg(long, value_name = "RUN_TOML")]
    pub config: PathBuf,

    /// Treatment columns, in the order the parameters list them
    #[arg(long, value_delimiter = ',', required = true)]
    pub treatments: Vec<String>,

    /// Confounder columns
    #[arg(long, value_delimiter = ',')]
    pub confounders: Vec<String>,

    /// Outcome columns
    #[arg(long, value_delimiter = ',', required = true)]
    pub outcomes: Vec<String>,

    /// Where to write the results table
    #[arg(long, default_value = "tmle_results.tsv")]
    pub out: PathBuf,

    /// Log nuisance fitting decisions (-v) or IRLS traces (-vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
#[command(
    name = "tmle",
    about = "Targeted minimum loss-based estimation of causal effects",
    long_about = "Estimates counterfactual means, average treatment effects and interaction \
                 effects from observational data, with influence-curve based inference."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate every parameter listed in a run configuration
    #[command(about = "Estimate causal parameters (outputs: results.tsv)")]
    Estimate(EstimateArgs),

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Estimate(args)) => estimate(args),
        Some(Commands::Version) => {
            println!("tmle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn estimate(args: EstimateArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.verbose);

    let config = RunConfig::load(&args.config)?;
    if config.parameters.is_empty() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "The run configuration lists no [[parameters]].",
        )));
    }

    let dataset = load_dataset(&args.data, &args.treatments, &args.confounders, &args.outcomes)?;
    let spec = config.nuisance_spec();
    let settings = config.settings();
    let mut nuisances = NuisanceParameters::new();

    let results = tmle_all(&dataset, &config.parameters, &spec, &mut nuisances, &settings)?;
    write_results(&args.out, &results)?;
    println!(
        "Estimated {} parameter(s); results written to {}",
        results.len(),
        args.out.display()
    );
    Ok(())
}

fn write_results(path: &Path, results: &[TMLEResult]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "parameter",
        "estimate",
        "initial_estimate",
        "stderror",
        "ci_lower",
        "ci_upper",
        "pvalue",
        "mean_inf_curve",
        "n",
    ])?;
    for result in results {
        let (lower, upper) = result.confint();
        writer.write_record([
            result.parameter.to_string(),
            result.estimate().to_string(),
            result.initial_estimate.to_string(),
            result.stderror().to_string(),
            lower.to_string(),
            upper.to_string(),
            result.pvalue().to_string(),
            result.mean_inf_curve().to_string(),
            result.n().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
