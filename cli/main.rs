#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use modechoice::choice::config::AnalysisConfig;
use modechoice::choice::data::Database;
use modechoice::choice::estimate::estimate;
use modechoice::choice::report::{
    ForecastReport, LatexTable, ParameterTable, ShareLines, StatisticsTable,
};
use modechoice::choice::results::EstimationResults;
use modechoice::choice::scenario::{Sensitivity, forecast};
use modechoice::choice::simulate::{self, SimulationTable};
use modechoice::choice::specification::{ModelKind, ModelSpecification};
use modechoice::choice::weights::apply_weights;

#[derive(Parser)]
#[command(
    name = "modechoice",
    about = "Estimation and forecasting of travel mode choice models",
    long_about = "Estimates multinomial and nested logit models of travel mode choice \
                 on the London Passenger Mode Choice survey and forecasts market shares, \
                 values of time, elasticities and policy scenarios."
)]
struct Cli {
    /// TOML configuration file (census counts, optimizer settings, scenarios)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of worker threads (defaults to the number of logical cores)
    #[arg(long, global = true, value_name = "N")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ModelArgs {
    /// Survey file (tab separated)
    #[arg(value_name = "DATA_PATH")]
    data: PathBuf,

    /// Model specification
    #[arg(long, value_enum, default_value_t = ModelKind::Model0)]
    model: ModelKind,

    /// Directory holding the `{model}.results.toml` files
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute post-stratification weights of the survey sample
    #[command(about = "Print the stratum weights of the sample")]
    Weights {
        #[arg(value_name = "DATA_PATH")]
        data: PathBuf,
    },

    /// Estimate a model by maximum likelihood
    #[command(about = "Estimate a model (outputs: {model}.results.toml)")]
    Estimate {
        #[command(flatten)]
        model: ModelArgs,

        /// Weight each observation by its stratum weight
        #[arg(long)]
        weighted: bool,

        /// Number of bootstrap replicas for the standard errors
        #[arg(long, value_name = "N")]
        bootstrap: Option<usize>,

        /// Also print the estimates as a LaTeX table
        #[arg(long)]
        latex: bool,
    },

    /// Forecast with previously estimated results
    #[command(about = "Market shares, values of time, elasticities and scenarios")]
    Forecast {
        #[command(flatten)]
        model: ModelArgs,

        /// Write the per-observation simulated values to this CSV file
        #[arg(long, value_name = "PATH")]
        simulated_csv: Option<PathBuf>,

        /// Skip the confidence intervals of the market shares
        #[arg(long)]
        no_intervals: bool,
    },

    /// Simulated market shares with confidence intervals, and the observed shares
    #[command(about = "Market shares with confidence intervals")]
    MarketShares {
        #[command(flatten)]
        model: ModelArgs,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli {
        config,
        threads,
        command,
    } = cli;

    let result = match command {
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
        Some(command) => load_config(config.as_deref(), threads).and_then(|config| {
            match command {
                Commands::Weights { data } => run_weights(&data, &config),
                Commands::Estimate {
                    model,
                    weighted,
                    bootstrap,
                    latex,
                } => run_estimate(&model, &config, weighted, bootstrap, latex),
                Commands::Forecast {
                    model,
                    simulated_csv,
                    no_intervals,
                } => run_forecast(&model, &config, simulated_csv.as_deref(), !no_intervals),
                Commands::MarketShares { model } => run_market_shares(&model, &config),
            }
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Reads the configuration, applies the thread override and sizes the rayon pool.
fn load_config(
    path: Option<&Path>,
    threads: Option<usize>,
) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
    let mut config = AnalysisConfig::load_or_default(path)?;
    if threads.is_some() {
        config.threads = threads;
    }
    config.validate()?;
    let n_threads = config.thread_count();
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()?;
    log::debug!("Using {} worker threads.", n_threads);
    Ok(config)
}

/// Loads the survey, applies the post-stratification weights and derives the
/// columns of the model.
fn load_survey(
    path: &Path,
    config: &AnalysisConfig,
    model: &ModelSpecification,
) -> Result<Database, Box<dyn std::error::Error>> {
    println!("Loading survey data from: {}", path.display());
    let mut database = Database::load(path)?;
    println!(
        "Loaded {} observations with {} columns",
        database.n_rows(),
        database.column_names().len()
    );
    apply_weights(&mut database, &config.census)?;
    model.prepare(&mut database)?;
    Ok(database)
}

fn run_weights(data: &Path, config: &AnalysisConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut database = Database::load(data)?;
    let weights = apply_weights(&mut database, &config.census)?;
    println!("{weights}");
    let total: f64 = database.column(modechoice::choice::data::schema::WEIGHT)?.sum();
    println!("Sum of weights (should be equal to sample size): {total:.3}");
    Ok(())
}

fn run_estimate(
    args: &ModelArgs,
    config: &AnalysisConfig,
    weighted: bool,
    bootstrap: Option<usize>,
    latex: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = ModelSpecification::build(args.model)?;
    let database = load_survey(&args.data, config, &model)?;

    let mut estimation = config.estimation.clone();
    estimation.weighted |= weighted;
    if let Some(draws) = bootstrap {
        estimation.bootstrap_draws = draws;
    }

    println!("Estimating {}:\n{}", model.kind, model.describe());
    let results = estimate(&model, &database, &estimation)?;

    println!("\n{}", ParameterTable(&results));
    println!("{}", StatisticsTable(&results.statistics));
    if latex {
        println!("{}", LatexTable(&results));
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let path = EstimationResults::default_path(&args.output_dir, model.kind);
    results.save(&path)?;
    println!("Results saved to: {}", path.display());
    Ok(())
}

/// Builds the model and reads its saved results from the output directory.
fn load_estimates(
    args: &ModelArgs,
) -> Result<(ModelSpecification, EstimationResults, Vec<f64>), Box<dyn std::error::Error>> {
    let model = ModelSpecification::build(args.model)?;
    let path = EstimationResults::default_path(&args.output_dir, model.kind);
    println!("Loading estimation results from: {}", path.display());
    let results = EstimationResults::load(&path)?;
    results.ensure_model(model.kind)?;
    let betas = results.beta_vector(&model.parameters)?;
    Ok((model, results, betas))
}

fn run_forecast(
    args: &ModelArgs,
    config: &AnalysisConfig,
    simulated_csv: Option<&Path>,
    intervals: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (model, results, betas) = load_estimates(args)?;
    let database = load_survey(&args.data, config, &model)?;

    let draws = if intervals {
        results.sensitivity_draws(
            &model.parameters,
            config.sensitivity_draws,
            config.estimation.seed,
        )?
    } else {
        Vec::new()
    };
    let sensitivity = intervals.then(|| Sensitivity {
        draws: &draws,
        level: config.confidence_level,
    });

    let outcome = forecast(&model, &database, &betas, &config.scenarios, sensitivity)?;
    println!("\n{}", ForecastReport(&outcome));

    if let Some(path) = simulated_csv {
        SimulationTable::simulate(&model, &database, &betas)?.write_csv(path)?;
        println!("Simulated values written to: {}", path.display());
    }
    Ok(())
}

fn run_market_shares(
    args: &ModelArgs,
    config: &AnalysisConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let (model, results, betas) = load_estimates(args)?;
    let database = load_survey(&args.data, config, &model)?;

    let shares = simulate::market_shares(&model, &database, &betas)?;
    let draws = results.sensitivity_draws(
        &model.parameters,
        config.sensitivity_draws,
        config.estimation.seed,
    )?;
    let intervals = simulate::market_share_intervals(
        &model,
        &database,
        &betas,
        &draws,
        config.confidence_level,
    )?;
    println!(
        "\n{}",
        ShareLines {
            shares: &shares,
            intervals: Some((&intervals, config.confidence_level)),
        }
    );

    let actual = simulate::actual_market_shares(&database)?;
    println!("Actual market shares from data:");
    println!(
        "{}",
        ShareLines {
            shares: &actual,
            intervals: None,
        }
    );
    Ok(())
}
