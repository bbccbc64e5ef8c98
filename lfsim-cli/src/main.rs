use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lfsim::{
    DrawSource, Model, ModelParams, Population, RunSettings, ScenarioList, VectorPop, Worm,
    load_population_sizes,
};

/// Stochastic lymphatic filariasis transmission and elimination simulator.
#[derive(Debug, Parser)]
#[command(name = "lfsim", version, about)]
struct Args {
    /// Run index, appended to every output file name.
    index: i32,

    /// Scenario list (JSON).
    #[arg(short, long)]
    scenarios: PathBuf,

    /// Candidate population sizes, one per line.
    #[arg(short = 'n', long = "population-sizes")]
    population_sizes: PathBuf,

    /// Calibration parameter file, one replicate per line.
    #[arg(short, long)]
    parameters: PathBuf,

    /// Model parameter overrides (JSON).
    #[arg(long)]
    model_params: Option<PathBuf>,

    /// Replicates to run.
    #[arg(short, long, default_value_t = 1000)]
    replicates: usize,

    /// Time step in months.
    #[arg(short, long, default_value_t = 1.0)]
    timestep: f64,

    /// Output directory.
    #[arg(short, long, default_value = "./")]
    output: PathBuf,

    /// Seed file, one seed per line. Without it seeds come from the clock.
    #[arg(short = 'g', long = "seeds")]
    seed_file: Option<PathBuf>,

    /// Coverage-proportion file, one multiplier per line.
    #[arg(short = 'c', long = "coverage-proportions")]
    coverage_file: Option<PathBuf>,

    /// Write yearly age-stratified and survey records.
    #[arg(short = 'e', long)]
    endgame: bool,

    /// Calendar year from which endgame records start.
    #[arg(short = 'D', long, default_value_t = 2000)]
    endgame_date: i32,

    /// Write yearly roadmap-target records.
    #[arg(short = 'm', long)]
    ntdmc: bool,

    /// Calendar year from which roadmap-target records start.
    #[arg(short = 'N', long, default_value_t = 2000)]
    ntdmc_date: i32,

    /// Take importation-rate reductions from the scenario schedule instead
    /// of observed prevalence decline, until the configured switch time.
    #[arg(short = 'x', long)]
    reduce_imp_via_xml: bool,
}

fn run(args: Args) -> lfsim::Result<()> {
    let started = Instant::now();

    let params = match &args.model_params {
        Some(path) => ModelParams::from_json_file(path)?,
        None => ModelParams::default(),
    };
    let scenarios = ScenarioList::from_json_file(&args.scenarios)?;
    let sizes = load_population_sizes(&args.population_sizes)?;
    let draws = DrawSource::load(
        &args.parameters,
        args.seed_file.as_deref(),
        args.coverage_file.as_deref(),
        args.replicates,
    )?;

    let mut popln = Population::new(params, sizes);
    let mut vectors = VectorPop::new();
    let mut worms = Worm::default();

    let settings = RunSettings {
        replicates: args.replicates,
        index: args.index,
        output_endgame: args.endgame,
        output_endgame_date: args.endgame_date,
        output_ntdmc: args.ntdmc,
        output_ntdmc_date: args.ntdmc_date,
        reduce_imp_via_xml: args.reduce_imp_via_xml,
        out_dir: args.output.clone(),
    };

    let mut model = Model::new(args.timestep);
    model.run_scenarios(
        &scenarios,
        &mut popln,
        &mut vectors,
        &mut worms,
        &draws,
        &settings,
    )?;

    info!(elapsed_secs = started.elapsed().as_secs_f64(), "run complete");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}
