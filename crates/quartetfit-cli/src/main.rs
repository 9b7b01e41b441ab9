//! CLI for quartetfit: does this network explain the gene trees?

mod commands;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use quartetfit_core::{Correction, DirichletStatistic, OptimizationPolicy, OutlierStatistic, TicrTest};

#[derive(Parser)]
#[command(name = "quartetfit")]
#[command(about = "quartetfit: goodness of fit of phylogenetic networks to quartet concordance factors")]
#[command(version = quartetfit_core::VERSION)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Multinomial outlier test of a network against observed quartet CFs,
    /// with an optional simulation correction for dependent four-taxon sets.
    Gof {
        /// Network in extended Newick, inline or as a file path
        #[arg(long)]
        network: String,

        /// Quartet CF table (JSON)
        #[arg(long)]
        data: PathBuf,

        /// Fit branch lengths and inheritance probabilities before testing
        #[arg(long)]
        optimize: bool,

        /// Per-quartet statistic: lrt (default), qlog, pearson
        #[arg(long, default_value = "lrt")]
        statistic: OutlierStatistic,

        /// Dependence correction: simulation (default) or none
        #[arg(long, default_value = "simulation")]
        correction: Correction,

        /// Master seed for the simulation replicates
        #[arg(long, default_value = "1234")]
        seed: u64,

        /// Number of simulation replicates
        #[arg(long, default_value = "1000")]
        nsim: usize,

        /// Worker threads for simulation (default: all cores)
        #[arg(long)]
        workers: Option<usize>,

        /// Keep the simulated gene-tree files
        #[arg(long)]
        keep_files: bool,

        /// Directory in which to create the simulation directory (default: ./)
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// hybrid-Lambda executable (default: $QUARTETFIT_HYBRID_LAMBDA, then PATH)
        #[arg(long)]
        simulator: Option<PathBuf>,

        /// Behavior when branch-length optimization does not converge
        #[arg(long, default_value = "best-effort")]
        failure_policy: OptimizationPolicy,

        /// Write the full result as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the CF table with expected CFs and p-values added
        #[arg(long)]
        write_data: Option<PathBuf>,
    },

    /// TICR test: Dirichlet outlier p-values binned and tested against
    /// their expected proportions.
    Ticr {
        /// Network in extended Newick, inline or as a file path.
        /// Omit with --from-expected.
        #[arg(long, required_unless_present = "from_expected")]
        network: Option<String>,

        /// Quartet CF table (JSON)
        #[arg(long)]
        data: PathBuf,

        /// Use the expected CFs already in the table instead of a network
        #[arg(long, conflicts_with_all = ["network", "optimize"])]
        from_expected: bool,

        /// Fit branch lengths and inheritance probabilities before testing
        #[arg(long)]
        optimize: bool,

        /// Per-quartet statistic: maxcf (default) or minpval
        #[arg(long, default_value = "maxcf")]
        statistic: DirichletStatistic,

        /// Overall test: onesided (default) or goodness
        #[arg(long, default_value = "onesided")]
        test: TicrTest,

        /// Behavior when an optimizer does not converge
        #[arg(long, default_value = "best-effort")]
        failure_policy: OptimizationPolicy,

        /// Write the full result as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the CF table with expected CFs and p-values added
        #[arg(long)]
        write_data: Option<PathBuf>,
    },

    /// Expected quartet CFs of a network under the coalescent
    Expected {
        /// Network in extended Newick, inline or as a file path
        #[arg(long)]
        network: String,

        /// Quartet CF table (JSON) whose four-taxon sets are evaluated
        #[arg(long, required_unless_present = "quartet")]
        data: Option<PathBuf>,

        /// A single four-taxon set, comma separated (e.g. A,B,C,D); repeatable
        #[arg(long)]
        quartet: Vec<String>,

        /// Fill in missing branch lengths first
        #[arg(long)]
        ultrametrize: bool,

        /// Write the table with expected CFs (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let verbose = cli.verbose > 0;

    let result = match cli.command {
        Commands::Gof {
            network,
            data,
            optimize,
            statistic,
            correction,
            seed,
            nsim,
            workers,
            keep_files,
            temp_dir,
            simulator,
            failure_policy,
            output,
            write_data,
        } => commands::gof::run(commands::gof::GofCommandConfig {
            network: &network,
            data: &data,
            optimize,
            statistic,
            correction,
            seed,
            nsim,
            workers,
            keep_files,
            temp_dir: temp_dir.as_deref(),
            simulator: simulator.as_deref(),
            failure_policy,
            output: output.as_deref(),
            write_data: write_data.as_deref(),
            verbose,
        }),
        Commands::Ticr {
            network,
            data,
            from_expected,
            optimize,
            statistic,
            test,
            failure_policy,
            output,
            write_data,
        } => commands::ticr::run(commands::ticr::TicrCommandConfig {
            network: if from_expected {
                None
            } else {
                network.as_deref()
            },
            data: &data,
            optimize,
            statistic,
            test,
            failure_policy,
            output: output.as_deref(),
            write_data: write_data.as_deref(),
        }),
        Commands::Expected {
            network,
            data,
            quartet,
            ultrametrize,
            output,
        } => commands::expected::run(
            &network,
            data.as_deref(),
            &quartet,
            ultrametrize,
            output.as_deref(),
            verbose,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
