use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use drover::cli::commands::{self, RunOptions, Selection};
use drover::config::SinkSpec;
use drover::config::error::ConfigError;
use drover::report::SuiteVerdict;

#[derive(Parser)]
#[command(name = "drover", about = "drover: run test suites across projects on parallel workers", version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SelectionArgs {
    /// Only suite files whose path contains one of these
    files: Vec<String>,

    /// Config file (default: drover.yaml, drover.yml or drover.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only these projects
    #[arg(short, long = "project")]
    projects: Vec<String>,

    /// Only tests whose full title matches this regex
    #[arg(short, long)]
    grep: Option<String>,

    /// Tag expression, e.g. "@smoke AND NOT @slow"
    #[arg(short, long)]
    tag: Option<String>,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Self {
            config: args.config,
            projects: args.projects,
            grep: args.grep,
            tag: args.tag,
            files: args.files,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected tests
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Retries per failed unit
        #[arg(long)]
        retries: Option<u32>,

        /// Per-unit timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Fail if any test is marked only
        #[arg(long)]
        forbid_only: bool,

        /// Stop dispatching after this many failed units
        #[arg(long)]
        max_failures: Option<usize>,

        /// Reporter: list, json, yaml or junit, optionally NAME=PATH
        #[arg(short, long = "reporter")]
        reporters: Vec<SinkSpec>,
    },

    /// List the units a run would dispatch
    List {
        #[command(flatten)]
        selection: SelectionArgs,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "drover=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_config_error(e: &ConfigError) -> ExitCode {
    eprintln!("error: {e}");
    if let Some(detail) = &e.detail {
        eprintln!("{detail}");
    }
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            selection,
            workers,
            retries,
            timeout,
            forbid_only,
            max_failures,
            reporters,
        } => {
            let options = RunOptions {
                selection: selection.into(),
                workers,
                retries,
                timeout_ms: timeout,
                forbid_only,
                max_failures,
                reporters,
            };
            match commands::run_run(options).await {
                Ok(SuiteVerdict::Passed) => ExitCode::SUCCESS,
                Ok(SuiteVerdict::Failed) => ExitCode::from(1),
                Ok(SuiteVerdict::Interrupted) => ExitCode::from(130),
                Err(e) => report_config_error(&e),
            }
        }
        Commands::List { selection } => match commands::run_list(&selection.into()) {
            Ok(listing) => {
                print!("{listing}");
                ExitCode::SUCCESS
            }
            Err(e) => report_config_error(&e),
        },
    }
}
