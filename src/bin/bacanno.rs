use anyhow::{Context, anyhow};
use bacanno::{
    about,
    config::{CATALOG_ENV_VAR, DEFAULT_INPUT_DIR, DEFAULT_OUTPUT_DIR, DEFAULT_THREADS, PipelineConfig},
    error::EXIT_FAILURE,
    logging::{RunLog, init_console_logger},
    orchestrator::PipelineOrchestrator,
    preflight::SystemProbe,
    process::SystemProcessRunner,
    run::PipelineRun,
    PipelineError,
};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "bacanno",
    version,
    long_version = about::LONG_VERSION,
    about = "Runs the four-stage bacterial genome annotation pipeline"
)]
struct Cli {
    /// Pipeline catalog JSON to use instead of the built-in one
    #[arg(long, global = true, env = CATALOG_ENV_VAR, value_name = "PATH")]
    catalog: Option<PathBuf>,

    /// Print debug records to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Annotate every sequence file in INPUT_DIR
    Run {
        #[arg(default_value = DEFAULT_INPUT_DIR)]
        input_dir: PathBuf,
        #[arg(default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
        #[arg(default_value_t = DEFAULT_THREADS as u16, value_parser = clap::value_parser!(u16).range(1..))]
        threads: u16,
    },
    /// Create any missing tool environment
    Envs,
    /// Download the reference datasets into OUTPUT_DIR/ref
    FetchRefs {
        #[arg(default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
    },
    /// Print the effective pipeline catalog
    Catalog,
}

fn usage_text() -> String {
    let mut cmd = Cli::command();
    cmd.build();
    match cmd.find_subcommand_mut("run") {
        Some(run) => run.render_help().to_string(),
        None => cmd.render_help().to_string(),
    }
}

/// How a failed subcommand ends the process.
#[derive(Debug, PartialEq, Eq)]
struct Failure {
    code: u8,
    print_usage: bool,
    log_error: bool,
}

/// `logged` is set for errors out of `PipelineOrchestrator::execute`, which
/// records its own abort reason.
fn failure(err: &PipelineError, logged: bool) -> Failure {
    Failure {
        code: u8::try_from(err.exit_code()).unwrap_or(EXIT_FAILURE as u8),
        print_usage: matches!(err, PipelineError::InvalidInput { .. }),
        log_error: !logged,
    }
}

fn exit_with(err: &PipelineError, logged: bool) -> ExitCode {
    let failure = failure(err, logged);
    if failure.log_error {
        log::error!("{err}");
    }
    if failure.print_usage {
        println!("{}", usage_text());
    }
    ExitCode::from(failure.code)
}

fn load_config(catalog: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(catalog).context("Could not load pipeline configuration")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_console_logger(cli.verbose) {
        eprintln!("Could not initialize logging: {e}");
    }

    let config = match load_config(cli.catalog.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(EXIT_FAILURE as u8);
        }
    };
    let runner = SystemProcessRunner;
    let probe = SystemProbe;
    let orchestrator = PipelineOrchestrator::new(&config, &runner, &probe);
    let console = RunLog::console_only();

    let outcome = match cli.command {
        Command::Run {
            input_dir,
            output_dir,
            threads,
        } => match PipelineRun::new(&input_dir, &output_dir, usize::from(threads)) {
            Ok(run) => orchestrator
                .execute(&run)
                .map(|_| log::info!("Run report written to {}", run.report_path().display()))
                .map_err(|e| (e, true)),
            Err(e) => Err((e, false)),
        },
        Command::Envs => orchestrator
            .ensure_environments(&console)
            .map(|_| ())
            .map_err(|e| (e, false)),
        Command::FetchRefs { output_dir } => orchestrator
            .fetch_references(&output_dir, &console)
            .map(|refs| {
                for r in refs {
                    println!("{}\t{}", r.id, r.local_path.display());
                }
            })
            .map_err(|e| (e, false)),
        Command::Catalog => {
            return match serde_json::to_string_pretty(&config.catalog)
                .map_err(|e| anyhow!("Could not serialize catalog: {e}"))
            {
                Ok(text) => {
                    println!("{text}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    log::error!("{e:#}");
                    ExitCode::from(EXIT_FAILURE as u8)
                }
            };
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err((err, logged)) => exit_with(&err, logged),
    }
}
