use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use exam_scheduler::config::{init_logging, SolveOptions};
use exam_scheduler::data_prep::RawDataset;
use exam_scheduler::error::ScheduleError;
use exam_scheduler::{pipeline, server};

#[derive(Parser)]
#[command(name = "exam_scheduler")]
#[command(about = "Adaptive university exam timetabling engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solves a dataset end to end and prints the timetable as JSON.
    Solve {
        /// Path to the input dataset (spec §6 wire format).
        input: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        time_limit_seconds: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        no_ga_filter: bool,
    },
    /// Runs the pre-solve analyzer only and prints the prediction report.
    Analyze { input: PathBuf },
    /// Serves the `solve`/`analyze` endpoints over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Solve {
            input,
            seed,
            time_limit_seconds,
            workers,
            no_ga_filter,
        } => {
            let options = SolveOptions::resolve(seed, time_limit_seconds, workers, no_ga_filter);
            match load_dataset(&input).and_then(|raw| pipeline::solve_dataset(raw, &options)) {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(&e),
            }
        }
        Commands::Analyze { input } => match load_dataset(&input).and_then(pipeline::analyze_dataset) {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                ExitCode::SUCCESS
            }
            Err(e) => report_error(&e),
        },
        Commands::Serve { bind } => {
            let runtime = tokio::runtime::Runtime::new().expect("failed to start async runtime");
            runtime.block_on(server::run_server(&bind));
            ExitCode::SUCCESS
        }
    }
}

fn report_error(e: &ScheduleError) -> ExitCode {
    error!("{e}");
    ExitCode::from(e.exit_code() as u8)
}

fn load_dataset(input: &PathBuf) -> Result<RawDataset, ScheduleError> {
    let text = std::fs::read_to_string(input).map_err(|e| ScheduleError::InputValidation {
        message: format!("could not read {}: {e}", input.display()),
    })?;
    serde_json::from_str(&text).map_err(|e| ScheduleError::InputValidation {
        message: format!("could not parse {}: {e}", input.display()),
    })
}
