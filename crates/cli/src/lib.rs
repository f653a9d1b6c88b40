pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use accolade_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use commands::recognition::{PeriodBounds, RecognitionRequest};

#[derive(Debug, Parser)]
#[command(
    name = "accolade",
    about = "Accolade recognition operator CLI",
    long_about = "Nominate employees, collect ballots, finalize winners and inspect recognition history.",
    after_help = "Examples:\n  accolade migrate\n  accolade nominate --employee emp-ada --metric tickets=42 --message \"Closed the backlog\"\n  accolade vote --nomination <ID> --voter emp-grace --value 1\n  accolade winners --start 2026-01-01"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Read configuration from this TOML file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "Override the database URL")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct PeriodArgs {
    #[arg(long, help = "Inclusive period start (RFC 3339 or YYYY-MM-DD)")]
    start: Option<String>,
    #[arg(long, help = "Inclusive period end (RFC 3339 or YYYY-MM-DD)")]
    end: Option<String>,
}

impl From<PeriodArgs> for PeriodBounds {
    fn from(value: PeriodArgs) -> Self {
        Self { start: value.start, end: value.end }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the demo employee roster")]
    Seed,
    #[command(about = "Show effective configuration values with their sources")]
    Config,
    #[command(about = "Validate config, DB connectivity and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Nominate an employee")]
    Nominate {
        #[arg(long)]
        employee: String,
        #[arg(long = "metric", value_name = "NAME=VALUE", help = "Metric snapshot entry, repeatable")]
        metrics: Vec<String>,
        #[arg(long, default_value = "")]
        message: String,
    },
    #[command(about = "Cast or replace a ballot (-1 reject, 0 neutral, 1 accept)")]
    Vote {
        #[arg(long)]
        nomination: String,
        #[arg(long)]
        voter: String,
        #[arg(long, allow_hyphen_values = true)]
        value: i64,
    },
    #[command(about = "Show one voter's ballot on a nomination")]
    Ballot {
        #[arg(long)]
        nomination: String,
        #[arg(long)]
        voter: String,
    },
    #[command(about = "Sum the ballots on a nomination")]
    Tally {
        #[arg(long)]
        nomination: String,
    },
    #[command(about = "Finalize a nomination as the winner")]
    Finalize {
        #[arg(long)]
        nomination: String,
    },
    #[command(about = "List open candidates nominated in a period (default: current month)")]
    Candidates(PeriodArgs),
    #[command(about = "Show the most recent winner in a period")]
    Winner(PeriodArgs),
    #[command(about = "List winners finalized in a period")]
    Winners(PeriodArgs),
    #[command(about = "Check whether an employee won in a period")]
    IsWinner {
        #[arg(long)]
        employee: String,
        #[command(flatten)]
        period: PeriodArgs,
    },
    #[command(about = "List recent finalizations, newest first")]
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        overrides: ConfigOverrides { database_url: cli.database_url, ..ConfigOverrides::default() },
    };
    init_logging(&options);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Config => commands::config::run(&options),
        Command::Doctor { json } => commands::doctor::run(&options, json),
        Command::Nominate { employee, metrics, message } => commands::recognition::run(
            &options,
            RecognitionRequest::Nominate { employee, metrics, message },
        ),
        Command::Vote { nomination, voter, value } => commands::recognition::run(
            &options,
            RecognitionRequest::Vote { nomination, voter, value },
        ),
        Command::Ballot { nomination, voter } => commands::recognition::run(
            &options,
            RecognitionRequest::Ballot { nomination, voter },
        ),
        Command::Tally { nomination } => {
            commands::recognition::run(&options, RecognitionRequest::Tally { nomination })
        }
        Command::Finalize { nomination } => {
            commands::recognition::run(&options, RecognitionRequest::Finalize { nomination })
        }
        Command::Candidates(period) => {
            commands::recognition::run(&options, RecognitionRequest::Candidates(period.into()))
        }
        Command::Winner(period) => {
            commands::recognition::run(&options, RecognitionRequest::Winner(period.into()))
        }
        Command::Winners(period) => {
            commands::recognition::run(&options, RecognitionRequest::Winners(period.into()))
        }
        Command::IsWinner { employee, period } => commands::recognition::run(
            &options,
            RecognitionRequest::IsWinner { employee, period: period.into() },
        ),
        Command::History { limit } => {
            commands::recognition::run(&options, RecognitionRequest::History { limit })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout carries only the command payload. A config that fails
/// to load falls back to defaults here; the command itself reports the failure.
fn init_logging(options: &LoadOptions) {
    use tracing::Level;
    use LogFormat::*;

    let config = AppConfig::load(options.clone()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}
