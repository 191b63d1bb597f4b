use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use finance_etl::config::PipelineConfig;
use finance_etl::logging;
use finance_etl::pipeline::{Pipeline, bootstrap};
use finance_etl::warehouse::{Connector, SqliteConnector};

#[derive(Parser)]
#[command(
    name = "finance-etl",
    version,
    about = "Load, clean and validate staged financial transactions"
)]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the location of the configured stage.
    #[arg(long, global = true)]
    stage_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also append log lines to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the staged file, transform it, and run the quality checks.
    Run,
    /// Create the raw and clean tables if they are missing.
    Init,
    /// Run the quality checks against the current clean table.
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log_level, cli.log_file.as_deref());

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.stage_dir {
        config = config.with_stage_location(dir);
    }
    match cli.command {
        Command::Init => {
            let connector = SqliteConnector::from_config(&config);
            let mut session = connector.connect(&config.warehouse)?;
            bootstrap(session.as_mut(), &config).context("creating warehouse tables")?;
            session.close().context("closing warehouse session")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run | Command::Check => {
            let pipeline = Pipeline::new(config)?;
            let connector = SqliteConnector::from_config(pipeline.config());
            let report = match cli.command {
                Command::Run => pipeline.run(&connector)?,
                _ => pipeline.check(&connector)?,
            };
            // A failed stage is already logged; surface it through the exit status too.
            Ok(if report.outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
