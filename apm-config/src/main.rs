mod config;
mod logging;
mod statsd;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use config_api::ConfigApiError;
use config_api::config::ValidationError;
use std::path::PathBuf;
use std::process::ExitCode;

/// Central configuration service for APM agents.
#[derive(Parser)]
#[command(name = "apm-config", version)]
enum CliCommand {
    /// Serve agent configuration until the process is stopped.
    Run(ConfigArgs),
    /// Check a configuration file and exit.
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML configuration file.
    #[arg(long, short = 'c')]
    config_file: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Logging(#[from] logging::LoggingError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    ConfigApi(#[from] ConfigApiError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Run(args) => run(args),
        CliCommand::Validate(args) => validate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn validate(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_file)?;
    config.config_api.validate()?;
    println!("{}: ok", args.config_file.display());
    Ok(())
}

fn run(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config_file)?;
    config.config_api.validate()?;

    let logging_config = config.common.logging.unwrap_or_default();
    let _sentry_guard = logging::init(&logging_config)?;

    if let Some(metrics_config) = &config.common.metrics {
        statsd::init(metrics_config)?;
    }

    tracing::info!(config_file = %args.config_file.display(), "starting apm-config");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(config_api::run(config.config_api))?;
    Ok(())
}
