//! Reflow CLI entrypoint.

use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod runner;

#[cfg(test)]
mod runner_tests;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};
use handlers::DispatchOptions;

#[derive(Parser)]
#[command(name = "reflow")]
#[command(author, version, about = "Reflow workflow orchestration", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reflow=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Configuration errors exit with 2, everything else with 1.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<reflow_core::Error>() {
        Some(e) if e.is_configuration() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

async fn run(cli: Cli, config: CliConfig) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Validate { path } => handlers::validate(&config, path).await?,
        Commands::Plan { path, event } => handlers::plan(&config, path, &event).await?,
        Commands::Dispatch {
            path,
            event,
            outcomes,
            secrets_file,
            reports_dir,
            format,
        } => {
            let options = DispatchOptions {
                outcomes,
                secrets_file,
                reports_dir,
                format,
            };
            return handlers::dispatch(&config, path, &event, options).await;
        }
        Commands::Schema { kind } => handlers::schema(kind)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config, config_path)?,
            ConfigCommands::Set { key, value } => handlers::set_config(config_path, &key, &value)?,
        },
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CliConfig::load_from(path),
        None => CliConfig::load(),
    }
    .unwrap_or_default();

    init_tracing(cli.log_format.unwrap_or(config.log_format));

    match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("✗").red());
            exit_code(&err)
        }
    }
}
