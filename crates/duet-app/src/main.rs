//! duet: command-line front end for two-person rooms.
//!
//! Loads the TOML config, sets up logging, and either inspects the config
//! or runs a local two-party session over the in-memory store.

mod cli;
mod demo;
mod settings;

use std::process::ExitCode;
use std::time::Duration;

use duet_common::{ConfigError, DuetError};
use duet_config::{config_to_json, toml_loader, validation, DuetConfig};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command, ConfigCommand};

/// Read the config from `--config` or the platform default, without validating.
fn read_config(args: &Args) -> Result<DuetConfig, ConfigError> {
    match &args.config {
        Some(path) => toml_loader::load_from_path(path),
        None => toml_loader::load_default(),
    }
}

fn init_logging(directive: &str) {
    let directive: Result<Directive, _> = directive
        .parse()
        .or_else(|_| settings::DEFAULT_LOG_DIRECTIVE.parse());
    let filter = match directive {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_command(args: &Args, command: ConfigCommand, config: DuetConfig) -> Result<(), DuetError> {
    match command {
        ConfigCommand::Path => {
            let path = match &args.config {
                Some(path) => path.clone(),
                None => toml_loader::default_config_path()?,
            };
            println!("{}", path.display());
        }
        ConfigCommand::Show => println!("{}", config_to_json(&config)),
        ConfigCommand::Check => {
            validation::validate(&config)?;
            println!("config OK");
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), DuetError> {
    let loaded = read_config(&args);
    init_logging(&settings::log_directive(
        args.log_level.as_deref(),
        loaded.as_ref().ok(),
    ));
    tracing::info!("duet v{} starting", env!("CARGO_PKG_VERSION"));

    match &args.command {
        Command::Config(command) => config_command(&args, *command, loaded?),
        Command::Demo { room, step_timeout } => {
            let config = loaded.unwrap_or_else(|e| {
                tracing::warn!("Config load failed, using defaults: {e}");
                DuetConfig::default()
            });
            if let Err(e) = validation::validate(&config) {
                tracing::warn!("Config has problems, continuing anyway: {e}");
            }
            demo::run(&config, room, Duration::from_secs(*step_timeout)).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("duet: {e}");
            ExitCode::FAILURE
        }
    }
}
