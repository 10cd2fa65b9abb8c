use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Duet: two-person rooms with chat, presence and video calls.
#[derive(Parser, Debug)]
#[command(name = "duet", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run two local participants through a chat and a call.
    Demo {
        /// Room code both participants join.
        #[arg(long, default_value = "R1")]
        room: String,

        /// Seconds to wait for each step before giving up.
        #[arg(long, default_value_t = 5)]
        step_timeout: u64,
    },

    /// Inspect the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the config file location.
    Path,
    /// Print the effective config as JSON.
    Show,
    /// Validate the config file and report every problem.
    Check,
}

pub fn parse() -> Args {
    Args::parse()
}
