//! CLI interface for som-hft
//!
//! Provides subcommands for:
//! - `run`: Start paper trading
//! - `status`: Show current state
//! - `config`: Show configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "som-hft")]
#[command(about = "Paper-trading bot driven by order-book imbalance and a SOM expectancy model")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start paper trading
    Run(RunArgs),
    /// Show current state
    Status,
    /// Show configuration
    Config,
}
