//! Sentinel CLI - sentinel command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// Sentinel - watch directory trees and report debounced changes
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch one or more directories until Ctrl-C
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Debounce window in milliseconds (overrides the config file)
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print one JSON object per delivery
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Watch {
            paths,
            debounce_ms,
            config,
            json,
        } => {
            cmd::watch::run(cmd::watch::WatchArgs {
                paths,
                debounce_ms,
                config,
                json,
            })
            .await
        }
        Commands::Config { config } => cmd::config::run(config.as_deref()),
    }
}
