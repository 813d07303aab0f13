use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod config_check;
mod decode;
mod pedestal;
mod wordfile;

/// gem-decode command line tools
#[derive(Parser)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
struct Cli {
    /// Increase logging verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a raw event file through a module config and print found hits
    Decode {
        /// Module configuration file (key/value text)
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
        /// Raw event file (length-prefixed big-endian word frames)
        #[arg(value_name = "EVENTS")]
        events: PathBuf,
    },
    /// Load and validate a module configuration file
    ConfigCheck {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
    /// Summarize a module's pedestal/RMS calibration arrays
    Pedestal {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Decode { config, events } => decode::run(&config, &events, cli.verbose > 0)?,
        Commands::ConfigCheck { config } => config_check::run(&config)?,
        Commands::Pedestal { config } => pedestal::run(&config)?,
    }

    Ok(())
}
