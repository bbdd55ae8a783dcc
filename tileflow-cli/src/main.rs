//! TileFlow CLI - Command-line interface
//!
//! ```text
//! tileflow [--config tileflow.ini] [--log-level info] <command>
//!
//!   detect <image> [--plan N] [--merge M] [--min-confidence F] [--no-tiling]
//!   tiles  <image> [--plan N]
//!   status [--probe]
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::detect::DetectArgs;
use commands::status::StatusArgs;
use commands::tiles::TilesArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tileflow", version, about = "Tiled object detection across remote backends")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "tileflow.ini")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set (e.g. info, debug, tileflow=trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect objects in an image using the configured backends
    Detect(DetectArgs),
    /// Show the tiles an image would be split into
    Tiles(TilesArgs),
    /// Show backend health and load
    Status(StatusArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = tileflow::logging::init(&cli.log_level) {
        eprintln!("Warning: logging unavailable: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Geometry only, no runtime needed.
        Commands::Tiles(args) => commands::tiles::run(&cli.config, args),
        Commands::Detect(args) => {
            runtime()?.block_on(commands::detect::run(&cli.config, args))
        }
        Commands::Status(args) => {
            runtime()?.block_on(commands::status::run(&cli.config, args))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}
