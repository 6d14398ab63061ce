use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{Commands, derive_keys_command, loopback_command, mrz_seed_command};

#[derive(Parser)]
#[command(version, about = "Contactless credential authentication tools")]
struct Cli {
    /// Configuration file (TOML), merged with NEXUM_ACCESS_* environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Trace level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Authentication scheme selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemeArg {
    /// ICAO 9303 Basic Access Control
    Bac,
    /// Diversified-key access badge
    Badge,
}

/// Link shape used between the two roles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    /// One block per exchange
    #[default]
    Block,
    /// Flagged fragments through bounded queues
    Fragmented,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Loopback { scheme, transport } => {
            let config = config::load_config(cli.config.as_deref())?;
            loopback_command(&config, scheme, transport)
        }
        Commands::DeriveKeys {
            read_key,
            object_id,
            diversifier,
            key_no,
            cipher,
        } => derive_keys_command(&read_key, object_id.as_deref(), &diversifier, key_no, cipher),
        Commands::MrzSeed {
            document_number,
            date_of_birth,
            date_of_expiry,
        } => mrz_seed_command(&document_number, &date_of_birth, &date_of_expiry),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();
}
