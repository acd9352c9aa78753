//! Sealwire key maintenance binary.
//!
//! # Usage
//!
//! ```bash
//! # First run on a fresh device
//! sealwire --db keys.redb register
//!
//! # Periodic maintenance
//! sealwire --db keys.redb refill --threshold 10
//! sealwire --db keys.redb rotate-signed
//! sealwire --db keys.redb rotate-sender-key 42 --max-age-days 14
//! ```

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use sealwire_cli::{CliError, Command, SystemEnv, execute};
use sealwire_core::{CoreConfig, ProtocolAddress, ProtocolCore, RedbKeyStore};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sealwire key maintenance
#[derive(Parser, Debug)]
#[command(name = "sealwire")]
#[command(about = "Key lifecycle maintenance for a sealwire key store")]
#[command(version)]
struct Args {
    /// Path to the key store database
    #[arg(long, default_value = "sealwire.redb")]
    db: PathBuf,

    /// Account name of the local device
    #[arg(long, default_value = "local")]
    account: String,

    /// Days before superseded signed prekeys become eligible for cleaning
    #[arg(long, default_value = "30")]
    archive_age_days: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

fn run(args: &Args) -> Result<(), CliError> {
    let store = RedbKeyStore::open(&args.db).map_err(CliError::Open)?;
    let config = CoreConfig {
        signed_pre_key_archive_age: Duration::from_secs(args.archive_age_days * 24 * 60 * 60),
        ..CoreConfig::default()
    };
    let core = ProtocolCore::transactional(store, SystemEnv::new(), config);
    let local_address = ProtocolAddress::primary(args.account.clone());

    tracing::debug!(db = %args.db.display(), command = ?args.command, "Running command");
    let outcome = execute(&core, &local_address, &args.command)?;
    tracing::info!(%outcome, "Done");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.exit_code() == 2, "Command failed");
            ExitCode::from(e.exit_code())
        },
    }
}
