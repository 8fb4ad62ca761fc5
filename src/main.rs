use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_conductor::cli::{self, Cli};
use a3s_conductor::{ConductorConfig, ConductorError, StructuredError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = ConductorConfig::load(cli.config.as_deref());

    // Initialize tracing: RUST_LOG, then --verbose, then the configured level
    let default_level = match (&config, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.log_level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, Arc::new(config)).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(err: &ConductorError) -> ExitCode {
    tracing::debug!(error = ?err, "Command failed");
    let structured = StructuredError::from(err);
    eprintln!("error[{}]: {}", structured.code, structured.message);
    if let Some(hint) = &structured.hint {
        eprintln!("  hint: {}", hint);
    }
    ExitCode::FAILURE
}
