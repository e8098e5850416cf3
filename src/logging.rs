//! `tracing` subscriber setup for the binary.
//!
//! `MEDIA_INGEST_LOG` takes precedence over `RUST_LOG`; both override the
//! level picked from the command-line flags.

use tracing::Level;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "MEDIA_INGEST_LOG";

pub fn level_for(verbose: bool, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

fn build_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()))
}

/// Installs a plaintext subscriber on stderr. Calling it twice is a no-op.
pub fn init_logging(verbose: bool, quiet: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level_for(verbose, quiet)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
