//! Tracing setup.
//!
//! The library never installs a global subscriber; only the binary calls
//! [`init`]. Pipelines receive their parent span explicitly.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PBTGEN_LOG";

/// Install the fmt subscriber. `PBTGEN_LOG` wins over the fallback level.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

/// Root span for one whole run
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("pbtgen_run", run_id = %run_id)
}
