use anyhow::Context;
use tracing::warn;
use tracing_subscriber::{filter::ParseError, fmt, prelude::*, EnvFilter};

const FALLBACK_FILTER: &str = "info";

/// Parses `directives`, falling back to `info` when they are malformed.
fn log_filter(directives: &str) -> (EnvFilter, Option<ParseError>) {
    match EnvFilter::try_new(directives) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(FALLBACK_FILTER), Some(err)),
    }
}

/// Installs the global subscriber. Logs go to stderr with their targets so
/// `diagram.*` and `lsp.transport` lines can be told apart.
pub fn init_tracing(directives: &str) -> anyhow::Result<()> {
    let (filter, rejected) = log_filter(directives);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .context("failed to install tracing subscriber")?;
    if let Some(err) = rejected {
        warn!(
            target: "diagram.host",
            directives,
            fallback = FALLBACK_FILTER,
            error = %err,
            "invalid log filter"
        );
    }
    Ok(())
}
