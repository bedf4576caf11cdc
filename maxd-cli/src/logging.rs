use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;

/// Install the global subscriber. `RUST_LOG` directives are layered on top
/// of `default_level`.
pub fn init(default_level: &str) -> Result<()> {
    let directive: Directive = default_level
        .parse()
        .with_context(|| format!("invalid log level '{default_level}'"))?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env()
        .context("parse RUST_LOG")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .context("install log subscriber")?;
    Ok(())
}
