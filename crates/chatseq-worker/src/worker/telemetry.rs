//! Log setup: `tracing-subscriber` fmt output filtered by `RUST_LOG`, with
//! a configurable fallback filter.

use tracing_subscriber::EnvFilter;

pub fn init_telemetry(fallback_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize tracing: {err}"))
}
