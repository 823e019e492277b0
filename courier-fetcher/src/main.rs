//! Courier Fetcher Binary
//!
//! Standalone polling fetch worker. Point it at a dispatcher with
//! `COURIER_DISPATCHER_URL` and give it a stable `COURIER_CLIENT_ID`.

use courier_fetcher::{Fetcher, FetcherConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courier_fetcher=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load configuration from environment
    let config = FetcherConfig::from_env();

    Fetcher::new(config).run().await;

    Ok(())
}
