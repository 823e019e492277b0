//! Courier Dispatcher Binary
//!
//! Standalone binary for the Courier dispatcher server.
//! For library usage, see [`courier_dispatcher`].

use courier_dispatcher::{run_server, DispatcherConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courier_dispatcher=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load configuration from environment
    let config = DispatcherConfig::from_env();

    run_server(config).await
}

#[cfg(test)]
mod tests {
    use courier_dispatcher::DispatcherConfig;

    #[test]
    fn test_config_from_env() {
        // Test default config
        let config = DispatcherConfig::default();
        assert_eq!(config.port, 8600);
        assert_eq!(config.data_dir, std::path::PathBuf::from("."));
    }
}
