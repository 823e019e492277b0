//! Courier Dispatcher Library
//!
//! The central node of a distributed fetch pool: accepts cache-or-fetch
//! requests for third-party URLs, coalesces duplicate in-flight requests,
//! rate-limits per-host dispatches with persistent per-client cooldown
//! timers, hands work to polling fetcher clients, and caches fetched bodies
//! content-addressed on disk.
//!
//! This library can be used standalone (see `main.rs`) or embedded; the
//! in-process fetcher from `courier-fetcher` keeps the dispatcher from
//! starving when no remote clients are attached.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod cache;
pub mod clients;
pub mod cooldown;
pub mod error;
pub mod key;
pub mod queues;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod table;
pub mod webhook;

pub use state::{AppState, DispatcherConfig, QueueSeed};

use state::now_ms;

/// Interval between cooldown sweeps. The first sweep runs at startup.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Build the dispatcher router on top of shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(routes::enqueue).get(routes::next))
        .route("/status", get(routes::status))
        .route("/:queue/:digest", post(routes::deliver))
        .fallback(routes::not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the dispatcher server.
///
/// This function starts the HTTP server and blocks until it's shut down.
pub async fn run_server(config: DispatcherConfig) -> anyhow::Result<()> {
    info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        "Starting Courier dispatcher v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone())?);

    // Cooldown sweep: once at startup, then hourly.
    {
        let cooldowns = state.cooldowns.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = cooldowns.sweep(now_ms()) {
                    warn!(error = %e, "cooldown sweep failed");
                }
            }
        });
    }

    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Courier dispatcher listening on http://{}", addr);
    print_banner(&config);

    if config.local_fetcher {
        let fetcher = courier_fetcher::Fetcher::new(courier_fetcher::FetcherConfig {
            dispatcher_url: format!("http://127.0.0.1:{}", config.port),
            client_id: "localhost".to_string(),
            ..Default::default()
        });
        tokio::spawn(async move { fetcher.run().await });
        info!("local fetcher started");
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Print the startup banner
fn print_banner(config: &DispatcherConfig) {
    println!();
    println!("==================================================");
    println!("  Courier Dispatcher v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://0.0.0.0:{}", config.port);
    println!("  Data dir:     {}", config.data_dir.display());
    println!(
        "  Local fetcher: {}",
        if config.local_fetcher { "enabled" } else { "disabled" }
    );
    if config.seed_queues.is_empty() {
        println!("  Queues: lazy registration only (delay 60s)");
    } else {
        println!("  Queues:");
        for seed in &config.seed_queues {
            println!(
                "    {} (delay {}ms, {} aliases)",
                seed.host,
                seed.delay_ms,
                seed.aliases.len()
            );
        }
    }
    println!();
    println!("  Endpoints:");
    println!("    Enqueue: POST /");
    println!("    Poll:    GET  /  (x-client-id required)");
    println!("    Deliver: POST /<queue>/<digest>");
    println!("    Status:  GET  /status");
    println!("==================================================");
    println!();
}
