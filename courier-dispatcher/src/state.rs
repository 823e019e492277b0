//! Application state for the dispatcher.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::cache::CacheStore;
use crate::clients::ClientTable;
use crate::cooldown::CooldownStore;
use crate::queues::QueueRegistry;
use crate::table::RequestTable;

/// Wall-clock epoch millis.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The dispatcher's mutable core: queue registry, request table and client
/// table.
///
/// All three mutate under one lock because the scheduler scans the full
/// request table and must see a consistent snapshot. The lock is never held
/// across cache I/O, webhook POSTs or response streaming.
pub struct Core {
    pub queues: QueueRegistry,
    pub table: RequestTable,
    pub clients: ClientTable,
}

impl Core {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            queues: QueueRegistry::new(cache_root),
            table: RequestTable::default(),
            clients: ClientTable::default(),
        }
    }
}

/// Application state shared across all handlers
pub struct AppState {
    /// Serialized mutable core
    pub core: Mutex<Core>,

    /// Persistent per-client cooldown timers
    pub cooldowns: CooldownStore,

    /// On-disk body cache
    pub cache: CacheStore,

    /// Outbound HTTP client, for webhook delivery
    pub http: reqwest::Client,

    /// Configuration
    pub config: DispatcherConfig,

    /// Epoch millis at process start, reported by the status endpoint
    pub start_at: u64,

    handler_seq: AtomicU64,
}

impl AppState {
    /// Create new application state: open the cooldown store and register
    /// the seed queues.
    pub fn new(config: DispatcherConfig) -> anyhow::Result<Self> {
        let cooldowns = CooldownStore::open(&config.data_dir.join(".timers"))?;
        let cache = CacheStore::new(&config.data_dir);

        let mut core = Core::new(&config.data_dir);
        for seed in &config.seed_queues {
            core.queues.register(&seed.host, seed.delay_ms, &seed.aliases)?;
        }

        Ok(Self {
            core: Mutex::new(core),
            cooldowns,
            cache,
            http: reqwest::Client::new(),
            config,
            start_at: now_ms(),
            handler_seq: AtomicU64::new(1),
        })
    }

    /// Unique id for a stream handler, so a cancelled waiter can detach the
    /// right entry.
    pub fn next_handler_id(&self) -> u64 {
        self.handler_seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// An eagerly registered queue.
#[derive(Debug, Clone)]
pub struct QueueSeed {
    /// Canonical hostname
    pub host: String,
    /// Minimum millis between dispatches to the same client
    pub delay_ms: u64,
    /// Alternate hostnames resolving to the same queue
    pub aliases: Vec<String>,
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Port to listen on
    pub port: u16,

    /// Root for the cache tree and the cooldown store
    pub data_dir: PathBuf,

    /// Run the in-process fetcher so the dispatcher is never starved of
    /// workers
    pub local_fetcher: bool,

    /// Queues registered at startup
    pub seed_queues: Vec<QueueSeed>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            port: 8600,
            data_dir: PathBuf::from("."),
            local_fetcher: true,
            seed_queues: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("COURIER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8600),
            data_dir: std::env::var("COURIER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            local_fetcher: std::env::var("COURIER_LOCAL_FETCHER")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
            seed_queues: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.port, 8600);
        assert!(config.local_fetcher);
        assert!(config.seed_queues.is_empty());
    }

    #[test]
    fn test_state_registers_seed_queues() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatcherConfig {
            data_dir: dir.path().to_path_buf(),
            seed_queues: vec![QueueSeed {
                host: "example.com".to_string(),
                delay_ms: 1_000,
                aliases: vec!["www.example.com".to_string()],
            }],
            ..Default::default()
        };

        let state = AppState::new(config).unwrap();
        let core = state.core.try_lock().unwrap();
        assert_eq!(core.queues.get("www.example.com").unwrap().name, "example.com");
    }

    #[test]
    fn test_handler_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatcherConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let state = AppState::new(config).unwrap();

        let a = state.next_handler_id();
        let b = state.next_handler_id();
        assert_ne!(a, b);
    }
}
