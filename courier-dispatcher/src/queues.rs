//! Queue registry.
//!
//! One queue per canonical upstream host. A queue carries the minimum spacing
//! between dispatches of its requests to any single client; alternate
//! hostnames (aliases) resolve to the same queue. Queues are registered
//! eagerly from the configured seed set and lazily on first sight of an
//! unknown host, and are never destroyed.
//!
//! Queue names double as cache-directory names under the cache root, so the
//! registry is the gate that keeps hostile hosts out of the filesystem: a
//! name with a dot-only or empty label (`..`, `.`, `a..b`) or a path
//! separator never becomes a queue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

/// Dispatch spacing applied to hosts registered lazily.
pub const DEFAULT_DELAY_MS: u64 = 60_000;

/// Queue registry errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Host is not usable as a queue name (and therefore a cache directory)
    #[error("invalid queue host: {0:?}")]
    InvalidHost(String),

    /// Cache directory creation failed
    #[error("queue directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `name` is safe to use as a queue name and cache-directory name.
///
/// The WHATWG URL parser accepts hosts like `..`, so hostname shape has to be
/// enforced here: non-empty dot-separated labels, no path separators, no
/// NULs. Anything else would let a crafted URL key requests outside the
/// cache root.
fn valid_host(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name.split('.').all(|label| !label.is_empty())
}

/// A rate-limited logical channel for one upstream host. Immutable once
/// registered; re-registration may add aliases but never changes the delay.
#[derive(Debug)]
pub struct Queue {
    /// Canonical hostname, also the cache-key prefix
    pub name: String,
    /// Minimum millis between dispatches to the same client
    pub delay_ms: u64,
}

/// Host → queue mapping, including aliases.
pub struct QueueRegistry {
    cache_root: PathBuf,
    by_host: HashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    /// Create a registry whose queues keep their cache directories under
    /// `cache_root`.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self { cache_root: cache_root.into(), by_host: HashMap::new() }
    }

    /// Register a queue under its canonical name and each alias, and make
    /// sure its cache directory exists.
    ///
    /// Idempotent: the first registration wins. A later call with the same
    /// name may add aliases but the delay is not changed. The name and every
    /// alias must pass host validation.
    pub fn register(
        &mut self,
        name: &str,
        delay_ms: u64,
        aliases: &[String],
    ) -> Result<Arc<Queue>, QueueError> {
        if !valid_host(name) {
            return Err(QueueError::InvalidHost(name.to_string()));
        }
        if let Some(alias) = aliases.iter().find(|a| !valid_host(a)) {
            return Err(QueueError::InvalidHost(alias.clone()));
        }

        let queue = match self.by_host.get(name) {
            Some(existing) => existing.clone(),
            None => {
                std::fs::create_dir_all(self.cache_root.join(name))?;
                let queue = Arc::new(Queue { name: name.to_string(), delay_ms });
                info!(queue = %name, delay_ms, "queue registered");
                self.by_host.insert(name.to_string(), queue.clone());
                queue
            }
        };

        for alias in aliases {
            self.by_host.entry(alias.clone()).or_insert_with(|| queue.clone());
        }

        Ok(queue)
    }

    /// Resolve a host to its queue, auto-registering unknown hosts with the
    /// default delay.
    pub fn resolve(&mut self, host: &str) -> Result<Arc<Queue>, QueueError> {
        match self.by_host.get(host) {
            Some(queue) => Ok(queue.clone()),
            None => self.register(host, DEFAULT_DELAY_MS, &[]),
        }
    }

    /// Look up a queue by canonical name or alias.
    pub fn get(&self, host: &str) -> Option<Arc<Queue>> {
        self.by_host.get(host).cloned()
    }
}
