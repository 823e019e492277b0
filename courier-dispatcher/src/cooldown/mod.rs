//! Persistent per-client cooldown timers.
//!
//! Cooldowns cap how often any one client is offered work from a queue. They
//! must survive a dispatcher restart (otherwise a client could burst past a
//! rate limit by bouncing the process), so they live in an embedded sled
//! store under the data directory, one entry per client id, value encoded by
//! [`codec`]. Entries whose unlock time has passed are semantically absent
//! and get lazily purged on decode and by the periodic sweep.

pub mod codec;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

/// Sled-backed cooldown store.
///
/// Writes happen on the scheduler path only; concurrent readers (the status
/// endpoint) get last-written-wins semantics, which is all they need.
#[derive(Clone)]
pub struct CooldownStore {
    db: sled::Db,
}

impl CooldownStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Load a client's timers, dropping entries already unlocked at `now_ms`.
    pub fn load(&self, client_id: &str, now_ms: u64) -> Result<BTreeMap<String, u64>, sled::Error> {
        let Some(raw) = self.db.get(client_id.as_bytes())? else {
            return Ok(BTreeMap::new());
        };
        Ok(codec::decode(&String::from_utf8_lossy(&raw), now_ms))
    }

    /// Persist a client's timers. An empty map deletes the client's entry.
    pub fn save(&self, client_id: &str, timers: &BTreeMap<String, u64>) -> Result<(), sled::Error> {
        if timers.is_empty() {
            self.db.remove(client_id.as_bytes())?;
        } else {
            self.db
                .insert(client_id.as_bytes(), codec::encode(timers).as_bytes())?;
        }
        Ok(())
    }

    /// Re-encode every client's entry, dropping expired timers.
    ///
    /// Runs once at startup and then hourly; bounds the growth the lazy
    /// purging leaves behind. Returns the number of clients whose entry
    /// changed.
    pub fn sweep(&self, now_ms: u64) -> Result<usize, sled::Error> {
        let mut rewritten = 0;
        for entry in self.db.iter() {
            let (client, raw) = entry?;
            let decoded = codec::decode(&String::from_utf8_lossy(&raw), now_ms);
            let encoded = codec::encode(&decoded);
            if encoded.as_bytes() != raw.as_ref() {
                if encoded.is_empty() {
                    self.db.remove(&client)?;
                } else {
                    self.db.insert(&client, encoded.as_bytes())?;
                }
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            info!(clients = rewritten, "cooldown sweep rewrote entries");
        } else {
            debug!("cooldown sweep found nothing to drop");
        }
        Ok(rewritten)
    }

    /// Dump every client's live timers, for introspection.
    pub fn all(&self, now_ms: u64) -> Result<BTreeMap<String, BTreeMap<String, u64>>, sled::Error> {
        let mut out = BTreeMap::new();
        for entry in self.db.iter() {
            let (client, raw) = entry?;
            let timers = codec::decode(&String::from_utf8_lossy(&raw), now_ms);
            if !timers.is_empty() {
                out.insert(String::from_utf8_lossy(&client).into_owned(), timers);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries
            .iter()
            .map(|(q, t)| (q.to_string(), *t))
            .collect()
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::open(dir.path()).unwrap();

        store
            .save("client-a", &timers(&[("example.com", 5_000)]))
            .unwrap();

        let loaded = store.load("client-a", 1_000).unwrap();
        assert_eq!(loaded.get("example.com"), Some(&5_000));
    }

    #[test]
    fn test_load_filters_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::open(dir.path()).unwrap();

        store
            .save("client-a", &timers(&[("old.com", 500), ("new.com", 5_000)]))
            .unwrap();

        let loaded = store.load("client-a", 1_000).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("new.com"));
    }

    #[test]
    fn test_empty_save_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::open(dir.path()).unwrap();

        store
            .save("client-a", &timers(&[("example.com", 5_000)]))
            .unwrap();
        store.save("client-a", &BTreeMap::new()).unwrap();

        assert!(store.all(0).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::open(dir.path()).unwrap();

        store
            .save("client-a", &timers(&[("old.com", 500)]))
            .unwrap();
        store
            .save("client-b", &timers(&[("old.com", 500), ("new.com", 9_000)]))
            .unwrap();

        let rewritten = store.sweep(1_000).unwrap();
        assert_eq!(rewritten, 2);

        let all = store.all(1_000).unwrap();
        assert!(!all.contains_key("client-a"));
        assert_eq!(all["client-b"].len(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CooldownStore::open(dir.path()).unwrap();
            store
                .save("client-a", &timers(&[("example.com", 60_000)]))
                .unwrap();
        }

        let store = CooldownStore::open(dir.path()).unwrap();
        let loaded = store.load("client-a", 1_000).unwrap();
        assert_eq!(loaded.get("example.com"), Some(&60_000));
    }
}
