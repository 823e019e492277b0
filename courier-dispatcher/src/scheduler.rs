//! Dispatch scheduler.
//!
//! Picks the next eligible request for a polling client: the oldest request
//! across every queue whose cooldown has expired for that client. The
//! cooldown is stamped at dispatch time, not delivery time: that caps how
//! often any client is offered work from a queue regardless of whether the
//! previous work completed, which is the only rate limit the dispatcher can
//! enforce without trusting clients.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::cooldown::CooldownStore;
use crate::state::Core;

/// Work order handed to a fetcher client.
#[derive(Debug, Clone, Serialize)]
pub struct Dispatch {
    /// Cache key the client must deliver the body back under
    pub key: String,
    /// URL to fetch
    pub href: String,
    /// Extra headers to send upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Eligible requests observed during the scan, this one included
    pub total: usize,
}

/// Pick, claim and return the next request for `client_id`.
///
/// On a hit this stamps the queue's cooldown for the client, marks the
/// request dispatched (incrementing `attempts` on a re-dispatch) and bumps
/// the client's started count. The full-table scan happens under the core
/// lock and never suspends.
pub fn next_for(
    core: &mut Core,
    cooldowns: &CooldownStore,
    client_id: &str,
    now_ms: u64,
) -> Result<Option<Dispatch>, sled::Error> {
    let mut timers = cooldowns.load(client_id, now_ms)?;

    let mut total = 0usize;
    let mut best_key: Option<&str> = None;
    let mut best_created = None;
    for request in core.table.values() {
        if !request.is_eligible(now_ms) || timers.contains_key(&request.queue_name) {
            continue;
        }
        total += 1;
        if best_created.map_or(true, |created| request.created_at < created) {
            best_key = Some(&request.key);
            best_created = Some(request.created_at);
        }
    }

    let Some(key) = best_key.map(str::to_string) else {
        return Ok(None);
    };
    let Some(request) = core.table.get_mut(&key) else {
        return Ok(None);
    };

    let delay_ms = core
        .queues
        .get(&request.queue_name)
        .map(|q| q.delay_ms)
        .unwrap_or(crate::queues::DEFAULT_DELAY_MS);
    timers.insert(request.queue_name.clone(), now_ms + delay_ms);
    cooldowns.save(client_id, &timers)?;

    if request.started_at.is_some() {
        request.attempts += 1;
    }
    request.started_at = Some(now_ms);

    let client = core.clients.touch(client_id, now_ms);
    client.started += 1;

    debug!(
        key = %request.key,
        client = %client_id,
        attempts = request.attempts,
        total,
        "request dispatched"
    );

    Ok(Some(Dispatch {
        key: request.key.clone(),
        href: request.href.clone(),
        headers: request.headers.clone(),
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{PendingRequest, DISPATCH_TIMEOUT_MS};
    use std::time::{Duration, Instant};

    struct Fixture {
        core: Core,
        cooldowns: CooldownStore,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn fixture() -> Fixture {
        let cache_dir = tempfile::tempdir().unwrap();
        let timer_dir = tempfile::tempdir().unwrap();
        Fixture {
            core: Core::new(cache_dir.path()),
            cooldowns: CooldownStore::open(timer_dir.path()).unwrap(),
            _dirs: (cache_dir, timer_dir),
        }
    }

    fn enqueue(core: &mut Core, queue: &str, delay_ms: u64, key: &str, age: Duration) {
        core.queues.register(queue, delay_ms, &[]).unwrap();
        let mut request = PendingRequest::new(
            format!("{queue}/{key}"),
            format!("https://{queue}/{key}"),
            None,
            queue.to_string(),
        );
        request.created_at = Instant::now() - age;
        core.table.insert(request);
    }

    #[test]
    fn test_empty_table_yields_none() {
        let mut fx = fixture();
        let dispatch = next_for(&mut fx.core, &fx.cooldowns, "client-a", 1_000).unwrap();
        assert!(dispatch.is_none());
    }

    #[test]
    fn test_oldest_request_wins() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "a.com", 1_000, "young", Duration::from_millis(10));
        enqueue(&mut fx.core, "b.com", 1_000, "old", Duration::from_millis(500));

        let dispatch = next_for(&mut fx.core, &fx.cooldowns, "client-a", 1_000)
            .unwrap()
            .expect("a request is eligible");
        assert_eq!(dispatch.key, "b.com/old");
        assert_eq!(dispatch.total, 2);
    }

    #[test]
    fn test_cooldown_blocks_same_queue_until_expiry() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "q.com", 1_000, "one", Duration::from_millis(20));
        enqueue(&mut fx.core, "q.com", 1_000, "two", Duration::from_millis(10));

        let now = 50_000;
        let first = next_for(&mut fx.core, &fx.cooldowns, "client-a", now)
            .unwrap()
            .expect("first dispatch");
        assert_eq!(first.key, "q.com/one");

        // Same client, same queue, cooldown still running.
        let second = next_for(&mut fx.core, &fx.cooldowns, "client-a", now + 10).unwrap();
        assert!(second.is_none());

        // After the queue delay the other request is offered.
        let third = next_for(&mut fx.core, &fx.cooldowns, "client-a", now + 1_001)
            .unwrap()
            .expect("cooldown expired");
        assert_eq!(third.key, "q.com/two");
    }

    #[test]
    fn test_cooldown_is_per_client() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "q.com", 1_000, "one", Duration::from_millis(20));
        enqueue(&mut fx.core, "q.com", 1_000, "two", Duration::from_millis(10));

        let now = 50_000;
        next_for(&mut fx.core, &fx.cooldowns, "client-a", now)
            .unwrap()
            .expect("client-a dispatch");

        // A different client is not affected by client-a's cooldown.
        let other = next_for(&mut fx.core, &fx.cooldowns, "client-b", now + 1)
            .unwrap()
            .expect("client-b dispatch");
        assert_eq!(other.key, "q.com/two");
    }

    #[test]
    fn test_dispatched_request_not_reoffered_before_timeout() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "q.com", 10, "one", Duration::from_millis(20));

        let now = 50_000;
        next_for(&mut fx.core, &fx.cooldowns, "client-a", now)
            .unwrap()
            .expect("dispatch");

        // Queue cooldown (10 ms) has expired but the request itself is still
        // in flight for another ~10 s.
        let again = next_for(&mut fx.core, &fx.cooldowns, "client-a", now + 100).unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_timed_out_request_redispatches_and_counts_attempt() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "q.com", 10, "one", Duration::from_millis(20));

        let now = 50_000;
        next_for(&mut fx.core, &fx.cooldowns, "client-a", now)
            .unwrap()
            .expect("first dispatch");

        let later = now + DISPATCH_TIMEOUT_MS + 1_000;
        let redispatch = next_for(&mut fx.core, &fx.cooldowns, "client-b", later)
            .unwrap()
            .expect("timed-out request is eligible again");
        assert_eq!(redispatch.key, "q.com/one");

        let request = fx.core.table.get("q.com/one").unwrap();
        assert_eq!(request.attempts, 1);
        assert_eq!(request.started_at, Some(later));
    }

    #[test]
    fn test_dispatch_stamps_cooldown_and_bookkeeping() {
        let mut fx = fixture();
        enqueue(&mut fx.core, "q.com", 1_000, "one", Duration::from_millis(20));

        let now = 50_000;
        next_for(&mut fx.core, &fx.cooldowns, "client-a", now)
            .unwrap()
            .expect("dispatch");

        let timers = fx.cooldowns.load("client-a", now).unwrap();
        assert_eq!(timers.get("q.com"), Some(&(now + 1_000)));

        let clients = fx.core.clients.snapshot();
        assert_eq!(clients["client-a"].started, 1);
        assert_eq!(clients["client-a"].active_at, now);
    }
}
