//! Flat text codec for per-client cooldown timers.
//!
//! A client's timers are stored as one comma-separated sequence of
//! alternating `queue_name, unlock_at_ms` tokens, e.g.
//! `example.com,1712000000000,other.org,1712000005000`. The format has zero
//! schema cost across restarts; the periodic sweep keeps it from growing.

use std::collections::BTreeMap;

/// Encode a timer map. An empty map encodes to the empty string.
pub fn encode(timers: &BTreeMap<String, u64>) -> String {
    let mut out = String::new();
    for (queue, unlock_at) in timers {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(queue);
        out.push(',');
        out.push_str(&unlock_at.to_string());
    }
    out
}

/// Decode a timer string, dropping entries already unlocked at `now_ms`.
///
/// Tolerates truncated pairs, empty queue names and missing or zero
/// timestamps; anything unusable is silently dropped.
pub fn decode(raw: &str, now_ms: u64) -> BTreeMap<String, u64> {
    let mut timers = BTreeMap::new();
    let mut tokens = raw.split(',');
    while let Some(queue) = tokens.next() {
        let unlock_at = tokens
            .next()
            .and_then(|t| t.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if queue.is_empty() || unlock_at <= now_ms {
            continue;
        }
        timers.insert(queue.to_string(), unlock_at);
    }
    timers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_map_encodes_to_empty_string() {
        assert_eq!(encode(&BTreeMap::new()), "");
        assert!(decode("", 0).is_empty());
    }

    #[test]
    fn test_round_trip_keeps_live_entries() {
        let mut timers = BTreeMap::new();
        timers.insert("example.com".to_string(), 2_000);
        timers.insert("other.org".to_string(), 3_000);

        let decoded = decode(&encode(&timers), 1_000);
        assert_eq!(decoded, timers);
    }

    #[test]
    fn test_round_trip_drops_only_expired() {
        let mut timers = BTreeMap::new();
        timers.insert("expired.com".to_string(), 500);
        timers.insert("live.com".to_string(), 5_000);

        let decoded = decode(&encode(&timers), 1_000);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("live.com"), Some(&5_000));
    }

    #[test]
    fn test_unlock_at_equal_now_is_expired() {
        let decoded = decode("example.com,1000", 1_000);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_tolerates_truncated_pair() {
        let decoded = decode("example.com,2000,dangling", 1_000);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("example.com"), Some(&2_000));
    }

    #[test]
    fn test_tolerates_garbage_values() {
        let decoded = decode("a.com,not-a-number,b.com,0,c.com,2000", 1_000);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("c.com"), Some(&2_000));
    }
}
