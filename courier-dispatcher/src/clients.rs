//! Per-client bookkeeping.

use std::collections::HashMap;

use serde::Serialize;

/// Counters for one fetcher client, keyed by its id.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Epoch millis of the client's last dispatch or delivery
    pub active_at: u64,
    /// Requests handed to this client
    pub started: u64,
    /// Responses this client delivered
    pub finished: u64,
}

/// In-memory table of every client seen since startup.
#[derive(Default)]
pub struct ClientTable {
    clients: HashMap<String, ClientInfo>,
}

impl ClientTable {
    /// Get or create the client's entry, refreshing its activity timestamp.
    pub fn touch(&mut self, client_id: &str, now_ms: u64) -> &mut ClientInfo {
        let info = self.clients.entry(client_id.to_string()).or_default();
        info.active_at = now_ms;
        info
    }

    /// Snapshot for the status endpoint.
    pub fn snapshot(&self) -> HashMap<String, ClientInfo> {
        self.clients.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_creates_and_updates() {
        let mut table = ClientTable::default();

        table.touch("client-a", 1_000).started += 1;
        table.touch("client-a", 2_000).finished += 1;

        let snapshot = table.snapshot();
        let info = &snapshot["client-a"];
        assert_eq!(info.active_at, 2_000);
        assert_eq!(info.started, 1);
        assert_eq!(info.finished, 1);
    }
}
