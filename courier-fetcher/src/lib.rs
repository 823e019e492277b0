//! Courier Fetcher Library
//!
//! The worker side of the fetch pool. A fetcher polls the dispatcher for
//! work, performs the outbound HTTP call with a rotated User-Agent, and
//! POSTs the body back under the request's cache key. The dispatcher embeds
//! one of these as its local fetcher so it is never starved of workers; the
//! same loop runs standalone against a remote dispatcher (see `main.rs`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

pub mod agent;

/// Base interval for upstream retry backoff.
const RETRY_BASE: Duration = Duration::from_millis(750);

/// Linear backoff pause before the next upstream attempt.
fn backoff(attempts: u32) -> Duration {
    RETRY_BASE * attempts
}

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Dispatcher base URL
    pub dispatcher_url: String,
    /// Client id sent with every poll and delivery
    pub client_id: String,
    /// Sleep between polls when the dispatcher has nothing for us
    pub poll_interval: Duration,
    /// Wall-clock budget for one upstream fetch, retries included
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            dispatcher_url: "http://localhost:8600".to_string(),
            client_id: "fetcher".to_string(),
            poll_interval: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl FetcherConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dispatcher_url: std::env::var("COURIER_DISPATCHER_URL")
                .unwrap_or(defaults.dispatcher_url),
            client_id: std::env::var("COURIER_CLIENT_ID").unwrap_or(defaults.client_id),
            poll_interval: std::env::var("COURIER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            request_timeout: defaults.request_timeout,
        }
    }
}

/// Fetcher error types
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Dispatcher answered something other than work or 204
    #[error("dispatcher error: {0}")]
    Dispatcher(String),

    /// The upstream fetch ran out of its wall-clock budget
    #[error("upstream fetch exceeded its time budget")]
    Budget,

    /// Transport error talking to the dispatcher or upstream
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A work order handed out by the dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkOrder {
    /// Cache key to deliver the body back under
    pub key: String,
    /// URL to fetch
    pub href: String,
    /// Extra headers to send upstream
    pub headers: Option<HashMap<String, String>>,
    /// Eligible requests the dispatcher saw when it handed this out
    pub total: Option<u64>,
}

/// Polling fetch worker.
pub struct Fetcher {
    config: FetcherConfig,
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a new fetcher. Redirects are followed; the per-fetch timeout
    /// is applied per request from the remaining budget.
    pub fn new(config: FetcherConfig) -> Self {
        info!(
            dispatcher = %config.dispatcher_url,
            client_id = %config.client_id,
            "Creating fetcher"
        );
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Poll-and-fetch forever. Transport errors are logged and retried after
    /// the poll interval; nothing tears the loop down.
    pub async fn run(&self) {
        loop {
            match self.poll_once().await {
                // Had work: ask again right away, there may be more.
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "fetch cycle failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// One poll cycle. Returns true when a work order was processed.
    pub async fn poll_once(&self) -> Result<bool, FetchError> {
        let response = self
            .client
            .get(&self.config.dispatcher_url)
            .header("x-client-id", &self.config.client_id)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(FetchError::Dispatcher(format!(
                "poll returned {}",
                response.status()
            )));
        }

        let order: WorkOrder = response.json().await?;
        info!(key = %order.key, href = %order.href, total = ?order.total, "claimed fetch");

        let (status, body) = self.fetch_upstream(&order).await?;
        self.deliver(&order.key, status, body).await?;

        Ok(true)
    }

    /// Fetch the upstream URL within the wall-clock budget.
    ///
    /// Upstream 429/403 and body-read failures retry with a linear backoff
    /// of `attempts * 750 ms`; the budget is the only bound on attempts.
    #[instrument(skip(self, order), fields(href = %order.href))]
    async fn fetch_upstream(&self, order: &WorkOrder) -> Result<(u16, Bytes), FetchError> {
        let deadline = Instant::now() + self.config.request_timeout;
        let mut attempts: u32 = 0;

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return Err(FetchError::Budget);
            };

            let mut request = self
                .client
                .get(&order.href)
                .timeout(remaining)
                .header(USER_AGENT, agent::random_user_agent());
            if let Some(headers) = &order.headers {
                for (name, value) in headers {
                    request = request.header(name, value);
                }
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => return Err(FetchError::Budget),
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
                attempts += 1;
                let pause = backoff(attempts);
                if Instant::now() + pause >= deadline {
                    return Err(FetchError::Budget);
                }
                warn!(status = %status, attempts, "upstream throttled, backing off");
                tokio::time::sleep(pause).await;
                continue;
            }

            match response.bytes().await {
                Ok(body) => {
                    debug!(status = %status, bytes = body.len(), "upstream fetched");
                    return Ok((status.as_u16(), body));
                }
                // Body failed mid-read; the connection was likely cut, retry.
                Err(e) => {
                    attempts += 1;
                    let pause = backoff(attempts);
                    if Instant::now() + pause >= deadline {
                        return Err(FetchError::Budget);
                    }
                    warn!(error = %e, attempts, "upstream body failed, retrying");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    /// POST the fetched body back to the dispatcher.
    ///
    /// A 404 is routine: the request timed out while we fetched and another
    /// client delivered first, so the body is simply dropped.
    async fn deliver(&self, key: &str, status: u16, body: Bytes) -> Result<(), FetchError> {
        let url = format!(
            "{}/{}",
            self.config.dispatcher_url.trim_end_matches('/'),
            key
        );

        let response = self
            .client
            .post(&url)
            .header("x-client-id", &self.config.client_id)
            .header("x-status", status.to_string())
            .body(body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(key = %key, "request already answered elsewhere, body dropped");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(FetchError::Dispatcher(format!(
                "delivery returned {}",
                response.status()
            )));
        }

        debug!(key = %key, status, "body delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FetcherConfig::default();
        assert_eq!(config.dispatcher_url, "http://localhost:8600");
        assert_eq!(config.poll_interval, Duration::from_millis(1_000));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_is_linear() {
        assert_eq!(backoff(1), Duration::from_millis(750));
        assert_eq!(backoff(2), Duration::from_millis(1_500));
        assert_eq!(backoff(4), Duration::from_millis(3_000));
    }

    #[test]
    fn test_work_order_parses_without_optional_fields() {
        let order: WorkOrder =
            serde_json::from_str(r#"{"key":"example.com/abc","href":"https://example.com/x"}"#)
                .unwrap();
        assert_eq!(order.key, "example.com/abc");
        assert!(order.headers.is_none());
        assert!(order.total.is_none());
    }

    #[test]
    fn test_work_order_parses_full() {
        let order: WorkOrder = serde_json::from_str(
            r#"{"key":"example.com/abc","href":"https://example.com/x","headers":{"accept":"text/html"},"total":3}"#,
        )
        .unwrap();
        assert_eq!(order.headers.unwrap()["accept"], "text/html");
        assert_eq!(order.total, Some(3));
    }
}
