//! Webhook delivery.
//!
//! A webhook waiter gets the fetched body POSTed to its URL. Any recipient
//! response other than 500 is terminal; a 500 means "try me again later" and
//! triggers a linear backoff of `attempts * 750 ms`, capped at
//! [`MAX_ATTEMPTS`]. Transport errors consume attempts under the same
//! backoff.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

/// Base interval for the retry backoff.
const RETRY_BASE: Duration = Duration::from_millis(750);

/// Delivery attempts before the webhook is abandoned.
const MAX_ATTEMPTS: u32 = 8;

/// POST the fetched body to a webhook URL, retrying recipient 500s.
///
/// Runs detached from the delivering request; the delivery ack never waits
/// on webhook recipients.
#[instrument(skip(client, body), fields(key = %key))]
pub async fn deliver(
    client: reqwest::Client,
    url: String,
    key: String,
    href: String,
    status: u16,
    body: Bytes,
) {
    for attempt in 1..=MAX_ATTEMPTS {
        let result = client
            .post(&url)
            .header("x-request-key", &key)
            .header("x-request-href", &href)
            .header("x-request-status", status.to_string())
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(response) if response.status().as_u16() != 500 => {
                debug!(url = %url, status = %response.status(), attempt, "webhook delivered");
                return;
            }
            Ok(_) => {
                warn!(url = %url, attempt, "webhook recipient returned 500");
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "webhook delivery failed");
            }
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_BASE * attempt).await;
        }
    }

    warn!(url = %url, "webhook abandoned after {MAX_ATTEMPTS} attempts");
}
