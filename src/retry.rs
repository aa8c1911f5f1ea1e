//! Backoff for node-to-node HTTP calls.

use anyhow::Result;
use std::time::Duration;

const INITIAL_DELAY_MS: u64 = 150;
const MAX_DELAY_MS: u64 = 1200;
const JITTER_MS: u64 = 50;

/// Sends the request built by `build` until one attempt gets a response.
///
/// Only transport failures are retried; any HTTP status is returned to the caller.
/// The delay starts at 150 ms and doubles up to 1200 ms, plus up to 50 ms of jitter.
pub async fn send_with_retry<F>(attempts: usize, mut build: F) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut delay_ms = INITIAL_DELAY_MS;

    for attempt in 0..attempts {
        match build().send().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt + 1 == attempts {
                    return Err(anyhow::anyhow!(e));
                }
                let jitter = rand::random::<u64>() % JITTER_MS;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}
