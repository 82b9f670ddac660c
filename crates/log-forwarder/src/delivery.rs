// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::ForwarderConfig;
use crate::record::LogBatch;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transmits an assembled batch to the collector. The scheduler only
/// depends on this seam, so tests can swap in a recording transport.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send(&self, batch: LogBatch);
}

/// HTTP delivery with bounded, linearly backed-off retries.
///
/// Delivery failures are reported through `tracing` and never through
/// the intercepted channel; a terminally failed batch is dropped, not
/// re-queued. At-most-once, best-effort by design.
pub struct HttpTransport {
    config: Arc<RwLock<ForwarderConfig>>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: Arc<RwLock<ForwarderConfig>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Unable to build delivery HTTP client: {e}, using defaults");
                reqwest::Client::new()
            });
        HttpTransport { config, client }
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn send(&self, batch: LogBatch) {
        let (enabled, server_url, max_retries, backoff_base) = {
            #[allow(clippy::expect_used)]
            let config = self.config.read().expect("lock poisoned");
            (
                config.enabled,
                config.server_url.clone(),
                config.max_retries,
                config.retry_backoff_base,
            )
        };
        if !enabled || batch.messages.is_empty() {
            return;
        }

        // Serialized once: retries resend the same payload under the
        // same batch id.
        let payload = match serde_json::to_string(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize batch {}, dropping it: {e}", batch.batch_id);
                return;
            }
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let response = self
                .client
                .post(&server_url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
                .send()
                .await;

            match response {
                Ok(r) if r.status().is_success() => {
                    debug!(
                        "Delivered batch {} ({} records) on attempt {}",
                        batch.batch_id,
                        batch.messages.len(),
                        attempts
                    );
                    return;
                }
                Ok(r) => {
                    error!(
                        "Collector rejected batch {} with status {} (attempt {})",
                        batch.batch_id,
                        r.status(),
                        attempts
                    );
                }
                Err(e) => {
                    error!(
                        "Network error delivering batch {} (attempt {}): {e}",
                        batch.batch_id, attempts
                    );
                }
            }

            if attempts >= max_retries {
                error!(
                    "Dropping batch {} ({} records) after {} attempts",
                    batch.batch_id,
                    batch.messages.len(),
                    attempts
                );
                return;
            }
            // Linear backoff: attempt number times the base unit.
            tokio::time::sleep(backoff_base * attempts).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{ForwarderConfig, Profile};
    use crate::record::{now_rfc3339, LogLevel, LogRecord};

    fn test_config(server_url: String) -> Arc<RwLock<ForwarderConfig>> {
        let mut config = ForwarderConfig::for_profile(Profile::Interactive);
        config.server_url = server_url;
        config.max_retries = 3;
        config.retry_backoff_base = Duration::from_millis(10);
        Arc::new(RwLock::new(config))
    }

    fn test_batch(n: usize) -> LogBatch {
        let records = (0..n)
            .map(|i| LogRecord {
                level: LogLevel::Info,
                message: format!("message {i}"),
                timestamp: now_rfc3339(),
                source: None,
                url: None,
                user_agent: None,
                session_id: None,
                args: None,
            })
            .collect();
        LogBatch::new(records)
    }

    #[tokio::test]
    async fn test_successful_delivery_sends_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body("Log received")
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(test_config(format!("{}/log", server.url())));
        transport.send(test_batch(2)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_delivery_retries_max_retries_total_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let transport = HttpTransport::new(test_config(format!("{}/log", server.url())));
        transport.send(test_batch(1)).await;

        // exactly max_retries attempts, then the batch is dropped
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retries_resend_the_same_batch_id() {
        let batch = test_batch(1);
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log")
            .match_body(mockito::Matcher::Regex(batch.batch_id.clone()))
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let config = test_config(format!("{}/log", server.url()));
        config.write().unwrap().max_retries = 2;
        let transport = HttpTransport::new(config);
        transport.send(batch).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_disabled_config_is_a_no_op() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log")
            .expect(0)
            .create_async()
            .await;

        let config = test_config(format!("{}/log", server.url()));
        config.write().unwrap().enabled = false;
        let transport = HttpTransport::new(config);
        transport.send(test_batch(1)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/log")
            .expect(0)
            .create_async()
            .await;

        let transport = HttpTransport::new(test_config(format!("{}/log", server.url())));
        transport.send(LogBatch::new(Vec::new())).await;

        mock.assert_async().await;
    }
}
