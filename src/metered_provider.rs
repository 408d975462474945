// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP JSON-RPC provider instrumented with prometheus counters and guarded
//! against rate limits: bounded request concurrency, a minimum inter-request
//! delay, and exponential backoff on rate-limit responses.

use crate::metrics::BotMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::{ParseError, Url};

/// Minimum delay between requests to a single endpoint (in milliseconds).
const MIN_REQUEST_DELAY_MS: u64 = 250;

/// Maximum in-flight requests per endpoint.
const MAX_CONCURRENT_REQUESTS: usize = 4;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    metrics: Arc<BotMetrics>,
    semaphore: Arc<tokio::sync::Semaphore>,
    last_request_time: Arc<Mutex<Instant>>,
}

#[async_trait::async_trait]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is never closed while the provider is alive.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("Semaphore should never be closed");

        // Enforce the minimum delay between requests.
        let mut last_request = self.last_request_time.lock().await;
        let elapsed = Instant::now().saturating_duration_since(*last_request);
        if elapsed.as_millis() < MIN_REQUEST_DELAY_MS as u128 {
            tokio::time::sleep(Duration::from_millis(MIN_REQUEST_DELAY_MS) - elapsed).await;
        }
        *last_request = Instant::now();
        drop(last_request);

        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;

        while retry_count < MAX_RATE_LIMIT_RETRIES {
            // Some gateways answer rate limits with non-standard JSON-RPC
            // bodies that surface as deserialization errors, so the error
            // text is inspected rather than the error variant.
            let is_rate_limit = match &result {
                Err(e) => {
                    let text = format!("{:?}", e).to_lowercase();
                    text.contains("rate limit")
                        || text.contains("429")
                        || text.contains("too many requests")
                        || text.contains("quota exceeded")
                        || text.contains("-32005")
                }
                Ok(_) => false,
            };
            if !is_rate_limit {
                break;
            }

            let backoff_duration = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                "Rate limit from provider, retrying after {:?} (attempt {}/{})",
                backoff_duration,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(backoff_duration).await;

            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        match &result {
            Ok(_) => self.metrics.eth_node_connected.set(1),
            Err(_) => self.metrics.eth_node_connected.set(0),
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(url: impl Into<Url>, metrics: Arc<BotMetrics>) -> Self {
        Self {
            inner: Http::new(url),
            metrics,
            semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            last_request_time: Arc::new(Mutex::new(
                Instant::now() - Duration::from_millis(MIN_REQUEST_DELAY_MS),
            )),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    metrics: Arc<BotMetrics>,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, metrics);
    Ok(Provider::new(http_provider))
}
