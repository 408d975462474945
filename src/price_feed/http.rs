// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Thin JSON-over-HTTP fetcher used by the price feeds. No retry or backoff
//! at this layer; failures propagate and the feed retries on its next
//! scheduled update.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait HttpJsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> ClientResult<serde_json::Value>;
}

pub struct ReqwestJsonFetcher {
    client: reqwest::Client,
}

impl ReqwestJsonFetcher {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpJsonFetcher for ReqwestJsonFetcher {
    async fn get_json(&self, url: &str) -> ClientResult<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("http get failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::TransientProviderError(format!(
                "http status {} from {}",
                status, url
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ClientError::MalformedResponse(format!("invalid json body: {}", e)))
    }
}
