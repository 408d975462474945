// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic metrics push to a Prometheus Pushgateway.

use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for metrics push
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsPushConfig {
    /// Push interval in seconds (default: 60)
    #[serde(default = "default_push_interval")]
    pub push_interval_seconds: u64,
    /// Push gateway URL (e.g., "http://pushgateway:9091/metrics/job/oracle-bots")
    pub push_url: String,
    /// Optional username for Basic Auth
    #[serde(default)]
    pub auth_username: Option<String>,
    /// Password for Basic Auth (required if username is set)
    #[serde(default)]
    pub auth_password: String,
}

fn default_push_interval() -> u64 {
    60
}

/// Starts a background task that periodically pushes the registry's metrics.
/// Returns `None` (and logs) when the push URL is empty.
pub fn start_metrics_push_task(
    config: MetricsPushConfig,
    registry: Registry,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if config.push_url.is_empty() {
        warn!("Metrics push URL is empty, skipping metrics push task");
        return None;
    }

    let interval = Duration::from_secs(config.push_interval_seconds);
    let client = reqwest::Client::new();

    Some(tokio::spawn(async move {
        info!(
            push_url = %config.push_url,
            interval = ?interval,
            "Started metrics push task"
        );

        let mut interval_timer = tokio::time::interval(interval);
        interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Metrics push task cancelled");
                    break;
                }
                _ = interval_timer.tick() => {
                    if let Err(e) = push_once(&client, &config, &registry).await {
                        warn!("Metrics push failed: {}", e);
                    }
                }
            }
        }
    }))
}

async fn push_once(
    client: &reqwest::Client,
    config: &MetricsPushConfig,
    registry: &Registry,
) -> anyhow::Result<()> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;

    let mut request = client
        .post(&config.push_url)
        .header("Content-Type", encoder.format_type().to_string())
        .body(buffer);
    if let Some(username) = &config.auth_username {
        request = request.basic_auth(username, Some(&config.auth_password));
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        anyhow::bail!("push gateway returned {}", response.status());
    }
    Ok(())
}
