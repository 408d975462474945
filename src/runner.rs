// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Poll loops driving the clients.
//!
//! One task per client, serializing `update()` calls so a client never sees
//! overlapping cycles. A failed cycle is logged and dropped; the watermark
//! semantics of the clients guarantee the failed range is refetched on the
//! next tick, so the loop itself never retries inline.

use crate::bridge_client::BridgeDepositClient;
use crate::error::{ClientError, ClientResult};
use crate::oracle_client::OptimisticOracleClient;
use crate::price_feed::feed::JsonApiPriceFeed;
use crate::price_feed::PriceFeed;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Anything the poll loop can drive.
#[async_trait]
pub trait UpdatableClient: Send {
    fn name(&self) -> &str;

    async fn update(&mut self) -> ClientResult<()>;
}

#[async_trait]
impl UpdatableClient for OptimisticOracleClient {
    fn name(&self) -> &str {
        "OptimisticOracleClient"
    }

    async fn update(&mut self) -> ClientResult<()> {
        OptimisticOracleClient::update(self).await
    }
}

#[async_trait]
impl UpdatableClient for BridgeDepositClient {
    fn name(&self) -> &str {
        "BridgeDepositClient"
    }

    async fn update(&mut self) -> ClientResult<()> {
        BridgeDepositClient::update(self).await
    }
}

#[async_trait]
impl UpdatableClient for JsonApiPriceFeed {
    fn name(&self) -> &str {
        self.label()
    }

    async fn update(&mut self) -> ClientResult<()> {
        PriceFeed::update(self).await
    }
}

/// Spawn the poll loop for one client.
pub fn spawn_update_loop<C>(
    mut client: C,
    polling_delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    C: UpdatableClient + 'static,
{
    tokio::spawn(async move {
        info!(
            "[{}] Starting update loop (every {:?})",
            client.name(),
            polling_delay
        );
        let mut interval = time::interval(polling_delay);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Update loop cancelled", client.name());
                    break;
                }
                _ = interval.tick() => {
                    match client.update().await {
                        Ok(()) => {}
                        Err(e @ ClientError::Divergence { .. }) => {
                            // The cache kept its last-good state, but blind
                            // retries will not fix a lossy endpoint.
                            error!(
                                "[{}] Provider divergence, operator attention required: {}",
                                client.name(),
                                e
                            );
                        }
                        Err(e) => {
                            error!(
                                "[{}] Update cycle failed (will retry next tick): {:?}",
                                client.name(),
                                e
                            );
                        }
                    }
                }
            }
        }
    })
}
