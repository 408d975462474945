// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Off-chain bots and clients for optimistic-oracle financial contracts:
//! an event-sourced cache over oracle price requests, a cross-chain deposit
//! cache, redundant-provider reconciliation, a family of external-API price
//! feeds, a wallet-balance watchdog, and an externally-signed transaction
//! path.

pub mod abi;
pub mod balance_alarm;
pub mod bridge_client;
pub mod chain_reader;
pub mod config;
pub mod correlator;
pub mod error;
pub mod kms_signer;
pub mod metered_provider;
pub mod metrics;
pub mod metrics_push;
pub mod oracle_client;
pub mod poller;
pub mod price_feed;
pub mod reconciler;
pub mod runner;
pub mod state_cache;
pub mod types;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 60, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // Every error is treated as transient so the retry runs until max_elapsed_time
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
