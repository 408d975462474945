// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! External-API price feeds.
//!
//! Every provider variant sits behind the one `PriceFeed` trait; provider
//! differences (URL shape, response parsing) are confined to
//! [`sources::PriceSource`], and the shared mechanics (update throttling,
//! retained history, nearest-prior-point lookup, decimal scaling) live here
//! and in [`feed::JsonApiPriceFeed`].

pub mod feed;
pub mod http;
pub mod sources;

pub use feed::JsonApiPriceFeed;
pub use http::{HttpJsonFetcher, ReqwestJsonFetcher};
pub use sources::PriceSource;

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use ethers::types::U256;
use std::collections::BTreeMap;

/// Uniform surface over every price-feed variant.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Refresh from the upstream API. A no-op when called again before the
    /// feed's minimum update interval (bounds the external call rate).
    async fn update(&mut self) -> ClientResult<()>;

    /// Most recent price, or `None` before the first completed update.
    fn get_current_price(&self) -> Option<Decimal>;

    /// Price at `timestamp`: the nearest retained point at or before it.
    /// Errors when the feed has never updated or `timestamp` precedes the
    /// retained lookback window.
    fn get_historical_price(&self, timestamp: u64) -> ClientResult<Decimal>;

    fn get_last_update_time(&self) -> Option<u64>;
}

/// Injected time source so feeds never reach for ambient wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Time-ordered price points bounded by a lookback horizon.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    points: BTreeMap<u64, Decimal>,
    lookback_secs: u64,
}

impl HistoryWindow {
    pub fn new(lookback_secs: u64) -> Self {
        Self {
            points: BTreeMap::new(),
            lookback_secs,
        }
    }

    pub fn insert(&mut self, timestamp: u64, price: Decimal) {
        self.points.insert(timestamp, price);
    }

    /// Drop points older than the lookback horizon relative to `now`.
    pub fn prune(&mut self, now: u64) {
        let horizon = now.saturating_sub(self.lookback_secs);
        self.points = self.points.split_off(&horizon);
    }

    /// Nearest point at or before `timestamp`.
    pub fn nearest_prior(&self, timestamp: u64) -> Option<(u64, Decimal)> {
        self.points
            .range(..=timestamp)
            .next_back()
            .map(|(&t, &p)| (t, p))
    }

    pub fn latest(&self) -> Option<(u64, Decimal)> {
        self.points.iter().next_back().map(|(&t, &p)| (t, p))
    }

    pub fn earliest_timestamp(&self) -> Option<u64> {
        self.points.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Convert a feed price into an unsigned fixed-point integer with the given
/// number of decimals (the representation oracle contracts consume).
pub fn decimal_to_fixed(price: Decimal, decimals: u32) -> ClientResult<U256> {
    if price.is_sign_negative() {
        return Err(ClientError::Generic(format!(
            "cannot convert negative price {} to unsigned fixed point",
            price
        )));
    }
    let scale = Decimal::from(10u64.pow(decimals.min(19)));
    let scaled = (price * scale).trunc();
    let as_u128 = scaled.to_u128().ok_or_else(|| {
        ClientError::Generic(format!("scaled price {} out of range", scaled))
    })?;
    Ok(U256::from(as_u128))
}
