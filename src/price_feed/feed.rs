// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The one concrete feed implementation driving every provider variant.

use super::http::HttpJsonFetcher;
use super::sources::PriceSource;
use super::{Clock, HistoryWindow, PriceFeed};
use crate::error::{ClientError, ClientResult};
use crate::metrics::BotMetrics;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub struct JsonApiPriceFeed {
    source: PriceSource,
    fetcher: Arc<dyn HttpJsonFetcher>,
    clock: Arc<dyn Clock>,
    api_key: Option<String>,
    /// How far back history is retained and fetched.
    lookback_secs: u64,
    /// Minimum seconds between upstream fetches.
    min_time_between_updates: u64,
    window: HistoryWindow,
    last_update_time: Option<u64>,
    metrics: Arc<BotMetrics>,
    label: String,
}

impl JsonApiPriceFeed {
    pub fn new(
        source: PriceSource,
        fetcher: Arc<dyn HttpJsonFetcher>,
        clock: Arc<dyn Clock>,
        api_key: Option<String>,
        lookback_secs: u64,
        min_time_between_updates: u64,
        metrics: Arc<BotMetrics>,
    ) -> ClientResult<Self> {
        if lookback_secs == 0 {
            return Err(ClientError::Configuration(
                "price feed lookback must be positive".to_string(),
            ));
        }
        let label = source.to_string();
        Ok(Self {
            source,
            fetcher,
            clock,
            api_key,
            lookback_secs,
            min_time_between_updates,
            window: HistoryWindow::new(lookback_secs),
            last_update_time: None,
            metrics,
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl PriceFeed for JsonApiPriceFeed {
    async fn update(&mut self) -> ClientResult<()> {
        let now = self.clock.now();
        if let Some(last) = self.last_update_time {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.min_time_between_updates {
                debug!(
                    "[PriceFeed {}] Throttled, {}s until next update",
                    self.label,
                    self.min_time_between_updates - elapsed
                );
                return Ok(());
            }
        }

        let from = now.saturating_sub(self.lookback_secs);
        let url = self.source.request_url(self.api_key.as_deref(), from, now);
        let body = self.fetcher.get_json(&url).await?;
        let points = self.source.parse(&body)?;

        if points.is_empty() && self.window.is_empty() {
            // The first fetch covers the whole lookback window, which lies
            // in the past; a well-formed body with nothing in it means the
            // upstream is not serving the data it should have.
            return Err(ClientError::MalformedResponse(format!(
                "{}: no data points for historical window {}..{}",
                self.label, from, now
            )));
        }
        if points.is_empty() {
            // A current partial period may legitimately have no row yet.
            debug!("[PriceFeed {}] No new points this cycle", self.label);
        }

        let added = points.len();
        for (timestamp, price) in points {
            self.window.insert(timestamp, price);
        }
        self.window.prune(now);
        self.last_update_time = Some(now);

        self.metrics
            .price_feed_updates
            .with_label_values(&[&self.label])
            .inc();
        if let Some((_, latest)) = self.window.latest() {
            if let Some(value) = latest.to_f64() {
                self.metrics
                    .price_feed_last_price
                    .with_label_values(&[&self.label])
                    .set(value);
            }
        }

        info!(
            "[PriceFeed {}] Updated: {} points fetched, {} retained, latest {:?}",
            self.label,
            added,
            self.window.len(),
            self.window.latest().map(|(_, p)| p)
        );
        Ok(())
    }

    fn get_current_price(&self) -> Option<Decimal> {
        self.window.latest().map(|(_, price)| price)
    }

    fn get_historical_price(&self, timestamp: u64) -> ClientResult<Decimal> {
        if self.last_update_time.is_none() {
            return Err(ClientError::FeedNeverUpdated);
        }
        self.window
            .nearest_prior(timestamp)
            .map(|(_, price)| price)
            .ok_or(ClientError::PriceHistoryUnavailable {
                requested: timestamp,
                earliest: self.window.earliest_timestamp(),
            })
    }

    fn get_last_update_time(&self) -> Option<u64> {
        self.last_update_time
    }
}
