// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event-sourced cache over the bridge deposit box.
//!
//! Deposits are keyed by their content hash and created exactly once; a
//! deposit re-delivered by a retried range is ignored. The token whitelist
//! replays oldest to newest, so the mapping for an origin token is always
//! the most recent one observed on chain.

use crate::chain_reader::BridgeEventSource;
use crate::error::{ClientError, ClientResult};
use crate::metrics::BotMetrics;
use crate::poller::{PollPlan, PollingController};
use crate::reconciler::reconcile;
use crate::types::{Deposit, WhitelistEvent};
use ethers::types::{Address, H256};
use ethers::utils::to_checksum;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const CLIENT_LABEL: &str = "bridge_deposits";

#[derive(Debug, Clone)]
struct WhitelistEntry {
    l2_token: Address,
    /// Replay position of the event that wrote this entry.
    written_at: (u64, u64),
}

#[derive(Debug, Clone, Default)]
struct BridgeStateCache {
    deposits: Vec<Deposit>,
    by_hash: HashMap<H256, usize>,
    whitelist: HashMap<Address, WhitelistEntry>,
    seen_whitelist: std::collections::HashSet<(H256, u64)>,
}

pub struct BridgeDepositClient {
    sources: Vec<Arc<dyn BridgeEventSource>>,
    cache: BridgeStateCache,
    poller: PollingController,
    metrics: Arc<BotMetrics>,
}

impl BridgeDepositClient {
    pub fn new(
        sources: Vec<Arc<dyn BridgeEventSource>>,
        poller: PollingController,
        metrics: Arc<BotMetrics>,
    ) -> ClientResult<Self> {
        if sources.is_empty() {
            return Err(ClientError::Configuration(
                "BridgeDepositClient requires at least one event source".to_string(),
            ));
        }
        Ok(Self {
            sources,
            cache: BridgeStateCache::default(),
            poller,
            metrics,
        })
    }

    /// Poll new deposit and whitelist events. Same contract as the oracle
    /// client's `update`: no-op when caught up, watermark untouched on
    /// failure.
    pub async fn update(&mut self) -> ClientResult<()> {
        let result = self.update_inner().await;
        match &result {
            Ok(()) => {
                self.metrics
                    .update_cycles
                    .with_label_values(&[CLIENT_LABEL])
                    .inc();
            }
            Err(e) => {
                self.metrics
                    .update_cycle_errors
                    .with_label_values(&[CLIENT_LABEL, e.error_type()])
                    .inc();
                if matches!(e, ClientError::Divergence { .. }) {
                    self.metrics.provider_divergence_total.inc();
                }
            }
        }
        result
    }

    async fn update_inner(&mut self) -> ClientResult<()> {
        let canonical = &self.sources[0];
        let stamp = canonical.latest_block().await?;
        let now = stamp.timestamp;

        let (from_block, to_block, chunks) = match self.poller.begin(now, stamp.number) {
            PollPlan::Throttled { remaining_secs } => {
                debug!(
                    "[BridgeDepositClient] Throttled, {}s until next update",
                    remaining_secs
                );
                return Ok(());
            }
            PollPlan::UpToDate { next_from_block } => {
                debug!(
                    "[BridgeDepositClient] Up to date (next from block {}, head {})",
                    next_from_block, stamp.number
                );
                return Ok(());
            }
            PollPlan::Fetch {
                from_block,
                to_block,
                chunks,
            } => (from_block, to_block, chunks),
        };

        let mut deposits = Vec::new();
        let mut whitelists = Vec::new();
        for &(chunk_from, chunk_to) in &chunks {
            let (deposit_sets, whitelist_sets) = tokio::join!(
                join_all(
                    self.sources
                        .iter()
                        .map(|s| s.deposit_events(chunk_from, chunk_to))
                ),
                join_all(
                    self.sources
                        .iter()
                        .map(|s| s.whitelist_events(chunk_from, chunk_to))
                ),
            );
            deposits.extend(reconcile(
                "FundsDeposited",
                deposit_sets.into_iter().collect::<ClientResult<Vec<_>>>()?,
            )?);
            whitelists.extend(reconcile(
                "WhitelistToken",
                whitelist_sets
                    .into_iter()
                    .collect::<ClientResult<Vec<_>>>()?,
            )?);
        }

        let mut scratch = self.cache.clone();
        let new_deposits = Self::ingest_deposits(&mut scratch, deposits);
        let whitelist_writes = Self::ingest_whitelist(&mut scratch, whitelists);

        self.cache = scratch;
        self.poller.commit(to_block, now);

        self.metrics
            .tracked_deposits
            .set(self.cache.deposits.len() as i64);
        self.metrics
            .whitelisted_tokens
            .set(self.cache.whitelist.len() as i64);
        self.metrics
            .last_polled_block
            .with_label_values(&[CLIENT_LABEL])
            .set(to_block as i64);

        info!(
            "[BridgeDepositClient] Updated blocks {}-{}: {} new deposits, {} whitelist writes ({} deposits, {} mappings tracked)",
            from_block,
            to_block,
            new_deposits,
            whitelist_writes,
            self.cache.deposits.len(),
            self.cache.whitelist.len()
        );
        Ok(())
    }

    fn ingest_deposits(cache: &mut BridgeStateCache, mut deposits: Vec<Deposit>) -> usize {
        deposits.sort_by_key(|d| d.meta.replay_order());
        let mut added = 0;
        for deposit in deposits {
            let hash = deposit.deposit_hash();
            if cache.by_hash.contains_key(&hash) {
                // Already present; deposits are immutable, first sighting wins.
                continue;
            }
            debug!(
                "[BridgeDepositClient] New deposit {} (chain {}, id {}, recipient {})",
                hash,
                deposit.chain_id,
                deposit.deposit_id,
                to_checksum(&deposit.l1_recipient, None)
            );
            cache.by_hash.insert(hash, cache.deposits.len());
            cache.deposits.push(deposit);
            added += 1;
        }
        added
    }

    fn ingest_whitelist(cache: &mut BridgeStateCache, mut events: Vec<WhitelistEvent>) -> usize {
        events.sort_by_key(|e| e.meta.replay_order());
        let mut writes = 0;
        for event in events {
            if !cache
                .seen_whitelist
                .insert((event.meta.tx_hash, event.meta.log_index))
            {
                continue;
            }
            let written_at = event.meta.replay_order();
            let stale = cache
                .whitelist
                .get(&event.l1_token)
                .map(|existing| existing.written_at > written_at)
                .unwrap_or(false);
            // Last writer wins under oldest-to-newest replay.
            if !stale {
                cache.whitelist.insert(
                    event.l1_token,
                    WhitelistEntry {
                        l2_token: event.l2_token,
                        written_at,
                    },
                );
                writes += 1;
            }
        }
        writes
    }

    /// All tracked deposits in replay order.
    pub fn get_deposits(&self) -> Vec<Deposit> {
        self.cache.deposits.clone()
    }

    pub fn get_deposit_by_hash(&self, deposit_hash: &H256) -> Option<Deposit> {
        self.cache
            .by_hash
            .get(deposit_hash)
            .map(|&i| self.cache.deposits[i].clone())
    }

    /// Destination-chain token for an origin-chain token, if whitelisted.
    pub fn l2_token_for(&self, l1_token: &Address) -> Option<Address> {
        self.cache.whitelist.get(l1_token).map(|e| e.l2_token)
    }

    pub fn is_whitelisted(&self, l1_token: &Address) -> bool {
        self.cache.whitelist.contains_key(l1_token)
    }

    pub fn get_last_update_time(&self) -> Option<u64> {
        self.poller.last_update_time()
    }

    pub fn next_from_block(&self) -> u64 {
        self.poller.next_from_block()
    }
}
