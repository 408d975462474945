// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event-sourced cache over the optimistic oracle.
//!
//! `update()` polls request/proposal/dispute events from every configured
//! provider, reconciles the redundant sets, accumulates them idempotently,
//! and recomputes the lifecycle buckets against the contract's own clock.
//! Getters are synchronous reads of the last fully reconciled view.
//!
//! One instance owns its cache and cursor. Callers must serialize calls to
//! `update()` (the poll loop in `runner` does); overlapping calls against
//! the same instance are prevented by `&mut self` rather than any internal
//! lock.

use crate::chain_reader::{OracleEventSource, PriceResolver};
use crate::correlator::{correlate, settleable_disputes};
use crate::error::{ClientError, ClientResult};
use crate::metrics::BotMetrics;
use crate::poller::{PollPlan, PollingController};
use crate::reconciler::reconcile;
use crate::state_cache::OracleStateCache;
use crate::types::{
    CorrelationKey, DisputeEvent, PriceProposal, PriceRequest, ProposalEvent, RequestEvent,
    SettleableDispute,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

const CLIENT_LABEL: &str = "optimistic_oracle";

pub struct OptimisticOracleClient {
    sources: Vec<Arc<dyn OracleEventSource>>,
    resolver: Arc<dyn PriceResolver>,
    cache: OracleStateCache,
    poller: PollingController,
    metrics: Arc<BotMetrics>,
}

impl OptimisticOracleClient {
    pub fn new(
        sources: Vec<Arc<dyn OracleEventSource>>,
        resolver: Arc<dyn PriceResolver>,
        poller: PollingController,
        metrics: Arc<BotMetrics>,
    ) -> ClientResult<Self> {
        if sources.is_empty() {
            return Err(ClientError::Configuration(
                "OptimisticOracleClient requires at least one event source".to_string(),
            ));
        }
        Ok(Self {
            sources,
            resolver,
            cache: OracleStateCache::new(),
            poller,
            metrics,
        })
    }

    /// Poll new events and rebuild the derived view. Idempotent and safe to
    /// call repeatedly; a no-op when throttled or already caught up. On any
    /// failure the watermark and the cached view are left untouched, so the
    /// next call retries the same range.
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
                    "[OptimisticOracleClient] Throttled, {}s until next update",
                    remaining_secs
                );
                return Ok(());
            }
            PollPlan::UpToDate { next_from_block } => {
                debug!(
                    "[OptimisticOracleClient] Up to date (next from block {}, head {})",
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

        // Fan out the contract clock read with the event fetches; the
        // correlation pass does not start until everything has resolved.
        let this = &*self;
        let (current_time, fetched) = {
            let (time_res, fetch_res) =
                tokio::join!(canonical.oracle_time(), this.fetch_chunks(&chunks));
            (time_res?, fetch_res?)
        };
        let (requests, proposals, disputes) = fetched;

        // Build the next view on a scratch copy; the live cache and cursor
        // are only replaced once the whole cycle has succeeded.
        let mut scratch = self.cache.clone();
        let new_requests = scratch.ingest_requests(requests);
        let new_proposals = scratch.ingest_proposals(proposals);
        let new_disputes = scratch.ingest_disputes(disputes);

        let buckets = correlate(
            scratch.requests(),
            scratch.proposals(),
            scratch.disputes(),
            current_time,
        );
        let settleable = settleable_disputes(scratch.disputes(), self.resolver.as_ref()).await;
        scratch.apply(buckets, settleable);

        self.cache = scratch;
        self.poller.commit(to_block, now);

        let (unproposed, active, expired, settleable_len) = self.cache.bucket_sizes();
        self.metrics.unproposed_requests.set(unproposed as i64);
        self.metrics.undisputed_proposals.set(active as i64);
        self.metrics.expired_proposals.set(expired as i64);
        self.metrics.settleable_disputes.set(settleable_len as i64);
        self.metrics
            .last_polled_block
            .with_label_values(&[CLIENT_LABEL])
            .set(to_block as i64);

        info!(
            "[OptimisticOracleClient] Updated blocks {}-{}: {} new requests, {} new proposals, {} new disputes (unproposed={}, active={}, expired={}, settleable={})",
            from_block,
            to_block,
            new_requests,
            new_proposals,
            new_disputes,
            unproposed,
            active,
            expired,
            settleable_len
        );
        Ok(())
    }

    async fn fetch_chunks(
        &self,
        chunks: &[(u64, u64)],
    ) -> ClientResult<(Vec<RequestEvent>, Vec<ProposalEvent>, Vec<DisputeEvent>)> {
        let mut requests = Vec::new();
        let mut proposals = Vec::new();
        let mut disputes = Vec::new();
        for &(from_block, to_block) in chunks {
            let (req_sets, prop_sets, disp_sets) = tokio::join!(
                join_all(
                    self.sources
                        .iter()
                        .map(|s| s.request_events(from_block, to_block))
                ),
                join_all(
                    self.sources
                        .iter()
                        .map(|s| s.proposal_events(from_block, to_block))
                ),
                join_all(
                    self.sources
                        .iter()
                        .map(|s| s.dispute_events(from_block, to_block))
                ),
            );
            requests.extend(reconcile(
                "RequestPrice",
                req_sets.into_iter().collect::<ClientResult<Vec<_>>>()?,
            )?);
            proposals.extend(reconcile(
                "ProposePrice",
                prop_sets.into_iter().collect::<ClientResult<Vec<_>>>()?,
            )?);
            disputes.extend(reconcile(
                "DisputePrice",
                disp_sets.into_iter().collect::<ClientResult<Vec<_>>>()?,
            )?);
        }
        Ok((requests, proposals, disputes))
    }

    pub fn get_unproposed_requests(&self) -> Vec<PriceRequest> {
        self.cache.unproposed_requests()
    }

    pub fn get_undisputed_proposals(&self) -> Vec<PriceProposal> {
        self.cache.undisputed_proposals()
    }

    pub fn get_expired_proposals(&self, filter: Option<&CorrelationKey>) -> Vec<PriceProposal> {
        self.cache.expired_proposals(filter)
    }

    pub fn get_settleable_disputes(
        &self,
        filter: Option<&CorrelationKey>,
    ) -> Vec<SettleableDispute> {
        self.cache.settleable_disputes(filter)
    }

    /// Contract time of the last successful update, if any.
    pub fn get_last_update_time(&self) -> Option<u64> {
        self.poller.last_update_time()
    }

    /// Next block the poller will fetch (inclusive).
    pub fn next_from_block(&self) -> u64 {
        self.poller.next_from_block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_reader::BlockStamp;
    use crate::types::{EventMeta, Identifier, SettlementState};
    use async_trait::async_trait;
    use ethers::types::{Address, Bytes, H256, I256, U256};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory event source: events tagged with block numbers, a movable
    /// chain head, and a failure switch for the dispute fetch.
    #[derive(Default)]
    struct FakeSource {
        head: Mutex<BlockStamp>,
        requests: Mutex<Vec<RequestEvent>>,
        proposals: Mutex<Vec<ProposalEvent>>,
        disputes: Mutex<Vec<DisputeEvent>>,
        oracle_time: Mutex<u64>,
        fail_disputes: AtomicBool,
        /// Block ranges requested from this source, for asserting retries.
        ranges: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeSource {
        fn new(head_block: u64, head_time: u64) -> Self {
            let source = Self::default();
            *source.head.lock().unwrap() = BlockStamp {
                number: head_block,
                timestamp: head_time,
            };
            *source.oracle_time.lock().unwrap() = head_time;
            source
        }

        fn set_head(&self, number: u64, timestamp: u64) {
            *self.head.lock().unwrap() = BlockStamp { number, timestamp };
            *self.oracle_time.lock().unwrap() = timestamp;
        }

        fn push_request(&self, block: u64, tx: u8, tag: &str) {
            self.requests.lock().unwrap().push(RequestEvent {
                meta: EventMeta {
                    block_number: block,
                    tx_hash: H256::repeat_byte(tx),
                    log_index: 0,
                },
                requester: Address::repeat_byte(1),
                identifier: Identifier::from_utf8("TEST"),
                timestamp: 100,
                ancillary_data: Bytes::from(tag.as_bytes().to_vec()),
                currency: Address::repeat_byte(9),
                reward: U256::zero(),
                final_fee: U256::zero(),
            });
        }

        fn push_proposal(&self, block: u64, tx: u8, tag: &str, expiration: u64) {
            self.proposals.lock().unwrap().push(ProposalEvent {
                meta: EventMeta {
                    block_number: block,
                    tx_hash: H256::repeat_byte(tx),
                    log_index: 0,
                },
                requester: Address::repeat_byte(1),
                proposer: Address::repeat_byte(2),
                identifier: Identifier::from_utf8("TEST"),
                timestamp: 100,
                ancillary_data: Bytes::from(tag.as_bytes().to_vec()),
                proposed_price: I256::from(1),
                expiration_timestamp: expiration,
                currency: Address::repeat_byte(9),
            });
        }

        fn in_range<T: Clone>(events: &[T], range: (u64, u64), block_of: impl Fn(&T) -> u64) -> Vec<T> {
            events
                .iter()
                .filter(|e| block_of(e) >= range.0 && block_of(e) <= range.1)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl OracleEventSource for FakeSource {
        fn label(&self) -> &str {
            "fake"
        }

        async fn latest_block(&self) -> ClientResult<BlockStamp> {
            Ok(*self.head.lock().unwrap())
        }

        async fn oracle_time(&self) -> ClientResult<u64> {
            Ok(*self.oracle_time.lock().unwrap())
        }

        async fn request_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> ClientResult<Vec<RequestEvent>> {
            self.ranges.lock().unwrap().push((from_block, to_block));
            Ok(Self::in_range(
                &self.requests.lock().unwrap(),
                (from_block, to_block),
                |e| e.meta.block_number,
            ))
        }

        async fn proposal_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> ClientResult<Vec<ProposalEvent>> {
            Ok(Self::in_range(
                &self.proposals.lock().unwrap(),
                (from_block, to_block),
                |e| e.meta.block_number,
            ))
        }

        async fn dispute_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> ClientResult<Vec<DisputeEvent>> {
            if self.fail_disputes.load(Ordering::SeqCst) {
                return Err(ClientError::TransientProviderError(
                    "dispute fetch failed".to_string(),
                ));
            }
            Ok(Self::in_range(
                &self.disputes.lock().unwrap(),
                (from_block, to_block),
                |e| e.meta.block_number,
            ))
        }
    }

    /// Resolver that never resolves anything.
    struct NoopResolver;

    #[async_trait]
    impl PriceResolver for NoopResolver {
        async fn resolved_price(
            &self,
            _identifier: Identifier,
            _timestamp: u64,
            _stamped_ancillary_data: &Bytes,
        ) -> ClientResult<I256> {
            Err(ClientError::TransientProviderError(
                "execution reverted".to_string(),
            ))
        }

        async fn settlement_state(
            &self,
            _requester: Address,
            _identifier: Identifier,
            _timestamp: u64,
            _ancillary_data: &Bytes,
        ) -> ClientResult<SettlementState> {
            Ok(SettlementState::Disputed)
        }
    }

    fn client(source: Arc<FakeSource>) -> OptimisticOracleClient {
        OptimisticOracleClient::new(
            vec![source],
            Arc::new(NoopResolver),
            PollingController::new(0, 0, 1000).unwrap(),
            Arc::new(BotMetrics::new_for_testing()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_builds_buckets_and_advances_watermark() {
        let source = Arc::new(FakeSource::new(50, 1000));
        source.push_request(10, 1, "A");
        source.push_proposal(20, 2, "A", 2000);
        source.push_request(30, 3, "B");
        let mut client = client(source.clone());

        client.update().await.unwrap();

        // A is proposed and active (expiration 2000 > oracle time 1000); B
        // is unproposed.
        assert_eq!(client.get_unproposed_requests().len(), 1);
        assert_eq!(client.get_undisputed_proposals().len(), 1);
        assert!(client.get_expired_proposals(None).is_empty());
        assert_eq!(client.next_from_block(), 51);
        assert_eq!(client.get_last_update_time(), Some(1000));
    }

    #[tokio::test]
    async fn test_expiry_recomputed_as_chain_time_advances() {
        let source = Arc::new(FakeSource::new(50, 1000));
        source.push_request(10, 1, "A");
        source.push_proposal(20, 2, "A", 2000);
        let mut client = client(source.clone());

        client.update().await.unwrap();
        assert_eq!(client.get_undisputed_proposals().len(), 1);

        // Chain time passes the proposal's liveness without any new events.
        source.set_head(60, 2000);
        client.update().await.unwrap();
        assert!(client.get_undisputed_proposals().is_empty());
        assert_eq!(client.get_expired_proposals(None).len(), 1);
    }

    #[tokio::test]
    async fn test_no_op_when_head_below_watermark() {
        let source = Arc::new(FakeSource::new(50, 1000));
        let mut client = client(source.clone());
        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 51);

        let ranges_before = source.ranges.lock().unwrap().len();
        // Head has not advanced; the next update is a no-op and performs no
        // event fetches.
        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 51);
        assert_eq!(source.ranges.lock().unwrap().len(), ranges_before);
    }

    #[tokio::test]
    async fn test_failed_cycle_preserves_watermark_and_state() {
        let source = Arc::new(FakeSource::new(50, 1000));
        source.push_request(10, 1, "A");
        let mut client = client(source.clone());
        client.update().await.unwrap();
        assert_eq!(client.get_unproposed_requests().len(), 1);

        // New range appears but the dispute fetch fails mid-cycle.
        source.set_head(80, 1100);
        source.push_request(70, 7, "C");
        source.fail_disputes.store(true, Ordering::SeqCst);
        client.update().await.unwrap_err();

        // Watermark unchanged, derived state unchanged.
        assert_eq!(client.next_from_block(), 51);
        assert_eq!(client.get_unproposed_requests().len(), 1);
        assert_eq!(client.get_last_update_time(), Some(1000));

        // Once the failure clears, the same range is retried and the new
        // request appears exactly once.
        source.fail_disputes.store(false, Ordering::SeqCst);
        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 81);
        assert_eq!(client.get_unproposed_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_throttled_update_is_a_no_op() {
        let source = Arc::new(FakeSource::new(50, 1000));
        source.push_request(10, 1, "A");
        let mut client = OptimisticOracleClient::new(
            vec![source.clone()],
            Arc::new(NoopResolver),
            PollingController::new(0, 300, 1000).unwrap(),
            Arc::new(BotMetrics::new_for_testing()),
        )
        .unwrap();

        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 51);

        // 100s later: inside the 300s window, nothing changes even though
        // the head moved.
        source.set_head(90, 1100);
        source.push_request(60, 6, "B");
        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 51);
        assert_eq!(client.get_unproposed_requests().len(), 1);

        // Past the window the new range is picked up.
        source.set_head(90, 1300);
        client.update().await.unwrap();
        assert_eq!(client.next_from_block(), 91);
        assert_eq!(client.get_unproposed_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_divergent_secondary_provider_fails_update() {
        let primary = Arc::new(FakeSource::new(50, 1000));
        primary.push_request(10, 1, "A");
        let secondary = Arc::new(FakeSource::new(50, 1000));
        secondary.push_request(10, 1, "A");
        // Secondary has an extra event the primary never saw.
        secondary.push_request(11, 9, "GHOST");

        let mut client = OptimisticOracleClient::new(
            vec![primary, secondary],
            Arc::new(NoopResolver),
            PollingController::new(0, 0, 1000).unwrap(),
            Arc::new(BotMetrics::new_for_testing()),
        )
        .unwrap();

        let err = client.update().await.unwrap_err();
        assert_eq!(err.error_type(), "provider_divergence");
        // Nothing was cached and the range will be retried.
        assert!(client.get_unproposed_requests().is_empty());
        assert_eq!(client.next_from_block(), 0);
    }

    #[tokio::test]
    async fn test_empty_sources_rejected() {
        let err = OptimisticOracleClient::new(
            vec![],
            Arc::new(NoopResolver),
            PollingController::new(0, 0, 1000).unwrap(),
            Arc::new(BotMetrics::new_for_testing()),
        )
        .err()
        .unwrap();
        assert_eq!(err.error_type(), "configuration");
    }
}
