// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle partitioning of oracle events.
//!
//! The correlator is a pure function from raw event sets to derived buckets:
//! the split is fully recomputed on every call (never incremental) so the
//! expired/active boundary cannot drift from the contract-side view.

use crate::chain_reader::PriceResolver;
use crate::types::{
    stamp_ancillary_data, CorrelationKey, DisputeEvent, PriceProposal, PriceRequest, ProposalEvent,
    RequestEvent, SettleableDispute, SettlementState,
};
use std::collections::HashSet;
use tracing::debug;

/// Mutually exclusive lifecycle buckets derived from one correlation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatedBuckets {
    /// Requests no proposal has answered.
    pub unproposed: Vec<PriceRequest>,
    /// Undisputed proposals still inside their liveness window.
    pub undisputed_active: Vec<PriceProposal>,
    /// Undisputed proposals past their liveness window.
    pub expired: Vec<PriceProposal>,
}

/// Partition requests and proposals by set-difference joins on the
/// correlation key, then split surviving proposals by expiry against the
/// authoritative on-chain `current_time`.
pub fn correlate(
    requests: &[RequestEvent],
    proposals: &[ProposalEvent],
    disputes: &[DisputeEvent],
    current_time: u64,
) -> CorrelatedBuckets {
    let proposal_keys: HashSet<CorrelationKey> = proposals.iter().map(|p| p.key()).collect();
    let dispute_keys: HashSet<CorrelationKey> = disputes.iter().map(|d| d.key()).collect();

    let unproposed = requests
        .iter()
        .filter(|r| !proposal_keys.contains(&r.key()))
        .map(PriceRequest::from)
        .collect();

    let mut undisputed_active = Vec::new();
    let mut expired = Vec::new();
    for proposal in proposals {
        if dispute_keys.contains(&proposal.key()) {
            continue;
        }
        if proposal.expiration_timestamp <= current_time {
            expired.push(PriceProposal::from(proposal));
        } else {
            undisputed_active.push(PriceProposal::from(proposal));
        }
    }

    CorrelatedBuckets {
        unproposed,
        undisputed_active,
        expired,
    }
}

/// Resolve which disputes can settle: the voting oracle has produced a price
/// for the stamped request and the optimistic oracle does not already report
/// the request as settled.
///
/// A failed price lookup is indistinguishable from "not voted yet" (the
/// unresolved path reverts on chain), so failures drop the dispute for this
/// pass and the next poll retries it.
pub async fn settleable_disputes(
    disputes: &[DisputeEvent],
    resolver: &dyn PriceResolver,
) -> Vec<SettleableDispute> {
    let mut settleable = Vec::new();
    for dispute in disputes {
        let stamped = stamp_ancillary_data(&dispute.ancillary_data, dispute.requester);
        let resolved_price = match resolver
            .resolved_price(dispute.identifier, dispute.timestamp, &stamped)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                debug!(
                    "[EventCorrelator] No resolved price yet for dispute {}: {:?}",
                    dispute.key(),
                    e
                );
                continue;
            }
        };

        match resolver
            .settlement_state(
                dispute.requester,
                dispute.identifier,
                dispute.timestamp,
                &dispute.ancillary_data,
            )
            .await
        {
            Ok(SettlementState::Settled) => continue,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    "[EventCorrelator] Settlement state unavailable for dispute {}: {:?}",
                    dispute.key(),
                    e
                );
                continue;
            }
        }

        settleable.push(SettleableDispute {
            key: dispute.key(),
            requester: dispute.requester,
            proposer: dispute.proposer,
            disputer: dispute.disputer,
            identifier: dispute.identifier,
            timestamp: dispute.timestamp,
            ancillary_data: dispute.ancillary_data.clone(),
            resolved_price,
        });
    }
    settleable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, ClientResult};
    use crate::types::{EventMeta, Identifier};
    use async_trait::async_trait;
    use ethers::types::{Address, Bytes, H256, I256, U256};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn meta(block: u64) -> EventMeta {
        EventMeta {
            block_number: block,
            tx_hash: H256::repeat_byte(block as u8),
            log_index: 0,
        }
    }

    fn request(tag: &str, ts: u64) -> RequestEvent {
        RequestEvent {
            meta: meta(1),
            requester: Address::repeat_byte(1),
            identifier: Identifier::from_utf8("TEST_IDENTIFIER"),
            timestamp: ts,
            ancillary_data: Bytes::from(tag.as_bytes().to_vec()),
            currency: Address::repeat_byte(9),
            reward: U256::from(100),
            final_fee: U256::from(10),
        }
    }

    fn proposal(tag: &str, ts: u64, expiration: u64) -> ProposalEvent {
        ProposalEvent {
            meta: meta(2),
            requester: Address::repeat_byte(1),
            proposer: Address::repeat_byte(2),
            identifier: Identifier::from_utf8("TEST_IDENTIFIER"),
            timestamp: ts,
            ancillary_data: Bytes::from(tag.as_bytes().to_vec()),
            proposed_price: I256::from(42),
            expiration_timestamp: expiration,
            currency: Address::repeat_byte(9),
        }
    }

    fn dispute(tag: &str, ts: u64) -> DisputeEvent {
        DisputeEvent {
            meta: meta(3),
            requester: Address::repeat_byte(1),
            proposer: Address::repeat_byte(2),
            disputer: Address::repeat_byte(3),
            identifier: Identifier::from_utf8("TEST_IDENTIFIER"),
            timestamp: ts,
            ancillary_data: Bytes::from(tag.as_bytes().to_vec()),
            proposed_price: I256::from(42),
        }
    }

    #[test]
    fn test_lone_request_is_unproposed() {
        let buckets = correlate(&[request("A", 100)], &[], &[], 150);
        assert_eq!(buckets.unproposed.len(), 1);
        assert!(buckets.undisputed_active.is_empty());
        assert!(buckets.expired.is_empty());
    }

    #[test]
    fn test_proposed_request_leaves_unproposed() {
        let buckets = correlate(
            &[request("A", 100)],
            &[proposal("A", 100, 200)],
            &[],
            150,
        );
        assert!(buckets.unproposed.is_empty());
        assert_eq!(buckets.undisputed_active.len(), 1);
        assert!(buckets.expired.is_empty());
    }

    #[test]
    fn test_proposal_expires_under_later_current_time() {
        let buckets = correlate(
            &[request("A", 100)],
            &[proposal("A", 100, 200)],
            &[],
            250,
        );
        assert!(buckets.undisputed_active.is_empty());
        assert_eq!(buckets.expired.len(), 1);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        // expiration_timestamp <= current_time counts as expired
        let buckets = correlate(&[], &[proposal("A", 100, 200)], &[], 200);
        assert_eq!(buckets.expired.len(), 1);
        assert!(buckets.undisputed_active.is_empty());
    }

    #[test]
    fn test_disputed_proposal_never_in_active_or_expired() {
        let buckets = correlate(
            &[request("A", 100)],
            &[proposal("A", 100, 200)],
            &[dispute("A", 100)],
            250,
        );
        assert!(buckets.undisputed_active.is_empty());
        assert!(buckets.expired.is_empty());
        // The request does have a proposal, so it is not unproposed either.
        assert!(buckets.unproposed.is_empty());
    }

    #[test]
    fn test_request_in_unproposed_iff_no_proposal_shares_key() {
        let requests = vec![request("A", 100), request("B", 100), request("C", 300)];
        let proposals = vec![proposal("B", 100, 500)];
        let buckets = correlate(&requests, &proposals, &[], 50);
        let unproposed_keys: Vec<_> = buckets.unproposed.iter().map(|r| r.key).collect();
        assert_eq!(
            unproposed_keys,
            vec![requests[0].key(), requests[2].key()]
        );
    }

    #[test]
    fn test_correlate_is_idempotent() {
        let requests = vec![request("A", 100), request("B", 200)];
        let proposals = vec![proposal("A", 100, 400), proposal("B", 200, 150)];
        let disputes = vec![dispute("B", 200)];
        let first = correlate(&requests, &proposals, &disputes, 300);
        let second = correlate(&requests, &proposals, &disputes, 300);
        assert_eq!(first, second);
    }

    /// Resolver with per-tag behavior: resolved price, revert, or unset.
    struct FakeResolver {
        prices: HashMap<Vec<u8>, I256>,
        states: HashMap<Vec<u8>, SettlementState>,
        price_calls: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeResolver {
        fn new() -> Self {
            Self {
                prices: HashMap::new(),
                states: HashMap::new(),
                price_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceResolver for FakeResolver {
        async fn resolved_price(
            &self,
            _identifier: Identifier,
            _timestamp: u64,
            stamped_ancillary_data: &Bytes,
        ) -> ClientResult<I256> {
            self.price_calls
                .lock()
                .unwrap()
                .push(stamped_ancillary_data.to_vec());
            // Stamped payload starts with the original tag.
            let tag: Vec<u8> = stamped_ancillary_data
                .iter()
                .copied()
                .take_while(|&b| b != b',')
                .collect();
            self.prices
                .get(&tag)
                .copied()
                .ok_or_else(|| ClientError::TransientProviderError("execution reverted".into()))
        }

        async fn settlement_state(
            &self,
            _requester: Address,
            _identifier: Identifier,
            _timestamp: u64,
            ancillary_data: &Bytes,
        ) -> ClientResult<SettlementState> {
            Ok(self
                .states
                .get(&ancillary_data.to_vec())
                .copied()
                .unwrap_or(SettlementState::Disputed))
        }
    }

    #[tokio::test]
    async fn test_resolver_revert_means_not_settleable() {
        let resolver = FakeResolver::new();
        let out = settleable_disputes(&[dispute("B", 100)], &resolver).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_dispute_is_settleable() {
        let mut resolver = FakeResolver::new();
        resolver.prices.insert(b"B".to_vec(), I256::from(7));
        let out = settleable_disputes(&[dispute("B", 100)], &resolver).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].resolved_price, I256::from(7));
        assert_eq!(out[0].key, dispute("B", 100).key());
    }

    #[tokio::test]
    async fn test_already_settled_dispute_is_excluded() {
        let mut resolver = FakeResolver::new();
        resolver.prices.insert(b"B".to_vec(), I256::from(7));
        resolver
            .states
            .insert(b"B".to_vec(), SettlementState::Settled);
        let out = settleable_disputes(&[dispute("B", 100)], &resolver).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_price_lookup_uses_stamped_ancillary_data() {
        let mut resolver = FakeResolver::new();
        resolver.prices.insert(b"B".to_vec(), I256::from(7));
        settleable_disputes(&[dispute("B", 100)], &resolver).await;
        let calls = resolver.price_calls.lock().unwrap();
        let text = String::from_utf8(calls[0].clone()).unwrap();
        assert!(text.starts_with("B,ooRequester:"));
    }
}
