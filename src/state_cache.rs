// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Accumulated raw events plus the derived buckets served to consumers.
//!
//! Raw events accumulate idempotently across polls: an event re-delivered by
//! a retried or overlapping range is ignored by its (tx hash, log index)
//! identity. Derived buckets are replaced wholesale by `apply`, so getters
//! observe either the pre-update or the fully post-update view, never a
//! partial rebuild.

use crate::correlator::CorrelatedBuckets;
use crate::types::{
    CorrelationKey, DisputeEvent, EventMeta, PriceProposal, PriceRequest, ProposalEvent,
    RequestEvent, SettleableDispute,
};
use ethers::types::H256;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EventKind {
    Request,
    Proposal,
    Dispute,
}

#[derive(Debug, Clone, Default)]
pub struct OracleStateCache {
    requests: Vec<RequestEvent>,
    proposals: Vec<ProposalEvent>,
    disputes: Vec<DisputeEvent>,
    seen: HashSet<(EventKind, H256, u64)>,
    buckets: CorrelatedBuckets,
    settleable: Vec<SettleableDispute>,
}

impl OracleStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_seen(seen: &mut HashSet<(EventKind, H256, u64)>, kind: EventKind, meta: &EventMeta) -> bool {
        seen.insert((kind, meta.tx_hash, meta.log_index))
    }

    /// Append newly fetched requests, skipping already-ingested ones.
    /// Returns how many were new.
    pub fn ingest_requests(&mut self, events: Vec<RequestEvent>) -> usize {
        let mut added = 0;
        for event in events {
            if Self::mark_seen(&mut self.seen, EventKind::Request, &event.meta) {
                self.requests.push(event);
                added += 1;
            }
        }
        added
    }

    pub fn ingest_proposals(&mut self, events: Vec<ProposalEvent>) -> usize {
        let mut added = 0;
        for event in events {
            if Self::mark_seen(&mut self.seen, EventKind::Proposal, &event.meta) {
                self.proposals.push(event);
                added += 1;
            }
        }
        added
    }

    pub fn ingest_disputes(&mut self, events: Vec<DisputeEvent>) -> usize {
        let mut added = 0;
        for event in events {
            if Self::mark_seen(&mut self.seen, EventKind::Dispute, &event.meta) {
                self.disputes.push(event);
                added += 1;
            }
        }
        added
    }

    pub fn requests(&self) -> &[RequestEvent] {
        &self.requests
    }

    pub fn proposals(&self) -> &[ProposalEvent] {
        &self.proposals
    }

    pub fn disputes(&self) -> &[DisputeEvent] {
        &self.disputes
    }

    /// Replace the derived view in one step.
    pub fn apply(&mut self, buckets: CorrelatedBuckets, settleable: Vec<SettleableDispute>) {
        self.buckets = buckets;
        self.settleable = settleable;
    }

    pub fn unproposed_requests(&self) -> Vec<PriceRequest> {
        self.buckets.unproposed.clone()
    }

    pub fn undisputed_proposals(&self) -> Vec<PriceProposal> {
        self.buckets.undisputed_active.clone()
    }

    pub fn expired_proposals(&self, filter: Option<&CorrelationKey>) -> Vec<PriceProposal> {
        match filter {
            None => self.buckets.expired.clone(),
            Some(key) => self
                .buckets
                .expired
                .iter()
                .filter(|p| &p.key == key)
                .cloned()
                .collect(),
        }
    }

    pub fn settleable_disputes(&self, filter: Option<&CorrelationKey>) -> Vec<SettleableDispute> {
        match filter {
            None => self.settleable.clone(),
            Some(key) => self
                .settleable
                .iter()
                .filter(|d| &d.key == key)
                .cloned()
                .collect(),
        }
    }

    pub fn bucket_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.buckets.unproposed.len(),
            self.buckets.undisputed_active.len(),
            self.buckets.expired.len(),
            self.settleable.len(),
        )
    }
}
