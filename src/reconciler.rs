// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Redundant-provider agreement check.
//!
//! When several JSON-RPC endpoints back one logical chain, the same event
//! window is fetched from every endpoint and compared by transaction hash.
//! Provider 0 is canonical; the comparison is symmetric, so an event extra
//! in a secondary AND an event missing from a secondary both fail the poll.
//! Divergence means an upstream endpoint is behind or lossy; serving either
//! view downstream would silently corrupt the cache, so the poll halts and
//! the cache keeps its last-good state.

use crate::error::{ClientError, ClientResult, DivergenceDirection};
use crate::types::{Deposit, DisputeEvent, ProposalEvent, RequestEvent, WhitelistEvent};
use ethers::types::H256;
use std::collections::HashSet;
use tracing::warn;

/// Events comparable across providers by their emitting transaction.
pub trait ReconcilableEvent {
    fn tx_hash(&self) -> H256;
}

impl ReconcilableEvent for RequestEvent {
    fn tx_hash(&self) -> H256 {
        self.meta.tx_hash
    }
}

impl ReconcilableEvent for ProposalEvent {
    fn tx_hash(&self) -> H256 {
        self.meta.tx_hash
    }
}

impl ReconcilableEvent for DisputeEvent {
    fn tx_hash(&self) -> H256 {
        self.meta.tx_hash
    }
}

impl ReconcilableEvent for Deposit {
    fn tx_hash(&self) -> H256 {
        self.meta.tx_hash
    }
}

impl ReconcilableEvent for WhitelistEvent {
    fn tx_hash(&self) -> H256 {
        self.meta.tx_hash
    }
}

/// Compare per-provider result sets for one query and return the canonical
/// (provider 0) set when they agree.
///
/// `event_name` only feeds log/error context.
pub fn reconcile<T: ReconcilableEvent>(
    event_name: &str,
    mut per_provider: Vec<Vec<T>>,
) -> ClientResult<Vec<T>> {
    if per_provider.is_empty() {
        return Err(ClientError::Configuration(
            "reconcile requires at least one provider result set".to_string(),
        ));
    }

    let canonical_hashes: HashSet<H256> =
        per_provider[0].iter().map(|e| e.tx_hash()).collect();

    for (provider_index, events) in per_provider.iter().enumerate().skip(1) {
        let secondary_hashes: HashSet<H256> = events.iter().map(|e| e.tx_hash()).collect();

        for event in events {
            if !canonical_hashes.contains(&event.tx_hash()) {
                warn!(
                    "[MultiProviderReconciler] {} event in provider {} missing from canonical set: {:?}",
                    event_name,
                    provider_index,
                    event.tx_hash()
                );
                return Err(ClientError::Divergence {
                    provider_index,
                    tx_hash: event.tx_hash(),
                    direction: DivergenceDirection::MissingFromCanonical,
                });
            }
        }
        for hash in &canonical_hashes {
            if !secondary_hashes.contains(hash) {
                warn!(
                    "[MultiProviderReconciler] canonical {} event missing from provider {}: {:?}",
                    event_name, provider_index, hash
                );
                return Err(ClientError::Divergence {
                    provider_index,
                    tx_hash: *hash,
                    direction: DivergenceDirection::MissingFromSecondary,
                });
            }
        }
    }

    Ok(per_provider.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventMeta, Identifier};
    use ethers::types::{Address, Bytes, U256};

    fn request_with_tx(tx: u8) -> RequestEvent {
        RequestEvent {
            meta: EventMeta {
                block_number: 10,
                tx_hash: H256::repeat_byte(tx),
                log_index: 0,
            },
            requester: Address::repeat_byte(1),
            identifier: Identifier::from_utf8("TEST"),
            timestamp: 100,
            ancillary_data: Bytes::default(),
            currency: Address::repeat_byte(9),
            reward: U256::zero(),
            final_fee: U256::zero(),
        }
    }

    #[test]
    fn test_single_provider_passes_through() {
        let canonical = vec![request_with_tx(1), request_with_tx(2)];
        let out = reconcile("RequestPrice", vec![canonical.clone()]).unwrap();
        assert_eq!(out, canonical);
    }

    #[test]
    fn test_agreeing_providers_return_canonical() {
        let canonical = vec![request_with_tx(1), request_with_tx(2)];
        // Order differences do not matter, only membership.
        let secondary = vec![request_with_tx(2), request_with_tx(1)];
        let out = reconcile("RequestPrice", vec![canonical.clone(), secondary]).unwrap();
        assert_eq!(out, canonical);
    }

    #[test]
    fn test_extra_event_in_secondary_fails_naming_hash_and_provider() {
        let canonical = vec![request_with_tx(1)];
        let secondary = vec![request_with_tx(1), request_with_tx(9)];
        let err = reconcile("RequestPrice", vec![canonical, secondary]).unwrap_err();
        match err {
            ClientError::Divergence {
                provider_index,
                tx_hash,
                direction,
            } => {
                assert_eq!(provider_index, 1);
                assert_eq!(tx_hash, H256::repeat_byte(9));
                assert_eq!(direction, DivergenceDirection::MissingFromCanonical);
            }
            other => panic!("expected Divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_event_in_secondary_fails_symmetrically() {
        let canonical = vec![request_with_tx(1), request_with_tx(2)];
        let secondary = vec![request_with_tx(1)];
        let err = reconcile("RequestPrice", vec![canonical, secondary]).unwrap_err();
        match err {
            ClientError::Divergence {
                provider_index,
                tx_hash,
                direction,
            } => {
                assert_eq!(provider_index, 1);
                assert_eq!(tx_hash, H256::repeat_byte(2));
                assert_eq!(direction, DivergenceDirection::MissingFromSecondary);
            }
            other => panic!("expected Divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_third_provider_is_checked_too() {
        let canonical = vec![request_with_tx(1)];
        let second = vec![request_with_tx(1)];
        let third = vec![request_with_tx(1), request_with_tx(7)];
        let err = reconcile("RequestPrice", vec![canonical, second, third]).unwrap_err();
        match err {
            ClientError::Divergence { provider_index, .. } => assert_eq!(provider_index, 2),
            other => panic!("expected Divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_no_providers_is_a_configuration_error() {
        let err = reconcile::<RequestEvent>("RequestPrice", vec![]).unwrap_err();
        assert_eq!(err.error_type(), "configuration");
    }
}
