// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core data model: chain events observed from the optimistic oracle and the
//! bridge deposit box, correlation keys joining them, and the projected views
//! served to bot consumers.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, I256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where on chain an event was observed. Attached to every decoded event;
/// never part of any correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: H256,
    /// Log index within the block, used only for stable replay ordering.
    pub log_index: u64,
}

impl EventMeta {
    /// Ordering key for oldest-to-newest replay.
    pub fn replay_order(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// A price identifier as registered on chain (right-padded UTF-8 in bytes32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier(pub [u8; 32]);

impl Identifier {
    pub fn from_utf8(s: &str) -> Self {
        let mut bytes = [0u8; 32];
        let len = s.len().min(32);
        bytes[..len].copy_from_slice(&s.as_bytes()[..len]);
        Identifier(bytes)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(32);
        match std::str::from_utf8(&self.0[..end]) {
            Ok(s) if !s.is_empty() => write!(f, "{}", s),
            _ => write!(f, "0x{}", hex_str(&self.0)),
        }
    }
}

/// Deterministic identity joining request, proposal and dispute events that
/// refer to the same logical price request.
///
/// Derived only from the immutable request-defining fields (requester,
/// identifier, timestamp, ancillary data). Mutable or derived fields such as
/// the proposed price or lifecycle state must never enter the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey(pub H256);

impl CorrelationKey {
    pub fn for_price_request(
        requester: Address,
        identifier: Identifier,
        timestamp: u64,
        ancillary_data: &Bytes,
    ) -> Self {
        let encoded = ethers::abi::encode(&[
            Token::Address(requester),
            Token::FixedBytes(identifier.0.to_vec()),
            Token::Uint(U256::from(timestamp)),
            Token::Bytes(ancillary_data.to_vec()),
        ]);
        CorrelationKey(H256::from(keccak256(encoded)))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = format!("{:x}", self.0);
        write!(f, "0x{}..{}", &hex[..8], &hex[hex.len() - 6..])
    }
}

/// `RequestPrice` observed on the optimistic oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub meta: EventMeta,
    pub requester: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub currency: Address,
    pub reward: U256,
    pub final_fee: U256,
}

impl RequestEvent {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::for_price_request(
            self.requester,
            self.identifier,
            self.timestamp,
            &self.ancillary_data,
        )
    }
}

/// `ProposePrice` observed on the optimistic oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEvent {
    pub meta: EventMeta,
    pub requester: Address,
    pub proposer: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub proposed_price: I256,
    pub expiration_timestamp: u64,
    pub currency: Address,
}

impl ProposalEvent {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::for_price_request(
            self.requester,
            self.identifier,
            self.timestamp,
            &self.ancillary_data,
        )
    }
}

/// `DisputePrice` observed on the optimistic oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEvent {
    pub meta: EventMeta,
    pub requester: Address,
    pub proposer: Address,
    pub disputer: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub proposed_price: I256,
}

impl DisputeEvent {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::for_price_request(
            self.requester,
            self.identifier,
            self.timestamp,
            &self.ancillary_data,
        )
    }
}

/// Lifecycle state of a price request as reported by the oracle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementState {
    Invalid,
    Requested,
    Proposed,
    Expired,
    Disputed,
    Resolved,
    Settled,
}

impl SettlementState {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SettlementState::Requested,
            2 => SettlementState::Proposed,
            3 => SettlementState::Expired,
            4 => SettlementState::Disputed,
            5 => SettlementState::Resolved,
            6 => SettlementState::Settled,
            _ => SettlementState::Invalid,
        }
    }
}

/// A request no proposal has answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub key: CorrelationKey,
    pub requester: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub currency: Address,
    pub reward: U256,
    pub final_fee: U256,
}

impl From<&RequestEvent> for PriceRequest {
    fn from(ev: &RequestEvent) -> Self {
        PriceRequest {
            key: ev.key(),
            requester: ev.requester,
            identifier: ev.identifier,
            timestamp: ev.timestamp,
            ancillary_data: ev.ancillary_data.clone(),
            currency: ev.currency,
            reward: ev.reward,
            final_fee: ev.final_fee,
        }
    }
}

/// A proposal with no dispute against it, active or past its liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceProposal {
    pub key: CorrelationKey,
    pub requester: Address,
    pub proposer: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub proposed_price: I256,
    pub expiration_timestamp: u64,
    pub currency: Address,
}

impl From<&ProposalEvent> for PriceProposal {
    fn from(ev: &ProposalEvent) -> Self {
        PriceProposal {
            key: ev.key(),
            requester: ev.requester,
            proposer: ev.proposer,
            identifier: ev.identifier,
            timestamp: ev.timestamp,
            ancillary_data: ev.ancillary_data.clone(),
            proposed_price: ev.proposed_price,
            expiration_timestamp: ev.expiration_timestamp,
            currency: ev.currency,
        }
    }
}

/// A dispute whose underlying price has resolved and whose on-chain state is
/// not yet `Settled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleableDispute {
    pub key: CorrelationKey,
    pub requester: Address,
    pub proposer: Address,
    pub disputer: Address,
    pub identifier: Identifier,
    pub timestamp: u64,
    pub ancillary_data: Bytes,
    pub resolved_price: I256,
}

/// Re-encode ancillary data with the original requester context before a
/// downstream price lookup. Matches the contract-side stamping so the lookup
/// hits the same record the voting oracle stored.
pub fn stamp_ancillary_data(ancillary_data: &Bytes, requester: Address) -> Bytes {
    let tag = format!("ooRequester:{}", hex_str(requester.as_bytes()));
    let mut out = Vec::with_capacity(ancillary_data.len() + tag.len() + 1);
    if ancillary_data.is_empty() {
        out.extend_from_slice(tag.as_bytes());
    } else {
        out.extend_from_slice(ancillary_data);
        out.push(b',');
        out.extend_from_slice(tag.as_bytes());
    }
    Bytes::from(out)
}

/// `FundsDeposited` observed on the bridge deposit box. All fields are
/// immutable deposit parameters; the entity is created once on first sighting
/// and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub meta: EventMeta,
    pub chain_id: u64,
    pub deposit_id: u64,
    pub l1_recipient: Address,
    pub l2_sender: Address,
    pub l1_token: Address,
    pub l2_token: Address,
    pub amount: U256,
    pub slow_relay_fee_pct: U256,
    pub instant_relay_fee_pct: U256,
    pub quote_timestamp: u64,
    pub origin_contract: Address,
}

impl Deposit {
    /// Content hash of the immutable deposit fields; the cache key.
    pub fn deposit_hash(&self) -> H256 {
        let encoded = ethers::abi::encode(&[
            Token::Uint(U256::from(self.chain_id)),
            Token::Uint(U256::from(self.deposit_id)),
            Token::Address(self.l1_recipient),
            Token::Address(self.l2_sender),
            Token::Address(self.l1_token),
            Token::Address(self.l2_token),
            Token::Uint(self.amount),
            Token::Uint(self.slow_relay_fee_pct),
            Token::Uint(self.instant_relay_fee_pct),
            Token::Uint(U256::from(self.quote_timestamp)),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// `WhitelistToken` observed on the bridge deposit box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEvent {
    pub meta: EventMeta,
    pub l1_token: Address,
    pub l2_token: Address,
}

fn hex_str(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
