// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! ABI-level event shapes for the optimistic oracle and the bridge deposit
//! box, plus their conversion into the crate's domain events.

use crate::types::{
    Deposit, DisputeEvent, EventMeta, Identifier, ProposalEvent, RequestEvent, WhitelistEvent,
};
use ethers::contract::EthEvent;
use ethers::types::{Address, Bytes, I256, U256};

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "RequestPrice",
    abi = "RequestPrice(address,bytes32,uint256,bytes,address,uint256,uint256)"
)]
pub struct RequestPriceFilter {
    #[ethevent(indexed)]
    pub requester: Address,
    pub identifier: [u8; 32],
    pub timestamp: U256,
    pub ancillary_data: Bytes,
    pub currency: Address,
    pub reward: U256,
    pub final_fee: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "ProposePrice",
    abi = "ProposePrice(address,address,bytes32,uint256,bytes,int256,uint256,address)"
)]
pub struct ProposePriceFilter {
    #[ethevent(indexed)]
    pub requester: Address,
    #[ethevent(indexed)]
    pub proposer: Address,
    pub identifier: [u8; 32],
    pub timestamp: U256,
    pub ancillary_data: Bytes,
    pub proposed_price: I256,
    pub expiration_timestamp: U256,
    pub currency: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "DisputePrice",
    abi = "DisputePrice(address,address,address,bytes32,uint256,bytes,int256)"
)]
pub struct DisputePriceFilter {
    #[ethevent(indexed)]
    pub requester: Address,
    #[ethevent(indexed)]
    pub proposer: Address,
    #[ethevent(indexed)]
    pub disputer: Address,
    pub identifier: [u8; 32],
    pub timestamp: U256,
    pub ancillary_data: Bytes,
    pub proposed_price: I256,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "FundsDeposited",
    abi = "FundsDeposited(uint256,uint256,address,address,address,address,uint256,uint64,uint64,uint64)"
)]
pub struct FundsDepositedFilter {
    pub chain_id: U256,
    pub deposit_id: U256,
    pub l1_recipient: Address,
    pub l2_sender: Address,
    pub l1_token: Address,
    pub l2_token: Address,
    pub amount: U256,
    pub slow_relay_fee_pct: u64,
    pub instant_relay_fee_pct: u64,
    pub quote_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(name = "WhitelistToken", abi = "WhitelistToken(address,address)")]
pub struct WhitelistTokenFilter {
    pub l1_token: Address,
    pub l2_token: Address,
}

impl RequestPriceFilter {
    pub fn into_event(self, meta: EventMeta) -> RequestEvent {
        RequestEvent {
            meta,
            requester: self.requester,
            identifier: Identifier(self.identifier),
            timestamp: self.timestamp.as_u64(),
            ancillary_data: self.ancillary_data,
            currency: self.currency,
            reward: self.reward,
            final_fee: self.final_fee,
        }
    }
}

impl ProposePriceFilter {
    pub fn into_event(self, meta: EventMeta) -> ProposalEvent {
        ProposalEvent {
            meta,
            requester: self.requester,
            proposer: self.proposer,
            identifier: Identifier(self.identifier),
            timestamp: self.timestamp.as_u64(),
            ancillary_data: self.ancillary_data,
            proposed_price: self.proposed_price,
            expiration_timestamp: self.expiration_timestamp.as_u64(),
            currency: self.currency,
        }
    }
}

impl DisputePriceFilter {
    pub fn into_event(self, meta: EventMeta) -> DisputeEvent {
        DisputeEvent {
            meta,
            requester: self.requester,
            proposer: self.proposer,
            disputer: self.disputer,
            identifier: Identifier(self.identifier),
            timestamp: self.timestamp.as_u64(),
            ancillary_data: self.ancillary_data,
            proposed_price: self.proposed_price,
        }
    }
}

impl FundsDepositedFilter {
    pub fn into_event(self, meta: EventMeta, origin_contract: Address) -> Deposit {
        Deposit {
            meta,
            chain_id: self.chain_id.as_u64(),
            deposit_id: self.deposit_id.as_u64(),
            l1_recipient: self.l1_recipient,
            l2_sender: self.l2_sender,
            l1_token: self.l1_token,
            l2_token: self.l2_token,
            amount: self.amount,
            slow_relay_fee_pct: U256::from(self.slow_relay_fee_pct),
            instant_relay_fee_pct: U256::from(self.instant_relay_fee_pct),
            quote_timestamp: self.quote_timestamp,
            origin_contract,
        }
    }
}

impl WhitelistTokenFilter {
    pub fn into_event(self, meta: EventMeta) -> WhitelistEvent {
        WhitelistEvent {
            meta,
            l1_token: self.l1_token,
            l2_token: self.l2_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::utils::keccak256;

    #[test]
    fn test_event_signatures_match_abi() {
        assert_eq!(
            RequestPriceFilter::signature(),
            keccak256("RequestPrice(address,bytes32,uint256,bytes,address,uint256,uint256)".as_bytes()).into()
        );
        assert_eq!(
            ProposePriceFilter::signature(),
            keccak256(
                "ProposePrice(address,address,bytes32,uint256,bytes,int256,uint256,address)"
                    .as_bytes()
            )
            .into()
        );
        assert_eq!(
            DisputePriceFilter::signature(),
            keccak256(
                "DisputePrice(address,address,address,bytes32,uint256,bytes,int256)".as_bytes()
            )
            .into()
        );
        assert_eq!(
            WhitelistTokenFilter::signature(),
            keccak256("WhitelistToken(address,address)".as_bytes()).into()
        );
    }
}
