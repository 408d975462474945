// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain access layer. Defines the narrow async traits the clients consume
//! (`OracleEventSource`, `BridgeEventSource`, `PriceResolver`) and their
//! ethers-backed implementations over a metered HTTP provider.
//!
//! Each reader instance wraps exactly one JSON-RPC endpoint; redundancy is
//! layered on top by the reconciler, which fans the same query out to every
//! configured reader and compares the results.

use crate::abi::{
    DisputePriceFilter, FundsDepositedFilter, ProposePriceFilter, RequestPriceFilter,
    WhitelistTokenFilter,
};
use crate::error::{ClientError, ClientResult};
use crate::metered_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::BotMetrics;
use crate::types::{
    Deposit, DisputeEvent, EventMeta, Identifier, ProposalEvent, RequestEvent, SettlementState,
    WhitelistEvent,
};
use async_trait::async_trait;
use ethers::abi::{RawLog, Token};
use ethers::contract::EthEvent;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Filter, TransactionRequest, I256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tap::TapFallible;

/// Block number and timestamp observed together from one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStamp {
    pub number: u64,
    pub timestamp: u64,
}

/// Event log and time access for the optimistic oracle contract.
#[async_trait]
pub trait OracleEventSource: Send + Sync {
    /// Short label naming the backing endpoint, used in logs and errors.
    fn label(&self) -> &str;

    async fn latest_block(&self) -> ClientResult<BlockStamp>;

    /// Authoritative current time as the oracle contract sees it. Used for
    /// expiry checks instead of wall clock so the split matches the
    /// contract-side view.
    async fn oracle_time(&self) -> ClientResult<u64>;

    async fn request_events(&self, from_block: u64, to_block: u64)
        -> ClientResult<Vec<RequestEvent>>;

    async fn proposal_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<ProposalEvent>>;

    async fn dispute_events(&self, from_block: u64, to_block: u64)
        -> ClientResult<Vec<DisputeEvent>>;
}

/// Event log access for the bridge deposit box contract.
#[async_trait]
pub trait BridgeEventSource: Send + Sync {
    fn label(&self) -> &str;

    async fn latest_block(&self) -> ClientResult<BlockStamp>;

    async fn deposit_events(&self, from_block: u64, to_block: u64) -> ClientResult<Vec<Deposit>>;

    async fn whitelist_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<WhitelistEvent>>;
}

/// Price resolution lookups for dispute settlement.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    /// Resolved price for a stamped request, or an error when the voting
    /// oracle has nothing (an unresolved request reverts on chain; callers
    /// treat errors as "not yet resolved").
    async fn resolved_price(
        &self,
        identifier: Identifier,
        timestamp: u64,
        stamped_ancillary_data: &Bytes,
    ) -> ClientResult<I256>;

    /// Lifecycle state of the request on the optimistic oracle.
    async fn settlement_state(
        &self,
        requester: Address,
        identifier: Identifier,
        timestamp: u64,
        ancillary_data: &Bytes,
    ) -> ClientResult<SettlementState>;
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn call_data(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&ethers::abi::encode(args));
    Bytes::from(data)
}

/// Typed reader over one JSON-RPC endpoint and one contract address.
pub struct EthEventReader<P> {
    provider: Provider<P>,
    contract_address: Address,
    expected_chain_id: Option<u64>,
    label: String,
}

impl EthEventReader<MeteredEthHttpProvider> {
    /// Connect to an endpoint, validate its chain id, and log connection
    /// details. Configuration errors (bad URL, wrong network) are fatal.
    pub async fn connect(
        provider_url: &str,
        contract_address: Address,
        metrics: Arc<BotMetrics>,
        expected_chain_id: Option<u64>,
        label: &str,
    ) -> anyhow::Result<Self> {
        let provider = new_metered_eth_provider(provider_url, metrics)?;
        let reader = Self {
            provider,
            contract_address,
            expected_chain_id,
            label: label.to_string(),
        };
        reader.describe().await?;
        Ok(reader)
    }
}

impl<P> EthEventReader<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Provider<P>,
        contract_address: Address,
        expected_chain_id: Option<u64>,
        label: &str,
    ) -> Self {
        Self {
            provider,
            contract_address,
            expected_chain_id,
            label: label.to_string(),
        }
    }

    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.provider.get_chainid().await?.as_u64();
        let block_number = self.provider.get_block_number().await?;

        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch on {}: expected {}, got {}. This could indicate connecting to the wrong network!",
                    self.label,
                    expected,
                    chain_id
                ));
            }
            tracing::info!(
                "[{}] Connected to chain {} (verified), current block: {}",
                self.label,
                chain_id,
                block_number
            );
        } else {
            tracing::warn!(
                "[{}] Connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                self.label,
                chain_id,
                block_number
            );
        }
        Ok(())
    }

    async fn fetch_stamp(&self) -> ClientResult<BlockStamp> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| {
                ClientError::TransientProviderError(format!(
                    "[{}] Failed to get latest block: {}",
                    self.label, e
                ))
            })?
            .ok_or_else(|| {
                ClientError::ProviderError(format!("[{}] Latest block not found", self.label))
            })?;
        let number = block
            .number
            .ok_or_else(|| {
                ClientError::ProviderError(format!(
                    "[{}] Provider returned latest block without a number",
                    self.label
                ))
            })?
            .as_u64();
        Ok(BlockStamp {
            number,
            timestamp: block.timestamp.as_u64(),
        })
    }

    // Note: the query may fail if the range is too big. The polling
    // controller is responsible for chunking.
    async fn fetch_events<E: EthEvent>(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<(E, EventMeta)>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(self.contract_address)
            .topic0(E::signature());
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| {
                ClientError::TransientProviderError(format!(
                    "[{}] get_logs failed: {}",
                    self.label, e
                ))
            })
            .tap_err(|e| tracing::error!("fetch_events failed. Filter: {:?}. Error {:?}", filter, e))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            // Safeguard check that every log comes from the requested contract
            if log.address != self.contract_address {
                return Err(ClientError::ProviderError(format!(
                    "[{}] Provider returned log from unexpected contract (expected {:?}, got {:?})",
                    self.label, self.contract_address, log.address
                )));
            }
            let block_number = log
                .block_number
                .ok_or_else(|| {
                    ClientError::ProviderError(format!(
                        "[{}] Provider returned log without block_number",
                        self.label
                    ))
                })?
                .as_u64();
            let tx_hash = log.transaction_hash.ok_or_else(|| {
                ClientError::ProviderError(format!(
                    "[{}] Provider returned log without transaction_hash",
                    self.label
                ))
            })?;
            let log_index = log
                .log_index
                .ok_or_else(|| {
                    ClientError::ProviderError(format!(
                        "[{}] Provider returned log without log_index",
                        self.label
                    ))
                })?
                .as_u64();

            let raw = RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            };
            let decoded = E::decode_log(&raw).map_err(|e| {
                ClientError::ProviderError(format!(
                    "[{}] Failed to decode {} log in tx {:?}: {}",
                    self.label,
                    E::name(),
                    tx_hash,
                    e
                ))
            })?;
            events.push((
                decoded,
                EventMeta {
                    block_number,
                    tx_hash,
                    log_index,
                },
            ));
        }
        // Providers generally return logs ordered, but the replay order must
        // not depend on that.
        events.sort_by_key(|(_, meta)| meta.replay_order());
        Ok(events)
    }

    async fn eth_call(&self, to: Address, from: Option<Address>, data: Bytes) -> ClientResult<Bytes> {
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            request = request.from(from);
        }
        let typed: TypedTransaction = request.into();
        self.provider.call(&typed, None).await.map_err(|e| {
            ClientError::TransientProviderError(format!("[{}] eth_call failed: {}", self.label, e))
        })
    }
}

#[async_trait]
impl<P> OracleEventSource for EthEventReader<P>
where
    P: JsonRpcClient + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_block(&self) -> ClientResult<BlockStamp> {
        self.fetch_stamp().await
    }

    async fn oracle_time(&self) -> ClientResult<u64> {
        let out = self
            .eth_call(
                self.contract_address,
                None,
                call_data("getCurrentTime()", &[]),
            )
            .await?;
        if out.len() < 32 {
            return Err(ClientError::ProviderError(format!(
                "[{}] getCurrentTime returned {} bytes",
                self.label,
                out.len()
            )));
        }
        Ok(U256::from_big_endian(&out[..32]).as_u64())
    }

    async fn request_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<RequestEvent>> {
        let raw = self
            .fetch_events::<RequestPriceFilter>(from_block, to_block)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(ev, meta)| ev.into_event(meta))
            .collect())
    }

    async fn proposal_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<ProposalEvent>> {
        let raw = self
            .fetch_events::<ProposePriceFilter>(from_block, to_block)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(ev, meta)| ev.into_event(meta))
            .collect())
    }

    async fn dispute_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<DisputeEvent>> {
        let raw = self
            .fetch_events::<DisputePriceFilter>(from_block, to_block)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(ev, meta)| ev.into_event(meta))
            .collect())
    }
}

#[async_trait]
impl<P> BridgeEventSource for EthEventReader<P>
where
    P: JsonRpcClient + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_block(&self) -> ClientResult<BlockStamp> {
        self.fetch_stamp().await
    }

    async fn deposit_events(&self, from_block: u64, to_block: u64) -> ClientResult<Vec<Deposit>> {
        let raw = self
            .fetch_events::<FundsDepositedFilter>(from_block, to_block)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(ev, meta)| ev.into_event(meta, self.contract_address))
            .collect())
    }

    async fn whitelist_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<WhitelistEvent>> {
        let raw = self
            .fetch_events::<WhitelistTokenFilter>(from_block, to_block)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(ev, meta)| ev.into_event(meta))
            .collect())
    }
}

/// Price resolver backed by the voting oracle (`getPrice`) and the optimistic
/// oracle (`getState`) contracts.
pub struct EthPriceResolver<P> {
    provider: Provider<P>,
    voting_oracle_address: Address,
    optimistic_oracle_address: Address,
    label: String,
}

impl<P> EthPriceResolver<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Provider<P>,
        voting_oracle_address: Address,
        optimistic_oracle_address: Address,
        label: &str,
    ) -> Self {
        Self {
            provider,
            voting_oracle_address,
            optimistic_oracle_address,
            label: label.to_string(),
        }
    }

    async fn eth_call(&self, to: Address, from: Option<Address>, data: Bytes) -> ClientResult<Bytes> {
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            request = request.from(from);
        }
        let typed: TypedTransaction = request.into();
        self.provider.call(&typed, None).await.map_err(|e| {
            ClientError::TransientProviderError(format!("[{}] eth_call failed: {}", self.label, e))
        })
    }
}

#[async_trait]
impl<P> PriceResolver for EthPriceResolver<P>
where
    P: JsonRpcClient + 'static,
{
    async fn resolved_price(
        &self,
        identifier: Identifier,
        timestamp: u64,
        stamped_ancillary_data: &Bytes,
    ) -> ClientResult<I256> {
        let data = call_data(
            "getPrice(bytes32,uint256,bytes)",
            &[
                Token::FixedBytes(identifier.0.to_vec()),
                Token::Uint(U256::from(timestamp)),
                Token::Bytes(stamped_ancillary_data.to_vec()),
            ],
        );
        // The voting oracle restricts getPrice to registered contracts, so
        // the call is made as the optimistic oracle.
        let out = self
            .eth_call(
                self.voting_oracle_address,
                Some(self.optimistic_oracle_address),
                data,
            )
            .await?;
        if out.len() < 32 {
            return Err(ClientError::ProviderError(format!(
                "[{}] getPrice returned {} bytes",
                self.label,
                out.len()
            )));
        }
        Ok(I256::from_raw(U256::from_big_endian(&out[..32])))
    }

    async fn settlement_state(
        &self,
        requester: Address,
        identifier: Identifier,
        timestamp: u64,
        ancillary_data: &Bytes,
    ) -> ClientResult<SettlementState> {
        let data = call_data(
            "getState(address,bytes32,uint256,bytes)",
            &[
                Token::Address(requester),
                Token::FixedBytes(identifier.0.to_vec()),
                Token::Uint(U256::from(timestamp)),
                Token::Bytes(ancillary_data.to_vec()),
            ],
        );
        let out = self
            .eth_call(self.optimistic_oracle_address, None, data)
            .await?;
        if out.len() < 32 {
            return Err(ClientError::ProviderError(format!(
                "[{}] getState returned {} bytes",
                self.label,
                out.len()
            )));
        }
        Ok(SettlementState::from_u8(out[31]))
    }
}
