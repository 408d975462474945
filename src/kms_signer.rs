// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction path for a signer whose key lives in an external custodian.
//!
//! The flow never touches raw key material: the unsigned transaction is
//! built and simulated locally, its digest is signed by the injected
//! `DigestSigner`, and the combined payload is broadcast. Failures are
//! tagged by phase (`call` vs `submission`) because the recovery differs.
//!
//! One signer instance owns one nonce sequence. Concurrent sends for the
//! same account require external nonce coordination and are not supported.

use crate::error::{ClientError, ClientResult, SigningErrorKind};
use crate::metrics::BotMetrics;
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, Signature, TransactionReceipt, TransactionRequest,
    H256, U256,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// External digest-signing capability (KMS-style). Implementations return a
/// signature whose `v` is the raw recovery id (0 or 1); EIP-155 adjustment
/// for legacy transactions happens here.
#[async_trait]
pub trait DigestSigner: Send + Sync {
    async fn sign_digest(&self, digest: H256) -> ClientResult<Signature>;
}

/// Narrow provider surface the signer needs.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn chain_id(&self) -> ClientResult<u64>;

    /// Transaction count for the account; `pending` selects the mempool view.
    async fn transaction_count(&self, account: Address, pending: bool) -> ClientResult<u64>;

    async fn call(&self, tx: &TypedTransaction) -> ClientResult<Bytes>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ClientResult<U256>;

    async fn send_raw_transaction(&self, raw: Bytes) -> ClientResult<H256>;

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> ClientResult<Option<TransactionReceipt>>;
}

/// The call to execute on chain.
#[derive(Debug, Clone)]
pub struct TransactionCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Fee parameters. Both EIP-1559 caps present selects a 1559 transaction;
/// otherwise a legacy gas price; neither is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct FeeConfig {
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas_price: Option<U256>,
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub tx_hash: H256,
    pub receipt: TransactionReceipt,
    /// Result of the pre-flight static call.
    pub return_value: Bytes,
    /// The transaction as actually broadcast (final nonce, gas, fees).
    pub transaction: TypedTransaction,
}

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECEIPT_POLL_ATTEMPTS: u32 = 60;

pub struct KmsTransactionSigner {
    submitter: Arc<dyn TransactionSubmitter>,
    signer: Arc<dyn DigestSigner>,
    sender: Address,
    metrics: Arc<BotMetrics>,
}

impl KmsTransactionSigner {
    pub fn new(
        submitter: Arc<dyn TransactionSubmitter>,
        signer: Arc<dyn DigestSigner>,
        sender: Address,
        metrics: Arc<BotMetrics>,
    ) -> Self {
        Self {
            submitter,
            signer,
            sender,
            metrics,
        }
    }

    /// Build, simulate, sign and broadcast `call`, then wait for its receipt.
    pub async fn send(
        &self,
        call: TransactionCall,
        fees: FeeConfig,
    ) -> ClientResult<SentTransaction> {
        let result = self.send_inner(call, fees).await;
        match &result {
            Ok(sent) => {
                self.metrics.tx_submitted.inc();
                info!(
                    "[KmsTransactionSigner] Broadcast tx {:?} from {:?}",
                    sent.tx_hash, self.sender
                );
            }
            Err(ClientError::Signing { kind, .. }) => {
                self.metrics
                    .tx_submission_errors
                    .with_label_values(&[&kind.to_string()])
                    .inc();
            }
            Err(_) => {}
        }
        result
    }

    async fn send_inner(
        &self,
        call: TransactionCall,
        fees: FeeConfig,
    ) -> ClientResult<SentTransaction> {
        let chain_id = self.submitter.chain_id().await?;
        let nonce = self.next_nonce().await?;
        let mut tx = self.build_unsigned(&call, &fees, nonce, chain_id)?;

        // Simulate before spending anything: a static call surfaces the
        // revert reason and the estimate sizes the gas limit. Either failing
        // means the transaction should not be broadcast.
        let (return_value, gas_estimate) = tokio::try_join!(
            async {
                self.submitter.call(&tx).await.map_err(|e| ClientError::Signing {
                    kind: SigningErrorKind::Call,
                    message: format!("static call failed: {}", e),
                })
            },
            async {
                self.submitter
                    .estimate_gas(&tx)
                    .await
                    .map_err(|e| ClientError::Signing {
                        kind: SigningErrorKind::Call,
                        message: format!("gas estimate failed: {}", e),
                    })
            }
        )?;
        tx.set_gas(gas_estimate);

        let digest = tx.sighash();
        let signature = self.signer.sign_digest(digest).await?;
        let signature = normalize_v(signature, &tx, chain_id);
        let raw = tx.rlp_signed(&signature);

        let tx_hash = self
            .submitter
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ClientError::Signing {
                kind: SigningErrorKind::Submission,
                message: format!("broadcast rejected: {}", e),
            })?;

        let receipt = self.wait_for_receipt(tx_hash).await?;
        Ok(SentTransaction {
            tx_hash,
            receipt,
            return_value,
            transaction: tx,
        })
    }

    /// Pending-aware nonce selection: with unconfirmed transactions in the
    /// mempool the new transaction chains behind them.
    async fn next_nonce(&self) -> ClientResult<u64> {
        let (pending_count, confirmed_count) = tokio::try_join!(
            self.submitter.transaction_count(self.sender, true),
            self.submitter.transaction_count(self.sender, false)
        )?;
        let has_pending = pending_count > confirmed_count;
        let nonce = if has_pending {
            pending_count
        } else {
            confirmed_count
        };
        debug!(
            "[KmsTransactionSigner] Nonce {} for {:?} (pending {}, confirmed {})",
            nonce, self.sender, pending_count, confirmed_count
        );
        Ok(nonce)
    }

    fn build_unsigned(
        &self,
        call: &TransactionCall,
        fees: &FeeConfig,
        nonce: u64,
        chain_id: u64,
    ) -> ClientResult<TypedTransaction> {
        match (fees.max_fee_per_gas, fees.max_priority_fee_per_gas) {
            (Some(max_fee), Some(priority_fee)) => {
                // Double the supplied cap as a margin against base-fee drift
                // between estimation and inclusion; the effective fee still
                // tracks the actual base fee.
                let request = Eip1559TransactionRequest::new()
                    .from(self.sender)
                    .to(call.to)
                    .data(call.data.clone())
                    .value(call.value)
                    .nonce(nonce)
                    .chain_id(chain_id)
                    .max_fee_per_gas(max_fee * 2)
                    .max_priority_fee_per_gas(priority_fee);
                Ok(TypedTransaction::Eip1559(request))
            }
            (None, None) => match fees.gas_price {
                Some(gas_price) => {
                    let request = TransactionRequest::new()
                        .from(self.sender)
                        .to(call.to)
                        .data(call.data.clone())
                        .value(call.value)
                        .nonce(nonce)
                        .chain_id(chain_id)
                        .gas_price(gas_price);
                    Ok(TypedTransaction::Legacy(request))
                }
                None => Err(ClientError::Configuration(
                    "fee config needs either both EIP-1559 caps or a legacy gas price".to_string(),
                )),
            },
            _ => Err(ClientError::Configuration(
                "EIP-1559 fee config needs both max-fee and max-priority-fee".to_string(),
            )),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> ClientResult<TransactionReceipt> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.submitter.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(ClientError::Signing {
            kind: SigningErrorKind::Submission,
            message: format!("no receipt for {:?} after broadcast", tx_hash),
        })
    }
}

/// Submitter over an ethers provider.
pub struct EthTransactionSubmitter<P> {
    provider: ethers::providers::Provider<P>,
}

impl<P> EthTransactionSubmitter<P>
where
    P: ethers::providers::JsonRpcClient + 'static,
{
    pub fn new(provider: ethers::providers::Provider<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> TransactionSubmitter for EthTransactionSubmitter<P>
where
    P: ethers::providers::JsonRpcClient + 'static,
{
    async fn chain_id(&self) -> ClientResult<u64> {
        use ethers::providers::Middleware;
        Ok(self
            .provider
            .get_chainid()
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("chain id: {}", e)))?
            .as_u64())
    }

    async fn transaction_count(&self, account: Address, pending: bool) -> ClientResult<u64> {
        use ethers::providers::Middleware;
        use ethers::types::BlockNumber;
        let block = if pending {
            BlockNumber::Pending
        } else {
            BlockNumber::Latest
        };
        Ok(self
            .provider
            .get_transaction_count(account, Some(block.into()))
            .await
            .map_err(|e| {
                ClientError::TransientProviderError(format!("transaction count: {}", e))
            })?
            .as_u64())
    }

    async fn call(&self, tx: &TypedTransaction) -> ClientResult<Bytes> {
        use ethers::providers::Middleware;
        self.provider
            .call(tx, None)
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("call: {}", e)))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ClientResult<U256> {
        use ethers::providers::Middleware;
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("estimate gas: {}", e)))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ClientResult<H256> {
        use ethers::providers::Middleware;
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("broadcast: {}", e)))?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> ClientResult<Option<TransactionReceipt>> {
        use ethers::providers::Middleware;
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("receipt: {}", e)))
    }
}

/// Adjust the recovery id for the transaction type: EIP-155 `v` for legacy
/// transactions, raw parity for typed ones.
fn normalize_v(signature: Signature, tx: &TypedTransaction, chain_id: u64) -> Signature {
    let recovery = signature.v;
    let v = match tx {
        TypedTransaction::Legacy(_) => chain_id * 2 + 35 + recovery,
        _ => recovery,
    };
    Signature { v, ..signature }
}
