use alloy::consensus::Transaction as TransactionTrait;
use alloy::network::TransactionResponse;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::BlockTransactions;
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a single upstream query. `Unavailable` covers transport
/// errors, timeouts and not-yet-available blocks; the monitor loop treats
/// it as "nothing to scan this cycle" rather than an error to propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream<T> {
    Available(T),
    Unavailable,
}

/// Read-only view of a transaction as observed on chain. Raw value and
/// payload keep the provider's full precision (`U256` / `Bytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTx {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub block: u64,
}

/// Source of chain data for the monitor loop. `ChainClient` is the real
/// implementation; tests drive the loop with a scripted source.
#[allow(async_fn_in_trait)]
pub trait BlockSource {
    async fn latest_block_number(&self) -> Upstream<u64>;
    async fn block_transactions(&self, number: u64) -> Upstream<Vec<ObservedTx>>;
}

#[derive(Clone)]
pub struct ChainClient {
    provider: DynProvider,
}

impl ChainClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let parsed_url = rpc_url
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().connect_http(parsed_url).erased();
        Ok(ChainClient { provider })
    }

    fn map_tx<T>(tx: T, block: u64) -> ObservedTx
    where
        T: TransactionTrait + TransactionResponse,
    {
        ObservedTx {
            hash: tx.tx_hash(),
            from: tx.from(),
            to: tx.to(),
            value: tx.value(),
            input: tx.input().clone(),
            block,
        }
    }
}

impl BlockSource for ChainClient {
    async fn latest_block_number(&self) -> Upstream<u64> {
        match timeout(REQUEST_TIMEOUT, self.provider.get_block_number()).await {
            Ok(Ok(number)) => Upstream::Available(number),
            Ok(Err(e)) => {
                warn!("Failed to fetch latest block number: {}", e);
                Upstream::Unavailable
            }
            Err(_) => {
                warn!(
                    "Latest block number request timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                );
                Upstream::Unavailable
            }
        }
    }

    async fn block_transactions(&self, number: u64) -> Upstream<Vec<ObservedTx>> {
        let request = self.provider.get_block_by_number(number.into()).full();
        match timeout(REQUEST_TIMEOUT, request).await {
            Ok(Ok(Some(block))) => {
                let txs = if let BlockTransactions::Full(txs) = block.transactions {
                    txs.into_iter()
                        .map(|tx| Self::map_tx(tx, number))
                        .collect()
                } else {
                    Vec::new()
                };
                Upstream::Available(txs)
            }
            Ok(Ok(None)) => {
                warn!("Block {} not available from provider", number);
                Upstream::Unavailable
            }
            Ok(Err(e)) => {
                warn!("Failed to fetch block {}: {}", number, e);
                Upstream::Unavailable
            }
            Err(_) => {
                warn!(
                    "Block {} request timed out after {}s",
                    number,
                    REQUEST_TIMEOUT.as_secs()
                );
                Upstream::Unavailable
            }
        }
    }
}
