//! Chain-facing implementations of the service seams: the deposit-label
//! indexer over `eth_getLogs` and the entrypoint root publisher.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Filter, H256};
use galeon_pool::events::{decode_pool_log, PoolEvent};
use galeon_pool::field::{field_to_u256, u256_to_field};
use galeon_pool::{Fr, PoolError};

use crate::error::AspError;
use crate::service::{LabelFeed, NewLabel, RootPublisher};

/// Blocks per `eth_getLogs` page while scanning for deposits.
const PAGE_BLOCKS: u64 = 2_000;

abigen!(
    EntrypointContract,
    r#"[
        function updateRoot(uint256 root, string ipfsCID) external returns (uint256)
        function latestRoot() external view returns (uint256)
    ]"#
);

/// Deposit-label indexer reading `Deposited` logs from the pool contract.
pub struct EthersLabelFeed {
    provider: Arc<Provider<Http>>,
    pool: Address,
}

impl EthersLabelFeed {
    pub fn new(provider: Arc<Provider<Http>>, pool: Address) -> Self {
        Self { provider, pool }
    }
}

#[async_trait]
impl LabelFeed for EthersLabelFeed {
    async fn labels_from(&self, from_block: u64) -> Result<Vec<NewLabel>, AspError> {
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?
            .as_u64();

        let mut labels = Vec::new();
        let mut cursor = from_block;
        while cursor <= head {
            let to_block = (cursor + PAGE_BLOCKS - 1).min(head);
            let filter = Filter::new()
                .address(self.pool)
                .from_block(cursor)
                .to_block(to_block);
            let logs = self
                .provider
                .get_logs(&filter)
                .await
                .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;

            for log in &logs {
                if let Some(PoolEvent::Deposited(event)) =
                    decode_pool_log(log).map_err(AspError::Pool)?
                {
                    labels.push(NewLabel {
                        label: event.label,
                        block_number: event.block_number,
                        log_index: event.log_index,
                    });
                }
            }
            tracing::debug!(from = cursor, to = to_block, total = labels.len(), "scanned deposits");
            cursor = to_block + 1;
        }
        Ok(labels)
    }
}

/// Root publisher over the entrypoint contract, signing with a local key.
pub struct EthersRootPublisher {
    contract: EntrypointContract<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl EthersRootPublisher {
    pub fn new(
        provider: Arc<Provider<Http>>,
        entrypoint: Address,
        wallet: LocalWallet,
    ) -> Self {
        let client = Arc::new(SignerMiddleware::new(provider.as_ref().clone(), wallet));
        Self {
            contract: EntrypointContract::new(entrypoint, client),
        }
    }
}

#[async_trait]
impl RootPublisher for EthersRootPublisher {
    async fn publish_root(&self, root: Fr, ipfs_cid: &str) -> Result<H256, AspError> {
        let call = self
            .contract
            .update_root(field_to_u256(&root), ipfs_cid.to_string());
        let pending = call
            .send()
            .await
            .map_err(|e| PoolError::RootPublishFailed(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| PoolError::RootPublishFailed(e.to_string()))?
            .ok_or_else(|| PoolError::RootPublishFailed("transaction dropped".into()))?;
        if receipt.status != Some(1u64.into()) {
            return Err(PoolError::RootPublishFailed(format!(
                "transaction {:#x} reverted",
                receipt.transaction_hash
            ))
            .into());
        }
        Ok(receipt.transaction_hash)
    }

    async fn latest_root(&self) -> Result<Fr, AspError> {
        let raw = self
            .contract
            .latest_root()
            .call()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;
        Ok(u256_to_field(raw)?)
    }
}
