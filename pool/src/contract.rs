//! Read-only bindings for the pool contract views the engine consults.

use std::sync::Arc;

use ark_bn254::Fr;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::Address;

use crate::error::PoolError;
use crate::field::u256_to_field;

abigen!(
    PrivacyPoolContract,
    r#"[
        function SCOPE() external view returns (uint256)
        function currentRoot() external view returns (uint256)
        function currentTreeDepth() external view returns (uint256)
        function currentTreeSize() external view returns (uint256)
    ]"#
);

/// Native-asset sentinel used in withdrawal data for the chain's base asset.
pub const NATIVE_ASSET: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

/// Snapshot of the pool's public tree state.
#[derive(Clone, Copy, Debug)]
pub struct PoolState {
    pub scope: Fr,
    pub root: Fr,
    pub tree_depth: u64,
    pub tree_size: u64,
}

/// Typed reader over the deployed pool.
pub struct PoolReader {
    contract: PrivacyPoolContract<Provider<Http>>,
}

impl PoolReader {
    pub fn new(provider: Arc<Provider<Http>>, pool: Address) -> Self {
        Self {
            contract: PrivacyPoolContract::new(pool, provider),
        }
    }

    /// The pool-identifying scope bound into every derived secret.
    pub async fn scope(&self) -> Result<Fr, PoolError> {
        let raw = self
            .contract
            .scope()
            .call()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;
        u256_to_field(raw)
    }

    pub async fn state(&self) -> Result<PoolState, PoolError> {
        let scope = self.scope().await?;
        let root = self
            .contract
            .current_root()
            .call()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;
        let depth = self
            .contract
            .current_tree_depth()
            .call()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;
        let size = self
            .contract
            .current_tree_size()
            .call()
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;
        Ok(PoolState {
            scope,
            root: u256_to_field(root)?,
            tree_depth: depth.as_u64(),
            tree_size: size.as_u64(),
        })
    }
}
