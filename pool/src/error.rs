//! Error type shared across the pool engine.

use ethers::types::U256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("field element out of range: {0} is not below the BN254 scalar modulus")]
    FieldOutOfRange(U256),

    #[error("invalid field element encoding: {0}")]
    FieldEncoding(String),

    #[error("leaf {0} is not in the tree")]
    TreeLeafNotFound(String),

    #[error("merkle proof did not verify")]
    TreeProofInvalid,

    #[error("no child commitment matched label {label} within {max} indices")]
    RecoveryChildNotFound { label: String, max: u64 },

    #[error("nullifier state mismatch while tracing deposit {deposit_index}: {detail}")]
    RecoveryNullifierMismatch { deposit_index: u64, detail: String },

    #[error("event chain inconsistent: {0}")]
    ChainInconsistency(String),

    #[error("withdrawal witness invariant violated: {0}")]
    WitnessInvariantViolated(String),

    #[error("prover failed: {0}")]
    ProverFailure(String),

    #[error("proof generation cancelled")]
    ProverCancelled,

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("root publication failed: {0}")]
    RootPublishFailed(String),
}
