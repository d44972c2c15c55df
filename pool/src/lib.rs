//! Galeon Privacy Pool client engine.
//!
//! Everything a wallet session needs to use the pool without local state:
//! derive deterministic secrets from one wallet signature, recover the
//! active commitment set from chain events (including merge and partial
//! withdrawal chains), and assemble + prove withdrawal witnesses.
//!
//! The chain, the Solidity contracts and the Groth16 circuits are external
//! collaborators: events come in through [`events::EventFeed`], contract
//! views through [`contract::PoolReader`], and proving through the opaque
//! [`prover::ProverBackend`].

pub mod commitment;
pub mod contract;
pub mod error;
pub mod events;
pub mod field;
pub mod keys;
pub mod merkle;
pub mod poseidon;
pub mod prover;
pub mod recovery;
pub mod withdrawal;


pub use error::PoolError;
pub use field::{Fr, MAX_TREE_DEPTH, SNARK_SCALAR_FIELD};
pub use keys::{MasterKeys, POOL_SIGN_MESSAGE};
pub use merkle::{LeanImt, MerkleProof};
pub use recovery::{ActiveDeposit, CancelFlag, RecoveryOutcome};
