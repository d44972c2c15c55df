//! Commitment algebra: pure functions from master keys to the field
//! elements the pool contract and circuits operate on.
//!
//! Derivation tree per deposit:
//!
//! ```text
//! (masterNullifier, masterSecret)
//!   └─ depositSecrets(scope, i)      -> (n, s), pre = Poseidon(n, s)
//!        └─ commitment = Poseidon(value, label, pre)
//!             └─ withdrawalSecrets(label, j) -> child (n', s') per spend
//! ```

use ark_bn254::Fr;

use crate::keys::MasterKeys;
use crate::poseidon::{hash1, hash2, hash3};

/// Secrets for one original deposit slot under a pool scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositSecrets {
    pub nullifier: Fr,
    pub secret: Fr,
    pub precommitment_hash: Fr,
}

/// Derive the deposit secrets for `(scope, index)`.
///
/// `nullifier = Poseidon(masterNullifier, scope, index)`,
/// `secret = Poseidon(masterSecret, scope, index)`,
/// `precommitment = Poseidon(nullifier, secret)`.
pub fn deposit_secrets(keys: &MasterKeys, scope: Fr, index: u64) -> DepositSecrets {
    let index = Fr::from(index);
    let nullifier = hash3(keys.master_nullifier(), scope, index);
    let secret = hash3(keys.master_secret(), scope, index);
    DepositSecrets {
        nullifier,
        secret,
        precommitment_hash: hash2(nullifier, secret),
    }
}

/// Derive the child secrets used when spending under `label`.
///
/// Keyed by label rather than scope so merged and change commitments stay
/// recoverable without knowing their position in the state tree.
pub fn withdrawal_secrets(keys: &MasterKeys, label: Fr, child_index: u64) -> (Fr, Fr) {
    let child_index = Fr::from(child_index);
    (
        hash3(keys.master_nullifier(), label, child_index),
        hash3(keys.master_secret(), label, child_index),
    )
}

/// `Poseidon(nullifier, secret)`
pub fn precommitment_hash(nullifier: Fr, secret: Fr) -> Fr {
    hash2(nullifier, secret)
}

/// `Poseidon(value, label, precommitment)` - the state-tree leaf.
pub fn commitment_hash(value: Fr, label: Fr, precommitment: Fr) -> Fr {
    hash3(value, label, precommitment)
}

/// `Poseidon(nullifier)` - revealed on spend.
pub fn nullifier_hash(nullifier: Fr) -> Fr {
    hash1(nullifier)
}
