//! Withdrawal witness assembly.
//!
//! Collects everything the withdrawal circuit proves over: the state-tree
//! inclusion of the spent commitment, the ASP inclusion of its label, the
//! context binding to the relay destination, and the fresh child secrets
//! the change commitment is built from. Validation is fail-fast: an
//! inconsistent witness is never handed to the prover.

use std::collections::BTreeSet;

use ark_bn254::Fr;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use serde_json::{json, Value};
use zeroize::Zeroize;

use crate::commitment::{commitment_hash, nullifier_hash, precommitment_hash, withdrawal_secrets};
use crate::error::PoolError;
use crate::field::{bytes_to_field, field_to_decimal, field_to_u256, u256_to_field, MAX_TREE_DEPTH};
use crate::keys::MasterKeys;
use crate::merkle::{LeanImt, MerkleProof};
use crate::recovery::ActiveDeposit;

/// The relay destination a withdrawal commits to: the processooor address
/// and the opaque relay payload consumed by the pool's relay method.
#[derive(Clone, Debug)]
pub struct WithdrawalRequest {
    pub processooor: Address,
    pub data: Bytes,
}

/// `keccak256(abi.encode((processooor, data), scope)) mod p`.
///
/// Bound into the proof so a withdrawal cannot be replayed against another
/// pool or redirected to another destination.
pub fn context_hash(request: &WithdrawalRequest, scope: Fr) -> Fr {
    let encoded = encode(&[
        Token::Tuple(vec![
            Token::Address(request.processooor),
            Token::Bytes(request.data.to_vec()),
        ]),
        Token::Uint(field_to_u256(&scope)),
    ]);
    bytes_to_field(&keccak256(encoded))
}

/// The full Groth16 witness, public and private halves.
pub struct WithdrawalWitness {
    pub withdrawn_value: U256,
    pub state_root: Fr,
    pub state_tree_depth: usize,
    pub asp_root: Fr,
    pub asp_tree_depth: usize,
    pub context: Fr,
    pub label: Fr,
    pub existing_value: U256,
    pub existing_nullifier: Fr,
    pub existing_secret: Fr,
    pub new_nullifier: Fr,
    pub new_secret: Fr,
    pub state_siblings: Vec<Fr>,
    pub state_index: u64,
    pub asp_siblings: Vec<Fr>,
    pub asp_index: u64,
}

impl WithdrawalWitness {
    /// Serialize in the circuit's input layout: decimal strings, sibling
    /// arrays padded to [`MAX_TREE_DEPTH`].
    pub fn to_prover_inputs(&self) -> Value {
        let decimals = |siblings: &[Fr]| -> Vec<String> {
            siblings.iter().map(field_to_decimal).collect()
        };
        json!({
            "withdrawnValue": self.withdrawn_value.to_string(),
            "stateRoot": field_to_decimal(&self.state_root),
            "stateTreeDepth": self.state_tree_depth.to_string(),
            "ASPRoot": field_to_decimal(&self.asp_root),
            "ASPTreeDepth": self.asp_tree_depth.to_string(),
            "context": field_to_decimal(&self.context),
            "label": field_to_decimal(&self.label),
            "existingValue": self.existing_value.to_string(),
            "existingNullifier": field_to_decimal(&self.existing_nullifier),
            "existingSecret": field_to_decimal(&self.existing_secret),
            "newNullifier": field_to_decimal(&self.new_nullifier),
            "newSecret": field_to_decimal(&self.new_secret),
            "stateSiblings": decimals(&self.state_siblings),
            "stateIndex": self.state_index.to_string(),
            "ASPSiblings": decimals(&self.asp_siblings),
            "ASPIndex": self.asp_index.to_string(),
        })
    }
}

impl Drop for WithdrawalWitness {
    fn drop(&mut self) {
        self.existing_nullifier.zeroize();
        self.existing_secret.zeroize();
        self.new_nullifier.zeroize();
        self.new_secret.zeroize();
    }
}

impl std::fmt::Debug for WithdrawalWitness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalWitness")
            .field("withdrawn_value", &self.withdrawn_value)
            .field("state_root", &self.state_root)
            .field("state_tree_depth", &self.state_tree_depth)
            .field("asp_root", &self.asp_root)
            .field("asp_tree_depth", &self.asp_tree_depth)
            .field("context", &self.context)
            .field("label", &self.label)
            .field("existing_value", &self.existing_value)
            .field("existing_nullifier", &"<redacted>")
            .field("existing_secret", &"<redacted>")
            .field("new_nullifier", &"<redacted>")
            .field("new_secret", &"<redacted>")
            .field("state_siblings", &self.state_siblings)
            .field("state_index", &self.state_index)
            .field("asp_siblings", &self.asp_siblings)
            .field("asp_index", &self.asp_index)
            .finish()
    }
}

/// Witness plus the public values the contract will see.
#[derive(Debug)]
pub struct WithdrawalInputs {
    pub witness: WithdrawalWitness,
    pub new_commitment_hash: Fr,
    pub existing_nullifier_hash: Fr,
    /// Child index consumed for the change commitment; callers record it
    /// so the next spend under this label picks a fresh one.
    pub child_index: u64,
}

/// Assemble and validate the withdrawal witness.
///
/// `used_children` are the child indices already consumed under the
/// deposit's label (from recovery); the change secrets use the smallest
/// unused index.
pub fn build_withdrawal(
    keys: &MasterKeys,
    deposit: &ActiveDeposit,
    withdrawn_value: U256,
    state_tree: &LeanImt,
    asp_proof: &MerkleProof,
    request: &WithdrawalRequest,
    scope: Fr,
    used_children: &BTreeSet<u64>,
) -> Result<WithdrawalInputs, PoolError> {
    // value bounds first, everything downstream hashes them
    let existing_value = u256_to_field(deposit.value)?;
    u256_to_field(withdrawn_value)?;
    if withdrawn_value > deposit.value {
        return Err(PoolError::WitnessInvariantViolated(format!(
            "withdrawn value {} exceeds balance {}",
            withdrawn_value, deposit.value
        )));
    }
    if withdrawn_value.is_zero() {
        return Err(PoolError::WitnessInvariantViolated(
            "withdrawn value must be non-zero".into(),
        ));
    }

    // the secrets must actually open the on-chain leaf
    let pre = precommitment_hash(deposit.nullifier, deposit.secret);
    if commitment_hash(existing_value, deposit.label, pre) != deposit.commitment_hash {
        return Err(PoolError::WitnessInvariantViolated(
            "deposit secrets do not open the recorded commitment".into(),
        ));
    }

    let state_proof = state_tree.proof_of(&deposit.commitment_hash)?;
    if !state_proof.verify() {
        return Err(PoolError::TreeProofInvalid);
    }

    if asp_proof.leaf != deposit.label {
        return Err(PoolError::WitnessInvariantViolated(
            "ASP proof is not for the deposit's label".into(),
        ));
    }
    if asp_proof.siblings.len() != MAX_TREE_DEPTH {
        return Err(PoolError::WitnessInvariantViolated(format!(
            "ASP siblings must be padded to {MAX_TREE_DEPTH}"
        )));
    }
    if !asp_proof.verify() {
        return Err(PoolError::TreeProofInvalid);
    }

    let child_index = next_unused(used_children);
    let (new_nullifier, new_secret) = withdrawal_secrets(keys, deposit.label, child_index);

    let remaining = deposit.value - withdrawn_value;
    let new_commitment = commitment_hash(
        u256_to_field(remaining)?,
        deposit.label,
        precommitment_hash(new_nullifier, new_secret),
    );

    let witness = WithdrawalWitness {
        withdrawn_value,
        state_root: state_proof.root,
        state_tree_depth: state_proof.depth,
        asp_root: asp_proof.root,
        asp_tree_depth: asp_proof.depth,
        context: context_hash(request, scope),
        label: deposit.label,
        existing_value: deposit.value,
        existing_nullifier: deposit.nullifier,
        existing_secret: deposit.secret,
        new_nullifier,
        new_secret,
        state_siblings: state_proof.siblings.clone(),
        state_index: state_proof.index,
        asp_siblings: asp_proof.siblings.clone(),
        asp_index: asp_proof.index,
    };

    Ok(WithdrawalInputs {
        witness,
        new_commitment_hash: new_commitment,
        existing_nullifier_hash: nullifier_hash(deposit.nullifier),
        child_index,
    })
}

fn next_unused(used: &BTreeSet<u64>) -> u64 {
    let mut candidate = 0u64;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::deposit_secrets;
    use ethers::types::H256;

    fn keys() -> MasterKeys {
        MasterKeys::from_scalars(Fr::from(1u64), Fr::from(2u64))
    }

    fn setup() -> (MasterKeys, Fr, ActiveDeposit, LeanImt, LeanImt, MerkleProof) {
        let keys = keys();
        let scope = Fr::from(0x10u64);
        let label = Fr::from(0xAu64);
        let value = U256::from(1_000_000_000_000_000_000u64);

        let secrets = deposit_secrets(&keys, scope, 0);
        let commitment = commitment_hash(
            u256_to_field(value).unwrap(),
            label,
            secrets.precommitment_hash,
        );

        let state_tree = LeanImt::from_leaves([Fr::from(99u64), commitment, Fr::from(7u64)]);
        let asp_tree = LeanImt::from_leaves([Fr::from(0x9u64), label]);
        let asp_proof = asp_tree.proof_of(&label).unwrap();

        let deposit = ActiveDeposit {
            index: 0,
            nullifier: secrets.nullifier,
            secret: secrets.secret,
            precommitment_hash: secrets.precommitment_hash,
            value,
            label,
            block_number: 1,
            tx_hash: H256::zero(),
            commitment_hash: commitment,
        };
        (keys, scope, deposit, state_tree, asp_tree, asp_proof)
    }

    fn request() -> WithdrawalRequest {
        WithdrawalRequest {
            processooor: Address::repeat_byte(0x11),
            data: Bytes::from(vec![0xde, 0xad]),
        }
    }

    #[test]
    fn test_builds_valid_witness() {
        let (keys, scope, deposit, state_tree, _asp, asp_proof) = setup();
        let withdrawn = U256::from(400_000_000_000_000_000u64);

        let inputs = build_withdrawal(
            &keys,
            &deposit,
            withdrawn,
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap();

        assert_eq!(inputs.child_index, 0);
        assert_eq!(inputs.witness.withdrawn_value, withdrawn);
        assert_eq!(inputs.witness.state_root, state_tree.root());
        assert_eq!(inputs.witness.state_siblings.len(), MAX_TREE_DEPTH);
        assert_eq!(
            inputs.existing_nullifier_hash,
            nullifier_hash(deposit.nullifier)
        );

        // change commitment opens with the derived child secrets
        let remaining = deposit.value - withdrawn;
        let (n, s) = withdrawal_secrets(&keys, deposit.label, 0);
        assert_eq!(
            inputs.new_commitment_hash,
            commitment_hash(
                u256_to_field(remaining).unwrap(),
                deposit.label,
                precommitment_hash(n, s)
            )
        );
    }

    #[test]
    fn test_full_withdrawal_commits_to_zero_value() {
        let (keys, scope, deposit, state_tree, _asp, asp_proof) = setup();

        let inputs = build_withdrawal(
            &keys,
            &deposit,
            deposit.value,
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap();

        let (n, s) = withdrawal_secrets(&keys, deposit.label, 0);
        assert_eq!(
            inputs.new_commitment_hash,
            commitment_hash(Fr::from(0u64), deposit.label, precommitment_hash(n, s))
        );
    }

    #[test]
    fn test_rejects_overdraw() {
        let (keys, scope, deposit, state_tree, _asp, asp_proof) = setup();
        let err = build_withdrawal(
            &keys,
            &deposit,
            deposit.value + 1,
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PoolError::WitnessInvariantViolated(_)));
    }

    #[test]
    fn test_rejects_commitment_missing_from_state() {
        let (keys, scope, deposit, _state, _asp, asp_proof) = setup();
        let err = build_withdrawal(
            &keys,
            &deposit,
            U256::from(1u64),
            &LeanImt::new(),
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PoolError::TreeLeafNotFound(_)));
    }

    #[test]
    fn test_rejects_secrets_that_do_not_open_the_leaf() {
        let (keys, scope, mut deposit, state_tree, _asp, asp_proof) = setup();
        deposit.secret = Fr::from(0xBADu64);
        let err = build_withdrawal(
            &keys,
            &deposit,
            U256::from(1u64),
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PoolError::WitnessInvariantViolated(_)));
    }

    #[test]
    fn test_rejects_wrong_label_proof() {
        let (keys, scope, deposit, state_tree, asp_tree, _proof) = setup();
        let wrong = asp_tree.proof_of(&Fr::from(0x9u64)).unwrap();
        let err = build_withdrawal(
            &keys,
            &deposit,
            U256::from(1u64),
            &state_tree,
            &wrong,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PoolError::WitnessInvariantViolated(_)));
    }

    #[test]
    fn test_child_index_skips_used() {
        let (keys, scope, deposit, state_tree, _asp, asp_proof) = setup();
        let used: BTreeSet<u64> = [0u64, 1].into_iter().collect();
        let inputs = build_withdrawal(
            &keys,
            &deposit,
            U256::from(1u64),
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &used,
        )
        .unwrap();
        assert_eq!(inputs.child_index, 2);
    }

    #[test]
    fn test_context_binds_destination_and_scope() {
        let scope = Fr::from(0x10u64);
        let a = context_hash(&request(), scope);
        assert_eq!(a, context_hash(&request(), scope));

        let mut other = request();
        other.processooor = Address::repeat_byte(0x22);
        assert_ne!(a, context_hash(&other, scope));

        let mut other = request();
        other.data = Bytes::from(vec![0xbe, 0xef]);
        assert_ne!(a, context_hash(&other, scope));

        assert_ne!(a, context_hash(&request(), Fr::from(0x11u64)));
    }

    #[test]
    fn test_prover_inputs_layout() {
        let (keys, scope, deposit, state_tree, _asp, asp_proof) = setup();
        let inputs = build_withdrawal(
            &keys,
            &deposit,
            U256::from(5u64),
            &state_tree,
            &asp_proof,
            &request(),
            scope,
            &BTreeSet::new(),
        )
        .unwrap();

        let value = inputs.witness.to_prover_inputs();
        assert_eq!(
            value["withdrawnValue"],
            serde_json::Value::String("5".into())
        );
        assert_eq!(value["stateSiblings"].as_array().unwrap().len(), MAX_TREE_DEPTH);
        assert_eq!(value["ASPSiblings"].as_array().unwrap().len(), MAX_TREE_DEPTH);
        // circuit inputs are decimal strings throughout
        assert!(value["stateRoot"].as_str().unwrap().chars().all(|c| c.is_ascii_digit()));
    }
}
