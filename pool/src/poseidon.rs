//! Poseidon hashing over BN254, parameter-compatible with the circuits.
//!
//! Uses the circom parameter set (x^5 S-box, circom round constants and MDS)
//! so that every hash computed here is bit-for-bit what the withdrawal
//! circuit recomputes. Callers hand in already-reduced field elements;
//! the hash itself cannot fail.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

/// Hash 1..=4 field elements with the circom Poseidon instance of that arity.
///
/// The protocol only uses arities 1 (nullifier hash), 2 (node/precommitment)
/// and 3 (secrets, commitments); 4 is headroom for batched tree helpers.
pub fn poseidon(inputs: &[Fr]) -> Fr {
    debug_assert!(
        (1..=4).contains(&inputs.len()),
        "unsupported poseidon arity {}",
        inputs.len()
    );
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len()).expect("supported poseidon arity");
    hasher.hash(inputs).expect("reduced field inputs")
}

/// `Poseidon(a)`
pub fn hash1(a: Fr) -> Fr {
    poseidon(&[a])
}

/// `Poseidon(a, b)`
pub fn hash2(a: Fr, b: Fr) -> Fr {
    poseidon(&[a, b])
}

/// `Poseidon(a, b, c)`
pub fn hash3(a: Fr, b: Fr, c: Fr) -> Fr {
    poseidon(&[a, b, c])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poseidon_deterministic() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);

        assert_eq!(hash2(a, b), hash2(a, b));
        assert_eq!(hash1(a), hash1(a));
        assert_eq!(hash3(a, b, a), hash3(a, b, a));
    }

    #[test]
    fn test_poseidon_order_matters() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);

        assert_ne!(hash2(a, b), hash2(b, a));
    }

    #[test]
    fn test_arity_is_domain_separating() {
        let a = Fr::from(7u64);

        // Same leading input, different arity, different digest
        assert_ne!(hash1(a), hash2(a, Fr::from(0u64)));
        assert_ne!(hash2(a, a), hash3(a, a, Fr::from(0u64)));
    }
}
