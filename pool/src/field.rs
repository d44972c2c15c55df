//! BN254 scalar field elements and their chain-boundary conversions.
//!
//! Everything the engine hashes - secrets, labels, commitments, tree nodes -
//! is an `Fr`, which is reduced by construction. Values arriving from chain
//! data are `U256` and must pass an explicit range check before they become
//! field elements; values we produce convert back losslessly.

use ark_ff::{BigInteger, PrimeField};
use ethers::types::U256;

use crate::error::PoolError;

pub use ark_bn254::Fr;

/// BN254 scalar field modulus, decimal. Matches the circuits' SNARK field.
pub const SNARK_SCALAR_FIELD: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Circuit-side sibling padding bound for both the state and ASP trees.
pub const MAX_TREE_DEPTH: usize = 32;

/// Interpret arbitrary bytes as a big-endian integer reduced mod p.
///
/// Only for externally produced byte strings (signature-derived key
/// material, keccak digests). Chain-consumed `uint256` values go through
/// [`u256_to_field`] instead, which rejects out-of-range input.
pub fn bytes_to_field(bytes: &[u8]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// The field modulus as a `U256`, for boundary checks.
pub fn modulus_u256() -> U256 {
    U256::from_big_endian(&Fr::MODULUS.to_bytes_be())
}

/// Checked conversion from a chain `uint256`.
pub fn u256_to_field(value: U256) -> Result<Fr, PoolError> {
    if value >= modulus_u256() {
        return Err(PoolError::FieldOutOfRange(value));
    }
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    Ok(Fr::from_be_bytes_mod_order(&buf))
}

/// Exact conversion back to a chain `uint256`.
pub fn field_to_u256(value: &Fr) -> U256 {
    U256::from_big_endian(&value.into_bigint().to_bytes_be())
}

/// Big-endian 32-byte form, for hashing and hex display.
pub fn field_to_bytes(value: &Fr) -> [u8; 32] {
    let repr = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - repr.len()..].copy_from_slice(&repr);
    out
}

/// `0x`-prefixed lowercase hex of the canonical 32-byte form.
pub fn field_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(field_to_bytes(value)))
}

/// Parse a field element from `0x`-hex or decimal text, range-checked.
pub fn field_from_str(s: &str) -> Result<Fr, PoolError> {
    let value = if let Some(stripped) = s.strip_prefix("0x") {
        U256::from_str_radix(stripped, 16)
            .map_err(|_| PoolError::FieldEncoding(s.to_string()))?
    } else {
        U256::from_dec_str(s).map_err(|_| PoolError::FieldEncoding(s.to_string()))?
    };
    u256_to_field(value)
}

/// Decimal string of the canonical value, the form circom witnesses use.
pub fn field_to_decimal(value: &Fr) -> String {
    field_to_u256(value).to_string()
}
