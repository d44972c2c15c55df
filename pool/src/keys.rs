//! Master pool keys derived from a wallet signature.
//!
//! The wallet signs [`POOL_SIGN_MESSAGE`] once per session (EIP-191 personal
//! message); the 65-byte signature is reduced into two scalars under
//! distinct domain separators. The keys live in memory for the session and
//! are zeroized on drop - nothing here is ever persisted.

use ark_bn254::Fr;
use ethers::utils::keccak256;
use zeroize::Zeroize;

use crate::field::bytes_to_field;

/// Fixed human-readable message the wallet signs to unlock the pool account.
/// Changing a single byte changes every derived secret, so this string is a
/// compatibility contract with the deployed frontends.
pub const POOL_SIGN_MESSAGE: &str = "Unlock your Galeon privacy account.\n\n\
This signature deterministically derives your private pool keys. \
Only sign this message on applications you trust.";

/// Domain separator for the nullifier-side master scalar.
const NULLIFIER_DOMAIN: &[u8] = b"GALEON/POOL/NULLIFIER";

/// Domain separator for the secret-side master scalar.
const SECRET_DOMAIN: &[u8] = b"GALEON/POOL/SECRET";

/// The per-session master key pair.
///
/// Clone is intentionally not derived; there is exactly one owner per
/// session and copies would escape the zeroize-on-drop guarantee.
pub struct MasterKeys {
    master_nullifier: Fr,
    master_secret: Fr,
}

impl MasterKeys {
    /// Derive the key pair from a wallet signature of [`POOL_SIGN_MESSAGE`].
    ///
    /// Deterministic: the same signature always yields the same keys, which
    /// is what makes no-notes recovery possible.
    pub fn from_signature(signature: &[u8]) -> Self {
        Self {
            master_nullifier: hash_with_domain(NULLIFIER_DOMAIN, signature),
            master_secret: hash_with_domain(SECRET_DOMAIN, signature),
        }
    }

    /// Construct directly from two scalars. Test and vector tooling only;
    /// production sessions always come from a signature.
    pub fn from_scalars(master_nullifier: Fr, master_secret: Fr) -> Self {
        Self {
            master_nullifier,
            master_secret,
        }
    }

    pub fn master_nullifier(&self) -> Fr {
        self.master_nullifier
    }

    pub fn master_secret(&self) -> Fr {
        self.master_secret
    }
}

impl Drop for MasterKeys {
    fn drop(&mut self) {
        self.master_nullifier.zeroize();
        self.master_secret.zeroize();
    }
}

impl std::fmt::Debug for MasterKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeys").finish_non_exhaustive()
    }
}

fn hash_with_domain(domain: &[u8], signature: &[u8]) -> Fr {
    let mut preimage = Vec::with_capacity(domain.len() + signature.len());
    preimage.extend_from_slice(domain);
    preimage.extend_from_slice(signature);
    let digest = keccak256(&preimage);
    preimage.zeroize();
    bytes_to_field(&digest)
}
