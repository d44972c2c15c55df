//! Session unlock: wallet signature -> master pool keys.
//!
//! The CLI never stores pool keys. Each invocation signs the fixed pool
//! message with the user's wallet key and re-derives the master scalars;
//! they live only for the lifetime of the command.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use galeon_pool::{MasterKeys, POOL_SIGN_MESSAGE};

/// Default environment variable holding the wallet private key.
pub const DEFAULT_KEY_ENV: &str = "GALEON_PRIVATE_KEY";

/// Load the wallet from the given environment variable.
pub fn wallet_from_env(key_env: &str) -> Result<LocalWallet> {
    let key = std::env::var(key_env)
        .with_context(|| format!("wallet key not found in ${key_env}"))?;
    key.trim()
        .parse::<LocalWallet>()
        .context("invalid wallet private key")
}

/// Sign the pool message and derive the session master keys.
pub async fn unlock(wallet: &LocalWallet) -> Result<MasterKeys> {
    let signature = wallet
        .sign_message(POOL_SIGN_MESSAGE)
        .await
        .context("failed to sign the pool unlock message")?;
    Ok(MasterKeys::from_signature(&signature.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x0123456789012345678901234567890123456789012345678901234567890123";

    #[tokio::test]
    async fn test_unlock_is_deterministic() {
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let a = unlock(&wallet).await.unwrap();
        let b = unlock(&wallet).await.unwrap();
        assert_eq!(a.master_nullifier(), b.master_nullifier());
        assert_eq!(a.master_secret(), b.master_secret());
    }

    #[tokio::test]
    async fn test_different_wallets_different_keys() {
        let a_wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let b_wallet: LocalWallet =
            "0x9999999999999999999999999999999999999999999999999999999999999999"
                .parse()
                .unwrap();
        let a = unlock(&a_wallet).await.unwrap();
        let b = unlock(&b_wallet).await.unwrap();
        assert_ne!(a.master_nullifier(), b.master_nullifier());
    }

    #[test]
    fn test_signature_is_eip191_personal() {
        // the derivation consumes the 65-byte r||s||v signature
        let wallet: LocalWallet = TEST_KEY.parse().unwrap();
        let signature = sign_blocking(wallet);
        assert_eq!(signature.len(), 65);
    }

    fn sign_blocking(wallet: LocalWallet) -> Vec<u8> {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(async {
                wallet
                    .sign_message(POOL_SIGN_MESSAGE)
                    .await
                    .unwrap()
                    .to_vec()
            })
    }
}
