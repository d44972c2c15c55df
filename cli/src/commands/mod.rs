pub mod info;
pub mod init;
pub mod proof_encode;
pub mod recover;
pub mod withdraw;

use ethers::types::U256;

/// Full-width `0x`-padded hex of a verifier calldata word.
pub(crate) fn word_hex(word: &U256) -> String {
    format!("0x{:0>64}", format!("{word:x}"))
}
