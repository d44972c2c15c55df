//! Re-encode a snarkjs proof into the verifier's calldata layout.

use anyhow::{Context, Result};
use colored::Colorize;
use galeon_pool::prover::{parse_public_signals, Groth16Proof};

pub fn run(proof_path: &str, public_path: &str) -> Result<()> {
    let proof_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(proof_path)
            .with_context(|| format!("failed to read {proof_path}"))?,
    )
    .context("proof file is not valid JSON")?;
    let public_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(public_path)
            .with_context(|| format!("failed to read {public_path}"))?,
    )
    .context("public signals file is not valid JSON")?;

    let proof = Groth16Proof::from_snarkjs(&proof_json)?;
    let signals = parse_public_signals(&public_json)?;

    println!("{}", "Proof (verifier word order):".bold());
    for word in proof.to_contract_words() {
        println!("  {}", super::word_hex(&word));
    }
    println!();
    println!("{}", "Public signals:".bold());
    for signal in &signals {
        println!("  {}", super::word_hex(signal));
    }

    Ok(())
}
