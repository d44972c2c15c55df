//! Recover the active deposit set from chain events.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use ethers::providers::{Http, Provider};
use ethers::utils::format_units;
use galeon_pool::contract::PoolReader;
use galeon_pool::events::EthersEventFeed;
use galeon_pool::field::field_to_hex;
use galeon_pool::recovery::recover;
use galeon_pool::CancelFlag;

use crate::config;
use crate::session;

pub async fn run(key_env: &str) -> Result<()> {
    let config = config::load_config()?;
    let wallet = session::wallet_from_env(key_env)?;

    println!("{}", "Unlocking pool session...".cyan());
    let keys = session::unlock(&wallet).await?;

    let provider = Arc::new(
        Provider::<Http>::try_from(config.rpc_url.as_str()).context("invalid RPC URL")?,
    );
    let scope = PoolReader::new(provider.clone(), config.pool)
        .scope()
        .await
        .context("failed to read the pool scope")?;

    println!("Scanning pool events from block {}...", config.start_block);
    let mut feed = EthersEventFeed::new(provider, config.pool, config.start_block);
    let outcome = recover(&keys, scope, &mut feed, &CancelFlag::new()).await?;

    println!();
    if outcome.deposits.is_empty() {
        println!("{}", "No active deposits found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} active deposit(s):", outcome.deposits.len())
                .green()
                .bold()
        );
        println!();

        for (i, deposit) in outcome.deposits.iter().enumerate() {
            let eth = format_units(deposit.value, "ether").unwrap_or_else(|_| "?".into());
            println!("{}. {}", i + 1, "Deposit".yellow());
            println!("   Value:      {} ETH", eth);
            println!("   Label:      {}", field_to_hex(&deposit.label));
            println!("   Commitment: {}", field_to_hex(&deposit.commitment_hash));
            println!("   Index:      {}", deposit.index);
            println!("   Block:      {}", deposit.block_number);
            println!();
        }
    }

    if outcome.merges_traversed > 0 {
        println!(
            "{}",
            format!("Traversed {} merge(s).", outcome.merges_traversed).dimmed()
        );
    }
    for issue in &outcome.issues {
        println!(
            "{}",
            format!(
                "Deposit {} could not be fully traced: {}",
                issue.deposit_index, issue.error
            )
            .red()
        );
    }
    if !outcome.deposits.is_empty() {
        println!(
            "{}",
            "Use 'galeon withdraw --commitment <hash> --amount <wei> --recipient <addr>'."
                .dimmed()
        );
    }

    Ok(())
}
