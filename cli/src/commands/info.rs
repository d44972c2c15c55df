//! Show configuration, on-chain pool state and the published ASP root.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use ethers::providers::{Http, Provider};
use galeon_asp::chain::EntrypointContract;
use galeon_pool::contract::PoolReader;
use galeon_pool::field::{field_to_hex, u256_to_field};

use crate::config;

pub async fn run() -> Result<()> {
    let config = config::load_config()?;

    println!("{}", "Configuration".bold());
    println!("  Path:       {:?}", config::config_file());
    println!("  RPC:        {}", config.rpc_url);
    println!("  Pool:       {:#x}", config.pool);
    println!("  Entrypoint: {:#x}", config.entrypoint);
    match &config.asp_store_dir {
        Some(dir) => println!("  ASP store:  {:?}", dir),
        None => println!("  ASP store:  {}", "not configured".dimmed()),
    }
    println!();

    let provider = Arc::new(
        Provider::<Http>::try_from(config.rpc_url.as_str()).context("invalid RPC URL")?,
    );

    let state = PoolReader::new(provider.clone(), config.pool)
        .state()
        .await
        .context("failed to read pool state")?;
    println!("{}", "Pool".bold());
    println!("  Scope:      {}", field_to_hex(&state.scope));
    println!("  Root:       {}", field_to_hex(&state.root));
    println!("  Tree size:  {}", state.tree_size);
    println!("  Tree depth: {}", state.tree_depth);
    println!();

    let entrypoint = EntrypointContract::new(config.entrypoint, provider);
    match entrypoint.latest_root().call().await {
        Ok(raw) => {
            let root = u256_to_field(raw)?;
            println!("{}", "Association Set".bold());
            println!("  Published root: {}", field_to_hex(&root));
        }
        Err(e) => {
            println!(
                "{}",
                format!("Could not read the published ASP root: {e}").yellow()
            );
        }
    }

    Ok(())
}
