//! Write the CLI configuration file.

use std::path::PathBuf;

use anyhow::{bail, Result};
use colored::Colorize;
use ethers::types::Address;

use crate::config::{self, GaleonConfig, ProverConfig};

pub struct InitOptions {
    pub rpc_url: String,
    pub pool: Address,
    pub entrypoint: Address,
    pub start_block: u64,
    pub asp_store: Option<String>,
    pub force: bool,
}

pub fn run(options: InitOptions) -> Result<()> {
    if config::config_exists() && !options.force {
        bail!(
            "Configuration already exists at {:?}. Use --force to overwrite.",
            config::config_file()
        );
    }

    let config = GaleonConfig {
        rpc_url: options.rpc_url,
        pool: options.pool,
        entrypoint: options.entrypoint,
        start_block: options.start_block,
        asp_store_dir: options.asp_store.map(PathBuf::from),
        prover: ProverConfig {
            command: PathBuf::from("snarkjs"),
            circuit_wasm: config::galeon_dir().join("circuits/withdraw.wasm"),
            proving_key: config::galeon_dir().join("circuits/withdraw.zkey"),
            verification_key: config::galeon_dir().join("circuits/vkey.json"),
            work_dir: std::env::temp_dir().join("galeon-prover"),
        },
    };
    config::save_config(&config)?;

    println!("{}", "Configuration written.".green());
    println!("  Path:       {:?}", config::config_file());
    println!("  RPC:        {}", config.rpc_url);
    println!("  Pool:       {:#x}", config.pool);
    println!("  Entrypoint: {:#x}", config.entrypoint);
    println!();
    println!(
        "{}",
        "Place the withdrawal circuit artifacts under ~/.galeon/circuits \
         or edit the prover section of the config."
            .dimmed()
    );

    Ok(())
}
