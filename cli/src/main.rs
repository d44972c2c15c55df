//! Galeon CLI - command line client for the privacy pool

use anyhow::Result;
use clap::{Parser, Subcommand};
use ethers::types::Address;

mod commands;
mod config;
mod session;

use commands::*;

#[derive(Parser)]
#[command(name = "galeon")]
#[command(version = "0.1.0")]
#[command(about = "Privacy pool client - deterministic recovery and withdrawal proving")]
#[command(long_about = r#"
Galeon recovers your privacy-pool deposits from chain events alone and
builds the zero-knowledge withdrawal proofs the pool verifies on-chain.

Your pool keys are derived from a wallet signature at each invocation;
nothing secret is ever written to disk.

Quick Start:
  1. galeon init --rpc-url ... --pool ... --entrypoint ...
  2. galeon recover               List your active deposits
  3. galeon withdraw              Prove and encode a withdrawal
  4. galeon info                  Show pool and ASP state
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Environment variable holding the wallet private key
    #[arg(long, global = true, default_value = session::DEFAULT_KEY_ENV)]
    key_env: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CLI configuration
    Init {
        /// JSON-RPC endpoint of the L2 node
        #[arg(long)]
        rpc_url: String,

        /// Privacy pool contract address
        #[arg(long)]
        pool: Address,

        /// Entrypoint contract address
        #[arg(long)]
        entrypoint: Address,

        /// First block to scan for pool events
        #[arg(long, default_value_t = 0)]
        start_block: u64,

        /// Directory holding the ASP label log
        #[arg(long)]
        asp_store: Option<String>,

        /// Force overwrite of an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Recover your active deposits from chain events
    Recover,

    /// Build, prove and encode a withdrawal
    Withdraw {
        /// Commitment hash of the deposit to spend (0x-hex, from recover)
        #[arg(long)]
        commitment: String,

        /// Amount to withdraw in wei
        #[arg(long)]
        amount: String,

        /// Processooor address the relay method pays out through
        #[arg(long)]
        recipient: Address,

        /// Opaque relay payload, hex encoded
        #[arg(long, default_value = "")]
        data: String,

        /// Also verify the proof locally before printing it
        #[arg(long)]
        verify: bool,

        /// Write the proof bundle to this JSON file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Re-encode a snarkjs proof for the on-chain verifier
    ProofEncode {
        /// Path to proof.json
        #[arg(long)]
        proof: String,

        /// Path to public.json
        #[arg(long)]
        public: String,
    },

    /// Show configuration, pool state and published ASP root
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            rpc_url,
            pool,
            entrypoint,
            start_block,
            asp_store,
            force,
        } => {
            init::run(init::InitOptions {
                rpc_url,
                pool,
                entrypoint,
                start_block,
                asp_store,
                force,
            })?;
        }
        Commands::Recover => {
            recover::run(&cli.key_env).await?;
        }
        Commands::Withdraw {
            commitment,
            amount,
            recipient,
            data,
            verify,
            output,
        } => {
            withdraw::run(withdraw::WithdrawOptions {
                key_env: cli.key_env,
                commitment,
                amount,
                recipient,
                data,
                verify,
                output,
            })
            .await?;
        }
        Commands::ProofEncode { proof, public } => {
            proof_encode::run(&proof, &public)?;
        }
        Commands::Info => {
            info::run().await?;
        }
    }

    Ok(())
}
