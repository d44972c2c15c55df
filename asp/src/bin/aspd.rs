//! galeon-aspd - the Association Set Provider daemon.
//!
//! Initializes the label set (store or full indexer rebuild), then polls
//! the pool for new deposits and publishes the updated root on-chain.
//! Transient chain failures back off exponentially and are escalated after
//! several consecutive misses; the state store only ever advances after a
//! durable write.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use galeon_asp::chain::{EthersLabelFeed, EthersRootPublisher};
use galeon_asp::{AspService, JsonlLabelStore};
use tracing_subscriber::EnvFilter;

/// Consecutive transient failures before the error is escalated.
const ESCALATE_AFTER: u32 = 5;

/// Cap on the exponential backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 3;

#[derive(Parser)]
#[command(name = "galeon-aspd")]
#[command(version = "0.1.0")]
#[command(about = "Association Set Provider daemon for the Galeon privacy pool")]
struct Args {
    /// JSON-RPC endpoint of the L2 node
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Privacy pool contract address (deposit event source)
    #[arg(long)]
    pool: Address,

    /// Entrypoint contract address (root publication target)
    #[arg(long)]
    entrypoint: Address,

    /// Directory for the durable label log
    #[arg(long, default_value = "asp-state")]
    store_dir: String,

    /// Environment variable holding the publisher private key (hex)
    #[arg(long, default_value = "GALEON_ASP_KEY")]
    key_env: String,

    /// Chain id for transaction signing
    #[arg(long)]
    chain_id: u64,

    /// Poll cadence in seconds
    #[arg(long, default_value_t = 30)]
    poll_secs: u64,

    /// IPFS CID of the published association set metadata
    #[arg(long, default_value = "")]
    ipfs_cid: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let provider = Arc::new(
        Provider::<Http>::try_from(args.rpc_url.as_str()).context("invalid RPC URL")?,
    );
    let key = std::env::var(&args.key_env)
        .with_context(|| format!("publisher key not found in ${}", args.key_env))?;
    let wallet: LocalWallet = key
        .trim()
        .parse::<LocalWallet>()
        .context("invalid publisher private key")?
        .with_chain_id(args.chain_id);

    let store = JsonlLabelStore::open(&args.store_dir)?;
    let feed = EthersLabelFeed::new(provider.clone(), args.pool);
    let publisher = EthersRootPublisher::new(provider, args.entrypoint, wallet);
    let mut service = AspService::new(store, feed, publisher);

    let report = service.initialize().await?;
    tracing::info!(
        source = ?report.source,
        labels = report.labels_loaded,
        "association set provider initialized"
    );

    let poll = Duration::from_secs(args.poll_secs.max(1));
    let mut failures = 0u32;
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match run_cycle(&mut service, &args.ipfs_cid).await {
                    Ok(()) => {
                        failures = 0;
                    }
                    Err(error) if error.is_transient() => {
                        failures += 1;
                        let backoff = poll * (1u32 << failures.min(MAX_BACKOFF_SHIFT));
                        if failures >= ESCALATE_AFTER {
                            tracing::error!(%error, failures, "chain still unreachable");
                        } else {
                            tracing::warn!(%error, failures, ?backoff, "poll cycle failed, backing off");
                        }
                        tokio::time::sleep(backoff).await;
                    }
                    Err(error) => {
                        // fatal for this cycle only; state was not advanced
                        failures = 0;
                        tracing::error!(%error, "poll cycle aborted");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_cycle<S, F, P>(
    service: &mut AspService<S, F, P>,
    ipfs_cid: &str,
) -> Result<(), galeon_asp::AspError>
where
    S: galeon_asp::LabelStore,
    F: galeon_asp::LabelFeed,
    P: galeon_asp::RootPublisher,
{
    let processed = service.process_new_deposits().await?;
    if processed.new_labels > 0 {
        tracing::debug!(new_labels = processed.new_labels, "deposits processed");
    }
    let published = service.update_on_chain_root(ipfs_cid).await?;
    if published.updated {
        tracing::debug!("root update submitted");
    }
    Ok(())
}
