//! Build, prove and encode a withdrawal for one recovered deposit.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::format_units;
use galeon_asp::{AspError, AspService, JsonlLabelStore, LabelFeed, LabelStore, NewLabel, RootPublisher};
use galeon_pool::contract::PoolReader;
use galeon_pool::events::{EthersEventFeed, EventFeed, EventIndex};
use galeon_pool::field::{field_from_str, field_to_hex};
use galeon_pool::merkle::LeanImt;
use galeon_pool::prover::{ProverHandle, ProverProgress, SnarkjsBackend};
use galeon_pool::recovery::recover_from_index;
use galeon_pool::withdrawal::{build_withdrawal, WithdrawalRequest};
use galeon_pool::Fr;
use serde_json::json;

use crate::config::{self, GaleonConfig};
use crate::session;

pub struct WithdrawOptions {
    pub key_env: String,
    pub commitment: String,
    pub amount: String,
    pub recipient: Address,
    pub data: String,
    pub verify: bool,
    pub output: Option<String>,
}

/// The withdraw command runs the ASP offline from its persisted label log;
/// these seams are never reached once the store is non-empty.
struct OfflineFeed;

#[async_trait]
impl LabelFeed for OfflineFeed {
    async fn labels_from(&self, _from_block: u64) -> Result<Vec<NewLabel>, AspError> {
        Err(AspError::Pool(galeon_pool::PoolError::ChainUnavailable(
            "ASP store is offline-only in the CLI".into(),
        )))
    }
}

struct OfflinePublisher;

#[async_trait]
impl RootPublisher for OfflinePublisher {
    async fn publish_root(&self, _root: Fr, _ipfs_cid: &str) -> Result<H256, AspError> {
        Err(AspError::Pool(galeon_pool::PoolError::RootPublishFailed(
            "ASP store is offline-only in the CLI".into(),
        )))
    }

    async fn latest_root(&self) -> Result<Fr, AspError> {
        Err(AspError::Pool(galeon_pool::PoolError::ChainUnavailable(
            "ASP store is offline-only in the CLI".into(),
        )))
    }
}

pub async fn run(options: WithdrawOptions) -> Result<()> {
    let config = config::load_config()?;
    let target_commitment =
        field_from_str(&options.commitment).context("invalid --commitment value")?;
    let amount = U256::from_dec_str(&options.amount).context("invalid --amount value")?;
    let data = parse_hex_data(&options.data)?;

    let wallet = session::wallet_from_env(&options.key_env)?;
    println!("{}", "Unlocking pool session...".cyan());
    let keys = session::unlock(&wallet).await?;

    let provider = Arc::new(
        Provider::<Http>::try_from(config.rpc_url.as_str()).context("invalid RPC URL")?,
    );
    let scope = PoolReader::new(provider.clone(), config.pool)
        .scope()
        .await
        .context("failed to read the pool scope")?;

    // scan the full event stream once; recovery and the state tree share it
    println!("Scanning pool events from block {}...", config.start_block);
    let mut feed = EthersEventFeed::new(provider, config.pool, config.start_block);
    let mut index = EventIndex::new();
    while let Some(page) = feed.next_page().await? {
        index.ingest(page)?;
    }

    let outcome = recover_from_index(&keys, scope, &index);
    let deposit = outcome
        .deposits
        .iter()
        .find(|d| d.commitment_hash == target_commitment)
        .ok_or_else(|| {
            anyhow!(
                "no active deposit with commitment {} - run 'galeon recover' to list them",
                field_to_hex(&target_commitment)
            )
        })?;

    let state_tree = LeanImt::from_leaves(index.state_leaves().iter().copied());
    let asp_proof = asp_label_proof(&config, &deposit.label).await?;

    let empty = BTreeSet::new();
    let used_children = outcome.children_used.get(&deposit.label).unwrap_or(&empty);
    let inputs = build_withdrawal(
        &keys,
        deposit,
        amount,
        &state_tree,
        &asp_proof,
        &WithdrawalRequest {
            processooor: options.recipient,
            data: Bytes::from(data),
        },
        scope,
        used_children,
    )?;

    println!(
        "Withdrawing {} ETH from deposit {}...",
        format_units(amount, "ether").unwrap_or_else(|_| "?".into()),
        field_to_hex(&deposit.commitment_hash)
    );

    // proving runs on the worker thread; stream its progress here
    let backend = snarkjs_backend(&config);
    let handle = ProverHandle::spawn(Box::new(backend));
    let task = handle.submit(&inputs);
    let bundle = tokio::task::spawn_blocking(move || {
        while let Some(progress) = task.next_progress() {
            match progress {
                ProverProgress::Loading => println!("{}", "Loading circuit artifacts...".cyan()),
                ProverProgress::Proving => println!("{}", "Proving (this takes a while)...".cyan()),
                ProverProgress::Done => println!("{}", "Proof complete.".green()),
            }
        }
        task.wait()
    })
    .await
    .context("prover worker panicked")??;

    if options.verify {
        let verifier = snarkjs_backend(&config);
        use galeon_pool::prover::ProverBackend;
        if verifier.verify(&bundle.proof, &bundle.public_signals)? {
            println!("{}", "Local verification passed.".green());
        } else {
            bail!("local verification FAILED - do not submit this proof");
        }
    }

    let words = bundle.proof.to_contract_words();
    println!();
    println!("{}", "Proof (verifier word order):".bold());
    for word in &words {
        println!("  {}", super::word_hex(word));
    }
    println!();
    println!("{}", "Public signals:".bold());
    for signal in &bundle.public_signals {
        println!("  {}", super::word_hex(signal));
    }
    println!();
    println!(
        "New commitment:  {}",
        field_to_hex(&bundle.new_commitment_hash)
    );
    println!(
        "Nullifier hash:  {}",
        field_to_hex(&bundle.existing_nullifier_hash)
    );

    if let Some(path) = options.output {
        let payload = json!({
            "proof": bundle.proof.to_snarkjs(),
            "proofWords": words.iter().map(super::word_hex).collect::<Vec<_>>(),
            "publicSignals": bundle.public_signals.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            "newCommitmentHash": field_to_hex(&bundle.new_commitment_hash),
            "existingNullifierHash": field_to_hex(&bundle.existing_nullifier_hash),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed to write {path}"))?;
        println!();
        println!("{}", format!("Proof bundle written to {path}.").green());
    }

    Ok(())
}

/// Rebuild the ASP tree from the shared label log and prove the label.
async fn asp_label_proof(
    config: &GaleonConfig,
    label: &Fr,
) -> Result<galeon_pool::MerkleProof> {
    let store_dir = config
        .asp_store_dir
        .as_ref()
        .ok_or_else(|| anyhow!("ASP not configured - set asp_store_dir in the config"))?;

    let mut store = JsonlLabelStore::open(store_dir)?;
    if store.load()?.is_empty() {
        bail!(
            "ASP store at {:?} is empty - run galeon-aspd first or point \
             asp_store_dir at its state directory",
            store_dir
        );
    }

    let mut service = AspService::new(store, OfflineFeed, OfflinePublisher);
    service.initialize().await?;
    Ok(service.generate_proof(label)?)
}

fn snarkjs_backend(config: &GaleonConfig) -> SnarkjsBackend {
    SnarkjsBackend {
        command: config.prover.command.clone(),
        circuit_wasm: config.prover.circuit_wasm.clone(),
        proving_key: config.prover.proving_key.clone(),
        verification_key: config.prover.verification_key.clone(),
        work_dir: config.prover.work_dir.clone(),
    }
}

fn parse_hex_data(data: &str) -> Result<Vec<u8>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    if stripped.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(stripped).context("invalid --data hex")
}
