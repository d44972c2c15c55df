//! No-notes deposit recovery over the pool event stream.
//!
//! Given the session master keys and the pool scope, recovery rebuilds the
//! set of commitments the user can still spend, with no local state at all:
//!
//! 1. probe deposit indices 0, 1, 2, ... against `Deposited` precommitments,
//!    tolerating gaps from failed or in-flight deposits;
//! 2. follow each deposit through `MergeDeposit` chains, deriving the child
//!    secrets whose commitment matches the emitted one;
//! 3. follow partial `Withdrawn` events the same way; a zero new commitment
//!    or an exhausted balance removes the deposit.
//!
//! One chain failing poisons only that deposit: the failure is recorded as a
//! diagnostic and the rest of the set is still returned.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ark_bn254::Fr;
use ark_ff::Zero;
use ethers::types::{H256, U256};

use crate::commitment::{
    commitment_hash, deposit_secrets, nullifier_hash, precommitment_hash, withdrawal_secrets,
};
use crate::error::PoolError;
use crate::events::{EventFeed, EventIndex};
use crate::field::{field_to_hex, u256_to_field};
use crate::keys::MasterKeys;

/// Consecutive missing deposit indices tolerated before the probe stops.
pub const MAX_CONSECUTIVE_MISSES: u64 = 10;

/// Exclusive upper bound of the child-index search in merge/change tracing.
pub const MAX_CHILD_INDEX: u64 = 100;

/// A commitment the user currently holds the spending secrets for.
///
/// `index` is the deposit index under the scope for original deposits, and
/// the child index used in the withdrawal-secret derivation for commitments
/// produced by merges or partial withdrawals.
#[derive(Clone, Debug)]
pub struct ActiveDeposit {
    pub index: u64,
    pub nullifier: Fr,
    pub secret: Fr,
    pub precommitment_hash: Fr,
    pub value: U256,
    pub label: Fr,
    pub block_number: u64,
    pub tx_hash: H256,
    pub commitment_hash: Fr,
}

/// A per-deposit failure collected during recovery.
#[derive(Debug)]
pub struct RecoveryIssue {
    /// Original deposit index whose chain failed.
    pub deposit_index: u64,
    pub error: PoolError,
}

/// Result of a recovery pass.
#[derive(Debug, Default)]
pub struct RecoveryOutcome {
    /// Active deposits, deduped by commitment hash, in deposit-index order.
    pub deposits: Vec<ActiveDeposit>,
    /// Merge events traversed across all chains (diagnostics).
    pub merges_traversed: u64,
    /// Chains that could not be fully traced.
    pub issues: Vec<RecoveryIssue>,
    /// Child indices already consumed per label; the withdrawal builder
    /// picks the smallest unused one.
    pub children_used: HashMap<Fr, BTreeSet<u64>>,
    /// True when the feed scan was cancelled at a page boundary; the
    /// outcome then covers the ingested prefix only.
    pub cancelled: bool,
}

impl RecoveryOutcome {
    /// Smallest child index not yet consumed under `label`.
    pub fn next_child_index(&self, label: &Fr) -> u64 {
        let used = self.children_used.get(label);
        let mut candidate = 0u64;
        if let Some(used) = used {
            while used.contains(&candidate) {
                candidate += 1;
            }
        }
        candidate
    }
}

/// Cooperative cancellation handle; recovery observes it between pages.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drain the feed (or stop at a page boundary on cancellation) and recover
/// the active deposit set.
pub async fn recover(
    keys: &MasterKeys,
    scope: Fr,
    feed: &mut (dyn EventFeed + '_),
    cancel: &CancelFlag,
) -> Result<RecoveryOutcome, PoolError> {
    let mut index = EventIndex::new();
    let mut cancelled = false;
    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        match feed.next_page().await? {
            Some(page) => index.ingest(page)?,
            None => break,
        }
    }
    let mut outcome = recover_from_index(keys, scope, &index);
    outcome.cancelled = cancelled;
    Ok(outcome)
}

/// Recovery over an already-ingested event index.
pub fn recover_from_index(keys: &MasterKeys, scope: Fr, index: &EventIndex) -> RecoveryOutcome {
    let mut outcome = RecoveryOutcome::default();

    for (deposit_index, deposit) in probe_original_deposits(keys, scope, index) {
        match trace_chain(keys, deposit, deposit_index, index, &mut outcome) {
            Ok(Some(active)) => outcome.deposits.push(active),
            Ok(None) => {} // fully spent
            Err(error) => {
                tracing::warn!(deposit_index, %error, "deposit chain could not be traced");
                outcome.issues.push(RecoveryIssue {
                    deposit_index,
                    error,
                });
            }
        }
    }

    dedup_by_commitment(&mut outcome.deposits);
    outcome
}

/// Phase 1: match derived precommitments against `Deposited` events.
fn probe_original_deposits(
    keys: &MasterKeys,
    scope: Fr,
    index: &EventIndex,
) -> Vec<(u64, ActiveDeposit)> {
    let mut found = Vec::new();
    let mut misses = 0u64;
    let mut deposit_index = 0u64;

    while misses < MAX_CONSECUTIVE_MISSES {
        let secrets = deposit_secrets(keys, scope, deposit_index);
        match index.deposit_by_precommitment(&secrets.precommitment_hash) {
            Some(event) => {
                misses = 0;
                found.push((
                    deposit_index,
                    ActiveDeposit {
                        index: deposit_index,
                        nullifier: secrets.nullifier,
                        secret: secrets.secret,
                        precommitment_hash: secrets.precommitment_hash,
                        value: event.value,
                        label: event.label,
                        block_number: event.block_number,
                        tx_hash: event.tx_hash,
                        commitment_hash: event.commitment,
                    },
                ));
            }
            None => misses += 1,
        }
        deposit_index += 1;
    }

    found
}

/// Phases 2 and 3: follow merge and withdrawal-change links until the
/// current commitment is unspent or the deposit is exhausted.
fn trace_chain(
    keys: &MasterKeys,
    mut current: ActiveDeposit,
    deposit_index: u64,
    index: &EventIndex,
    outcome: &mut RecoveryOutcome,
) -> Result<Option<ActiveDeposit>, PoolError> {
    let mut visited: HashSet<Fr> = HashSet::new();

    loop {
        let spent_hash = nullifier_hash(current.nullifier);
        if !visited.insert(spent_hash) {
            return Err(PoolError::RecoveryNullifierMismatch {
                deposit_index,
                detail: format!("nullifier hash {} revisited", field_to_hex(&spent_hash)),
            });
        }

        let merge = index.merge_by_nullifier(&spent_hash);
        let withdrawal = index.withdrawal_by_nullifier(&spent_hash);

        match (merge, withdrawal) {
            (Some(_), Some(_)) => {
                return Err(PoolError::ChainInconsistency(format!(
                    "nullifier hash {} spent by both a merge and a withdrawal",
                    field_to_hex(&spent_hash)
                )));
            }
            (Some(merge), None) => {
                let new_value = current.value.checked_add(merge.deposit_value).ok_or_else(
                    || PoolError::ChainInconsistency("merged value overflows uint256".into()),
                )?;
                let child = find_child(keys, current.label, new_value, merge.new_commitment)?;
                outcome
                    .children_used
                    .entry(current.label)
                    .or_default()
                    .insert(child.index);
                outcome.merges_traversed += 1;
                current = ActiveDeposit {
                    index: child.index,
                    nullifier: child.nullifier,
                    secret: child.secret,
                    precommitment_hash: child.precommitment_hash,
                    value: new_value,
                    label: current.label,
                    block_number: merge.block_number,
                    tx_hash: merge.tx_hash,
                    commitment_hash: merge.new_commitment,
                };
            }
            (None, Some(withdrawal)) => {
                if withdrawal.new_commitment.is_zero()
                    || withdrawal.withdrawn_value == current.value
                {
                    return Ok(None);
                }
                let new_value = current
                    .value
                    .checked_sub(withdrawal.withdrawn_value)
                    .ok_or_else(|| {
                        PoolError::ChainInconsistency(format!(
                            "withdrawal of {} exceeds balance {}",
                            withdrawal.withdrawn_value, current.value
                        ))
                    })?;
                let child = find_child(keys, current.label, new_value, withdrawal.new_commitment)?;
                outcome
                    .children_used
                    .entry(current.label)
                    .or_default()
                    .insert(child.index);
                current = ActiveDeposit {
                    index: child.index,
                    nullifier: child.nullifier,
                    secret: child.secret,
                    precommitment_hash: child.precommitment_hash,
                    value: new_value,
                    label: current.label,
                    block_number: withdrawal.block_number,
                    tx_hash: withdrawal.tx_hash,
                    commitment_hash: withdrawal.new_commitment,
                };
            }
            (None, None) => return Ok(Some(current)),
        }
    }
}

struct ChildMatch {
    index: u64,
    nullifier: Fr,
    secret: Fr,
    precommitment_hash: Fr,
}

/// Search the bounded child-index space for the derivation whose commitment
/// matches what the chain emitted.
fn find_child(
    keys: &MasterKeys,
    label: Fr,
    value: U256,
    expected_commitment: Fr,
) -> Result<ChildMatch, PoolError> {
    let value = u256_to_field(value)?;
    for child_index in 0..MAX_CHILD_INDEX {
        let (nullifier, secret) = withdrawal_secrets(keys, label, child_index);
        let pre = precommitment_hash(nullifier, secret);
        if commitment_hash(value, label, pre) == expected_commitment {
            return Ok(ChildMatch {
                index: child_index,
                nullifier,
                secret,
                precommitment_hash: pre,
            });
        }
    }
    Err(PoolError::RecoveryChildNotFound {
        label: field_to_hex(&label),
        max: MAX_CHILD_INDEX,
    })
}

fn dedup_by_commitment(deposits: &mut Vec<ActiveDeposit>) {
    let mut seen = HashSet::new();
    deposits.retain(|d| seen.insert(d.commitment_hash));
}
