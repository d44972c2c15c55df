//! Pool chain events: typed variants, total ordering, side indexes and the
//! paged event feed.
//!
//! The recovery engine never talks to the chain directly; it consumes an
//! [`EventFeed`] page by page (restartable, cancellable at page bounds) and
//! the [`EventIndex`] maintains the lookup maps that make merge/withdrawal
//! chain traversal O(1) per step.

use std::collections::HashMap;
use std::sync::Arc;

use ark_bn254::Fr;
use ark_ff::Zero;
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, H256, U256};

use crate::error::PoolError;
use crate::field::u256_to_field;

/// Default number of blocks per `eth_getLogs` page.
pub const DEFAULT_PAGE_BLOCKS: u64 = 2_000;

/// `Deposited(depositor, commitment, label, value, precommitment)`
#[derive(Clone, Debug)]
pub struct DepositedEvent {
    pub depositor: Address,
    pub pool: Address,
    pub commitment: Fr,
    pub label: Fr,
    pub value: U256,
    pub precommitment: Fr,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

/// `MergeDeposit(existingNullifierHash, newCommitment, depositValue)`
#[derive(Clone, Debug)]
pub struct MergeDepositEvent {
    pub existing_nullifier_hash: Fr,
    pub new_commitment: Fr,
    pub deposit_value: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

/// `Withdrawn(processooor, value, spentNullifier, newCommitment)`;
/// `new_commitment == 0` marks a full spend.
#[derive(Clone, Debug)]
pub struct WithdrawnEvent {
    pub processooor: Address,
    pub spent_nullifier: Fr,
    pub withdrawn_value: U256,
    pub new_commitment: Fr,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
}

#[derive(Clone, Debug)]
pub enum PoolEvent {
    Deposited(DepositedEvent),
    MergeDeposit(MergeDepositEvent),
    Withdrawn(WithdrawnEvent),
}

impl PoolEvent {
    /// Total-order key: `(blockNumber, logIndex)`.
    pub fn ordinal(&self) -> (u64, u64) {
        match self {
            PoolEvent::Deposited(e) => (e.block_number, e.log_index),
            PoolEvent::MergeDeposit(e) => (e.block_number, e.log_index),
            PoolEvent::Withdrawn(e) => (e.block_number, e.log_index),
        }
    }

    /// The state-tree leaf this event appended, if any.
    pub fn inserted_commitment(&self) -> Option<Fr> {
        match self {
            PoolEvent::Deposited(e) => Some(e.commitment),
            PoolEvent::MergeDeposit(e) => Some(e.new_commitment),
            PoolEvent::Withdrawn(e) if !e.new_commitment.is_zero() => Some(e.new_commitment),
            PoolEvent::Withdrawn(_) => None,
        }
    }
}

/// Side-indexed view of the event stream.
///
/// Deposits are keyed by precommitment (earliest wins), spends by the
/// nullifier hash they consume. `state_leaves` keeps every inserted
/// commitment in chain order so the local state tree can be rebuilt.
#[derive(Debug, Default)]
pub struct EventIndex {
    deposits_by_precommitment: HashMap<Fr, DepositedEvent>,
    merges_by_nullifier: HashMap<Fr, MergeDepositEvent>,
    withdrawals_by_nullifier: HashMap<Fr, WithdrawnEvent>,
    state_leaves: Vec<Fr>,
    events_ingested: usize,
    last_ordinal: Option<(u64, u64)>,
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one page. Pages may arrive unsorted internally but must not
    /// go backwards relative to already-ingested pages.
    pub fn ingest(&mut self, mut page: Vec<PoolEvent>) -> Result<(), PoolError> {
        page.sort_by_key(PoolEvent::ordinal);
        for event in page {
            let ordinal = event.ordinal();
            if let Some(last) = self.last_ordinal {
                if ordinal < last {
                    return Err(PoolError::ChainInconsistency(format!(
                        "event at {ordinal:?} arrived after {last:?}"
                    )));
                }
            }
            self.last_ordinal = Some(ordinal);
            if let Some(leaf) = event.inserted_commitment() {
                self.state_leaves.push(leaf);
            }
            match event {
                PoolEvent::Deposited(e) => {
                    // duplicate precommitments should not happen; keep the earliest
                    self.deposits_by_precommitment
                        .entry(e.precommitment)
                        .or_insert(e);
                }
                PoolEvent::MergeDeposit(e) => {
                    self.merges_by_nullifier
                        .entry(e.existing_nullifier_hash)
                        .or_insert(e);
                }
                PoolEvent::Withdrawn(e) => {
                    self.withdrawals_by_nullifier
                        .entry(e.spent_nullifier)
                        .or_insert(e);
                }
            }
            self.events_ingested += 1;
        }
        Ok(())
    }

    pub fn deposit_by_precommitment(&self, precommitment: &Fr) -> Option<&DepositedEvent> {
        self.deposits_by_precommitment.get(precommitment)
    }

    pub fn merge_by_nullifier(&self, nullifier_hash: &Fr) -> Option<&MergeDepositEvent> {
        self.merges_by_nullifier.get(nullifier_hash)
    }

    pub fn withdrawal_by_nullifier(&self, nullifier_hash: &Fr) -> Option<&WithdrawnEvent> {
        self.withdrawals_by_nullifier.get(nullifier_hash)
    }

    /// Every inserted commitment in chain order.
    pub fn state_leaves(&self) -> &[Fr] {
        &self.state_leaves
    }

    pub fn events_ingested(&self) -> usize {
        self.events_ingested
    }
}

/// Paged, restartable source of pool events in chain order.
#[async_trait]
pub trait EventFeed: Send {
    /// Next page, or `None` once the feed is drained. Each call is a
    /// suspension point; callers may stop between pages and resume later
    /// from [`EventFeed::resume_block`].
    async fn next_page(&mut self) -> Result<Option<Vec<PoolEvent>>, PoolError>;

    /// First block the next page would cover.
    fn resume_block(&self) -> u64;
}

// ---------------------------------------------------------------------------
// Ethereum log decoding
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "Deposited",
    abi = "Deposited(address,uint256,uint256,uint256,uint256)"
)]
struct DepositedFilter {
    #[ethevent(indexed)]
    depositor: Address,
    commitment: U256,
    label: U256,
    value: U256,
    precommitment: U256,
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "MergeDeposit",
    abi = "MergeDeposit(uint256,uint256,uint256)"
)]
struct MergeDepositFilter {
    #[ethevent(indexed)]
    existing_nullifier_hash: U256,
    new_commitment: U256,
    deposit_value: U256,
}

#[derive(Clone, Debug, EthEvent)]
#[ethevent(
    name = "Withdrawn",
    abi = "Withdrawn(address,uint256,uint256,uint256)"
)]
struct WithdrawnFilter {
    #[ethevent(indexed)]
    processooor: Address,
    value: U256,
    spent_nullifier: U256,
    new_commitment: U256,
}

struct LogMeta {
    block_number: u64,
    log_index: u64,
    tx_hash: H256,
}

fn log_meta(log: &Log) -> Result<LogMeta, PoolError> {
    Ok(LogMeta {
        block_number: log
            .block_number
            .ok_or_else(|| PoolError::ChainUnavailable("log without block number".into()))?
            .as_u64(),
        log_index: log
            .log_index
            .ok_or_else(|| PoolError::ChainUnavailable("log without log index".into()))?
            .as_u64(),
        tx_hash: log.transaction_hash.unwrap_or_default(),
    })
}

/// Decode a raw pool log into a typed event. Logs with an unknown topic
/// (other contract events in the same range) decode to `None`.
pub fn decode_pool_log(log: &Log) -> Result<Option<PoolEvent>, PoolError> {
    let Some(topic0) = log.topics.first().copied() else {
        return Ok(None);
    };
    let raw = RawLog::from(log.clone());
    let meta = log_meta(log)?;

    let event = if topic0 == DepositedFilter::signature() {
        let ev = DepositedFilter::decode_log(&raw)
            .map_err(|e| PoolError::ChainInconsistency(format!("bad Deposited log: {e}")))?;
        PoolEvent::Deposited(DepositedEvent {
            depositor: ev.depositor,
            pool: log.address,
            commitment: u256_to_field(ev.commitment)?,
            label: u256_to_field(ev.label)?,
            value: ev.value,
            precommitment: u256_to_field(ev.precommitment)?,
            block_number: meta.block_number,
            log_index: meta.log_index,
            tx_hash: meta.tx_hash,
        })
    } else if topic0 == MergeDepositFilter::signature() {
        let ev = MergeDepositFilter::decode_log(&raw)
            .map_err(|e| PoolError::ChainInconsistency(format!("bad MergeDeposit log: {e}")))?;
        PoolEvent::MergeDeposit(MergeDepositEvent {
            existing_nullifier_hash: u256_to_field(ev.existing_nullifier_hash)?,
            new_commitment: u256_to_field(ev.new_commitment)?,
            deposit_value: ev.deposit_value,
            block_number: meta.block_number,
            log_index: meta.log_index,
            tx_hash: meta.tx_hash,
        })
    } else if topic0 == WithdrawnFilter::signature() {
        let ev = WithdrawnFilter::decode_log(&raw)
            .map_err(|e| PoolError::ChainInconsistency(format!("bad Withdrawn log: {e}")))?;
        PoolEvent::Withdrawn(WithdrawnEvent {
            processooor: ev.processooor,
            spent_nullifier: u256_to_field(ev.spent_nullifier)?,
            withdrawn_value: ev.value,
            new_commitment: u256_to_field(ev.new_commitment)?,
            block_number: meta.block_number,
            log_index: meta.log_index,
            tx_hash: meta.tx_hash,
        })
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

/// `eth_getLogs`-backed feed over one pool contract, in bounded block pages.
pub struct EthersEventFeed {
    provider: Arc<Provider<Http>>,
    pool: Address,
    cursor: u64,
    target: Option<u64>,
    page_blocks: u64,
}

impl EthersEventFeed {
    pub fn new(provider: Arc<Provider<Http>>, pool: Address, start_block: u64) -> Self {
        Self {
            provider,
            pool,
            cursor: start_block,
            target: None,
            page_blocks: DEFAULT_PAGE_BLOCKS,
        }
    }

    pub fn with_page_blocks(mut self, page_blocks: u64) -> Self {
        self.page_blocks = page_blocks.max(1);
        self
    }
}

#[async_trait]
impl EventFeed for EthersEventFeed {
    async fn next_page(&mut self) -> Result<Option<Vec<PoolEvent>>, PoolError> {
        // pin the scan target on first use so the feed drains deterministically
        let target = match self.target {
            Some(t) => t,
            None => {
                let head = self
                    .provider
                    .get_block_number()
                    .await
                    .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?
                    .as_u64();
                self.target = Some(head);
                head
            }
        };

        if self.cursor > target {
            return Ok(None);
        }
        let to_block = (self.cursor + self.page_blocks - 1).min(target);
        let filter = Filter::new()
            .address(self.pool)
            .from_block(self.cursor)
            .to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| PoolError::ChainUnavailable(e.to_string()))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = decode_pool_log(log)? {
                events.push(event);
            }
        }
        tracing::debug!(
            from = self.cursor,
            to = to_block,
            events = events.len(),
            "scanned pool log page"
        );
        self.cursor = to_block + 1;
        Ok(Some(events))
    }

    fn resume_block(&self) -> u64 {
        self.cursor
    }
}
