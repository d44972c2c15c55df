//! The Association Set Provider service.
//!
//! Owns the approved-label tree: loads it from the durable log (or rebuilds
//! it from the indexer), folds new deposits in as they appear, answers
//! label inclusion proofs for withdrawals, and pushes the root on-chain
//! whenever it changes. Single-writer: exactly one service instance owns
//! the store and the tree.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::H256;
use galeon_pool::field::field_to_hex;
use galeon_pool::merkle::{LeanImt, MerkleProof};
use galeon_pool::{Fr, PoolError};

use crate::error::AspError;
use crate::store::{LabelRecord, LabelStore};

/// Default cadence of the deposit poll loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A label observed on-chain, with its position in the total event order.
#[derive(Clone, Copy, Debug)]
pub struct NewLabel {
    pub label: Fr,
    pub block_number: u64,
    pub log_index: u64,
}

/// Source of deposit labels in chain order (the indexer seam).
#[async_trait]
pub trait LabelFeed: Send {
    /// All deposit labels at or after `from_block`, in chain order.
    async fn labels_from(&self, from_block: u64) -> Result<Vec<NewLabel>, AspError>;
}

/// On-chain root publication seam (the entrypoint contract).
#[async_trait]
pub trait RootPublisher: Send {
    async fn publish_root(&self, root: Fr, ipfs_cid: &str) -> Result<H256, AspError>;

    async fn latest_root(&self) -> Result<Fr, AspError>;
}

/// Hook consulted before a label enters the set. The current deployment
/// approves everything; a blocklist slots in here.
pub trait ApprovalPolicy: Send {
    fn approves(&self, label: &Fr) -> bool;
}

/// Default policy: every deposit label is approved.
pub struct ApproveAll;

impl ApprovalPolicy for ApproveAll {
    fn approves(&self, _label: &Fr) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitSource {
    Store,
    Indexer,
}

#[derive(Debug)]
pub struct InitReport {
    pub source: InitSource,
    pub labels_loaded: usize,
}

#[derive(Debug)]
pub struct ProcessReport {
    pub new_labels: usize,
    pub new_root: Fr,
}

#[derive(Debug)]
pub struct PublishReport {
    pub updated: bool,
    pub tx_hash: Option<H256>,
    pub new_root: Fr,
}

pub struct AspService<S: LabelStore, F: LabelFeed, P: RootPublisher> {
    store: S,
    feed: F,
    publisher: P,
    policy: Box<dyn ApprovalPolicy>,
    tree: LeanImt,
    seen: HashSet<Fr>,
    last_published_root: Option<Fr>,
    /// Next block to poll from. Kept at the last seen block (not +1) so a
    /// restart re-reads that block; the seen-set makes replays harmless.
    cursor_block: u64,
    initialized: bool,
}

impl<S: LabelStore, F: LabelFeed, P: RootPublisher> AspService<S, F, P> {
    pub fn new(store: S, feed: F, publisher: P) -> Self {
        Self::with_policy(store, feed, publisher, Box::new(ApproveAll))
    }

    pub fn with_policy(
        store: S,
        feed: F,
        publisher: P,
        policy: Box<dyn ApprovalPolicy>,
    ) -> Self {
        Self {
            store,
            feed,
            publisher,
            policy,
            tree: LeanImt::new(),
            seen: HashSet::new(),
            last_published_root: None,
            cursor_block: 0,
            initialized: false,
        }
    }

    /// Load state from the store; when the store is empty, rebuild the set
    /// from the indexer instead.
    pub async fn initialize(&mut self) -> Result<InitReport, AspError> {
        self.last_published_root = self.store.last_published_root()?;
        let records = self.store.load()?;

        if records.is_empty() {
            let loaded = self.rebuild_from_deposits().await?;
            return Ok(InitReport {
                source: InitSource::Indexer,
                labels_loaded: loaded,
            });
        }

        for record in &records {
            let label = record.label_field()?;
            self.admit(label, record.block_number);
        }
        self.initialized = true;
        tracing::info!(
            labels = records.len(),
            root = %field_to_hex(&self.tree.root()),
            "association set restored from store"
        );
        Ok(InitReport {
            source: InitSource::Store,
            labels_loaded: records.len(),
        })
    }

    /// Poll the indexer for labels we have not seen and fold them in,
    /// strictly in chain order.
    pub async fn process_new_deposits(&mut self) -> Result<ProcessReport, AspError> {
        self.ensure_initialized()?;
        let mut labels = self.feed.labels_from(self.cursor_block).await?;
        labels.sort_by_key(|l| (l.block_number, l.log_index));

        let mut new_labels = 0usize;
        for incoming in labels {
            if self.insert_label(&incoming)? {
                new_labels += 1;
            }
        }
        if new_labels > 0 {
            tracing::info!(
                new_labels,
                size = self.tree.size(),
                root = %field_to_hex(&self.tree.root()),
                "association set grew"
            );
        }
        Ok(ProcessReport {
            new_labels,
            new_root: self.tree.root(),
        })
    }

    /// Discard local state and rebuild the whole set from the indexer.
    /// Idempotent: the resulting tree depends only on the chain.
    pub async fn rebuild_from_deposits(&mut self) -> Result<usize, AspError> {
        let mut labels = self.feed.labels_from(0).await?;
        labels.sort_by_key(|l| (l.block_number, l.log_index));

        self.tree = LeanImt::new();
        self.seen = HashSet::new();
        self.cursor_block = 0;

        let mut records = Vec::new();
        for incoming in labels {
            if self.seen.contains(&incoming.label) || !self.policy.approves(&incoming.label) {
                continue;
            }
            self.admit(incoming.label, incoming.block_number);
            records.push(LabelRecord::new(
                incoming.label,
                incoming.block_number,
                incoming.log_index,
            ));
        }
        self.store.replace_all(&records)?;
        self.initialized = true;
        tracing::info!(
            labels = records.len(),
            root = %field_to_hex(&self.tree.root()),
            "association set rebuilt from indexer"
        );
        Ok(records.len())
    }

    /// Inclusion proof for a label, as withdrawals consume it.
    pub fn generate_proof(&self, label: &Fr) -> Result<MerkleProof, AspError> {
        self.ensure_initialized()?;
        match self.tree.proof_of(label) {
            Ok(proof) => Ok(proof),
            Err(PoolError::TreeLeafNotFound(_)) => {
                Err(AspError::LabelNotFound(field_to_hex(label)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Publish the current root if it differs from the last published one.
    /// A failed submission leaves `last_published_root` untouched, so the
    /// next tick retries.
    pub async fn update_on_chain_root(&mut self, ipfs_cid: &str) -> Result<PublishReport, AspError> {
        self.ensure_initialized()?;
        let root = self.tree.root();
        if self.tree.size() == 0 || self.last_published_root == Some(root) {
            return Ok(PublishReport {
                updated: false,
                tx_hash: None,
                new_root: root,
            });
        }

        let tx_hash = self.publisher.publish_root(root, ipfs_cid).await?;
        self.store.set_last_published_root(root)?;
        self.last_published_root = Some(root);
        tracing::info!(
            root = %field_to_hex(&root),
            tx = %format!("{tx_hash:#x}"),
            "association set root published"
        );
        Ok(PublishReport {
            updated: true,
            tx_hash: Some(tx_hash),
            new_root: root,
        })
    }

    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn size(&self) -> u64 {
        self.tree.size()
    }

    pub fn last_published_root(&self) -> Option<Fr> {
        self.last_published_root
    }

    /// Insert one polled label; returns whether the set grew.
    fn insert_label(&mut self, incoming: &NewLabel) -> Result<bool, AspError> {
        // advance the cursor even for duplicates, we have consumed the block
        self.cursor_block = self.cursor_block.max(incoming.block_number);
        if self.seen.contains(&incoming.label) {
            return Ok(false);
        }
        if !self.policy.approves(&incoming.label) {
            tracing::warn!(label = %field_to_hex(&incoming.label), "label rejected by policy");
            return Ok(false);
        }
        // persist before advancing the in-memory tree past the record
        self.store.append(&LabelRecord::new(
            incoming.label,
            incoming.block_number,
            incoming.log_index,
        ))?;
        self.admit(incoming.label, incoming.block_number);
        Ok(true)
    }

    fn admit(&mut self, label: Fr, block_number: u64) {
        self.tree.insert(label);
        self.seen.insert(label);
        self.cursor_block = self.cursor_block.max(block_number);
    }

    fn ensure_initialized(&self) -> Result<(), AspError> {
        if self.initialized {
            Ok(())
        } else {
            Err(AspError::NotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLabelStore;
    use std::sync::{Arc, Mutex};

    struct VecFeed {
        labels: Vec<NewLabel>,
    }

    #[async_trait]
    impl LabelFeed for VecFeed {
        async fn labels_from(&self, from_block: u64) -> Result<Vec<NewLabel>, AspError> {
            Ok(self
                .labels
                .iter()
                .copied()
                .filter(|l| l.block_number >= from_block)
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<Fr>>>,
    }

    #[async_trait]
    impl RootPublisher for RecordingPublisher {
        async fn publish_root(&self, root: Fr, _ipfs_cid: &str) -> Result<H256, AspError> {
            self.published.lock().unwrap().push(root);
            Ok(H256::repeat_byte(0x55))
        }

        async fn latest_root(&self) -> Result<Fr, AspError> {
            Ok(self
                .published
                .lock()
                .unwrap()
                .last()
                .copied()
                .unwrap_or_else(|| Fr::from(0u64)))
        }
    }

    fn label(value: u64, block: u64, log_index: u64) -> NewLabel {
        NewLabel {
            label: Fr::from(value),
            block_number: block,
            log_index,
        }
    }

    fn service(labels: Vec<NewLabel>) -> (
        AspService<MemoryLabelStore, VecFeed, RecordingPublisher>,
        RecordingPublisher,
    ) {
        let publisher = RecordingPublisher::default();
        (
            AspService::new(
                MemoryLabelStore::new(),
                VecFeed { labels },
                publisher.clone(),
            ),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_empty_store_initializes_from_indexer() {
        let (mut svc, _) = service(vec![label(0xA, 1, 0), label(0xB, 2, 0)]);
        let report = svc.initialize().await.unwrap();
        assert_eq!(report.source, InitSource::Indexer);
        assert_eq!(report.labels_loaded, 2);
        assert_eq!(svc.size(), 2);
    }

    #[tokio::test]
    async fn test_root_matches_in_order_tree() {
        // scenario: labels [0xA, 0xB, 0xC] must hash exactly like a plain
        // LeanIMT built over the same sequence
        let (mut svc, _) = service(vec![
            label(0xA, 1, 0),
            label(0xB, 1, 1),
            label(0xC, 2, 0),
        ]);
        svc.initialize().await.unwrap();

        let expected = LeanImt::from_leaves([
            Fr::from(0xAu64),
            Fr::from(0xBu64),
            Fr::from(0xCu64),
        ]);
        assert_eq!(svc.root(), expected.root());
    }

    #[tokio::test]
    async fn test_publication_fires_once_per_root() {
        let (mut svc, publisher) = service(vec![
            label(0xA, 1, 0),
            label(0xB, 1, 1),
            label(0xC, 2, 0),
        ]);
        svc.initialize().await.unwrap();

        let first = svc.update_on_chain_root("").await.unwrap();
        assert!(first.updated);
        assert_eq!(first.new_root, svc.root());

        // no new labels: second call is a no-op
        let second = svc.update_on_chain_root("").await.unwrap();
        assert!(!second.updated);
        assert!(second.tx_hash.is_none());

        assert_eq!(publisher.published.lock().unwrap().len(), 1);
        assert_eq!(svc.last_published_root(), Some(svc.root()));
    }

    #[tokio::test]
    async fn test_empty_set_is_never_published() {
        let (mut svc, publisher) = service(vec![]);
        svc.initialize().await.unwrap();
        let report = svc.update_on_chain_root("").await.unwrap();
        assert!(!report.updated);
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_labels_are_ignored_not_errors() {
        let (mut svc, _) = service(vec![
            label(0xA, 1, 0),
            label(0xA, 2, 0),
            label(0xB, 3, 0),
        ]);
        svc.initialize().await.unwrap();
        assert_eq!(svc.size(), 2);

        // polling again re-reads the same labels; nothing changes
        let report = svc.process_new_deposits().await.unwrap();
        assert_eq!(report.new_labels, 0);
        assert_eq!(svc.size(), 2);
    }

    #[tokio::test]
    async fn test_restart_from_store_reproduces_root() {
        let labels = vec![label(0xA, 1, 0), label(0xB, 2, 0), label(0xC, 3, 0)];
        let (mut first, _) = service(labels.clone());
        first.initialize().await.unwrap();
        let root = first.root();
        let records = first.store.load().unwrap();

        // second service starts from the persisted log, not the indexer
        let mut store = MemoryLabelStore::new();
        store.replace_all(&records).unwrap();
        let mut second = AspService::new(
            store,
            VecFeed { labels: vec![] },
            RecordingPublisher::default(),
        );
        let report = second.initialize().await.unwrap();
        assert_eq!(report.source, InitSource::Store);
        assert_eq!(second.root(), root);
    }

    #[tokio::test]
    async fn test_generate_proof_verifies_and_unknown_label_fails() {
        let (mut svc, _) = service(vec![label(0xA, 1, 0), label(0xB, 2, 0)]);
        svc.initialize().await.unwrap();

        let proof = svc.generate_proof(&Fr::from(0xAu64)).unwrap();
        assert!(proof.verify());
        assert_eq!(proof.root, svc.root());
        assert_eq!(proof.leaf, Fr::from(0xAu64));

        assert!(matches!(
            svc.generate_proof(&Fr::from(0xDEADu64)),
            Err(AspError::LabelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_refused_before_initialize() {
        let (mut svc, _) = service(vec![]);
        assert!(matches!(
            svc.generate_proof(&Fr::from(1u64)),
            Err(AspError::NotInitialized)
        ));
        assert!(matches!(
            svc.process_new_deposits().await,
            Err(AspError::NotInitialized)
        ));
        assert!(matches!(
            svc.update_on_chain_root("").await,
            Err(AspError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_blocklist_policy_is_consulted() {
        struct Blocklist(Fr);
        impl ApprovalPolicy for Blocklist {
            fn approves(&self, label: &Fr) -> bool {
                *label != self.0
            }
        }

        let mut svc = AspService::with_policy(
            MemoryLabelStore::new(),
            VecFeed {
                labels: vec![label(0xA, 1, 0), label(0xBAD, 2, 0), label(0xB, 3, 0)],
            },
            RecordingPublisher::default(),
            Box::new(Blocklist(Fr::from(0xBADu64))),
        );
        svc.initialize().await.unwrap();
        assert_eq!(svc.size(), 2);
        assert!(matches!(
            svc.generate_proof(&Fr::from(0xBADu64)),
            Err(AspError::LabelNotFound(_))
        ));
    }
}
