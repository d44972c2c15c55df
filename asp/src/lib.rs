//! Galeon Association Set Provider.
//!
//! Maintains the Merkle tree of approved deposit labels that every
//! withdrawal proof cites, persists it as an append-only label log, and
//! publishes the tree root through the entrypoint contract. The daemon
//! binary `galeon-aspd` drives the poll/publish loop.

pub mod chain;
pub mod error;
pub mod service;
pub mod store;

pub use error::AspError;
pub use service::{
    ApprovalPolicy, ApproveAll, AspService, InitReport, InitSource, LabelFeed, NewLabel,
    ProcessReport, PublishReport, RootPublisher, DEFAULT_POLL_INTERVAL,
};
pub use store::{JsonlLabelStore, LabelRecord, LabelStore, MemoryLabelStore};
