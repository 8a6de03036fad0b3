//! Query capability the verifier consumes.
//!
//! Nothing returned through this trait is trusted. Every record is checked
//! against receipts, app hashes, signatures and the genesis validator set
//! before it contributes to a trust level. Implementations own transport,
//! timeouts and cancellation; a timed-out query must surface as
//! [`BackendError::Unavailable`] rather than block.

use crate::error::ErrorKind;
use crate::types::consensus::{BlockCommit, BlockRecord, ValidatorInfo, ValidatorTransition};
use crate::types::hash::Hash;
use crate::types::receipt::{AccUrl, MerkleReceipt, PartitionAnchor};
use std::sync::Arc;
use thiserror::Error;

/// Errors a backend may report. Both are recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend has no record of {what}")]
    NotFound { what: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BackendError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BackendError::NotFound { what: what.into() }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        BackendError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::NotFound { .. } => ErrorKind::MissingData,
            BackendError::Unavailable { .. } => ErrorKind::BackendUnavailable,
        }
    }
}

/// A chain entry and, if the backend could produce one, its inclusion receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    pub entry_hash: Hash,
    pub receipt: Option<MerkleReceipt>,
}

/// Where to look for a partition anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorSearch {
    /// Single-hop search through the intermediate anchor chains.
    Intermediate,
    /// The authority partition's own anchor chain.
    AuthorityChain,
}

/// Request for the anchor that commits `root` of `source` into `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorQuery {
    pub source: AccUrl,
    pub target: AccUrl,
    pub root: Hash,
    pub search: AnchorSearch,
}

pub trait Backend: Send + Sync {
    /// Index of the latest entry of `chain_name` under `scope`.
    fn query_chain_head(&self, scope: &AccUrl, chain_name: &str) -> Result<u64, BackendError>;

    /// The entry at `index`, with an inclusion receipt if one is available.
    fn query_chain_entry(
        &self,
        scope: &AccUrl,
        chain_name: &str,
        index: u64,
    ) -> Result<ChainEntry, BackendError>;

    fn query_block(&self, scope: &AccUrl, height: u64) -> Result<BlockRecord, BackendError>;

    fn query_anchor(&self, query: &AnchorQuery) -> Result<PartitionAnchor, BackendError>;

    /// Precommit signatures for the block at `height` of `partition`.
    fn query_commit(&self, partition: &AccUrl, height: u64) -> Result<BlockCommit, BackendError>;

    fn query_validator_set(
        &self,
        partition: &AccUrl,
        height: u64,
    ) -> Result<Vec<ValidatorInfo>, BackendError>;

    /// Validator transitions between `from_height` and `to_height`, in order.
    fn query_transitions(
        &self,
        from_height: i64,
        to_height: i64,
    ) -> Result<Vec<ValidatorTransition>, BackendError>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn query_chain_head(&self, scope: &AccUrl, chain_name: &str) -> Result<u64, BackendError> {
        (**self).query_chain_head(scope, chain_name)
    }

    fn query_chain_entry(
        &self,
        scope: &AccUrl,
        chain_name: &str,
        index: u64,
    ) -> Result<ChainEntry, BackendError> {
        (**self).query_chain_entry(scope, chain_name, index)
    }

    fn query_block(&self, scope: &AccUrl, height: u64) -> Result<BlockRecord, BackendError> {
        (**self).query_block(scope, height)
    }

    fn query_anchor(&self, query: &AnchorQuery) -> Result<PartitionAnchor, BackendError> {
        (**self).query_anchor(query)
    }

    fn query_commit(&self, partition: &AccUrl, height: u64) -> Result<BlockCommit, BackendError> {
        (**self).query_commit(partition, height)
    }

    fn query_validator_set(
        &self,
        partition: &AccUrl,
        height: u64,
    ) -> Result<Vec<ValidatorInfo>, BackendError> {
        (**self).query_validator_set(partition, height)
    }

    fn query_transitions(
        &self,
        from_height: i64,
        to_height: i64,
    ) -> Result<Vec<ValidatorTransition>, BackendError> {
        (**self).query_transitions(from_height, to_height)
    }
}
