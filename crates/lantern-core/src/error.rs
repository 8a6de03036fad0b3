use crate::backend::BackendError;
use crate::types::hash::{Hash, HashParseError};
use crate::types::receipt::UrlError;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// Coarse classification of a failure, used for retry and abort decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller passed something unusable. Not retried.
    MalformedInput,
    /// Transient backend failure. Safe to retry with backoff, never cached.
    BackendUnavailable,
    /// The backend answered but lacks a required field. Not yet provable.
    MissingData,
    /// A cryptographic check failed. Possible fraud; never retried or downgraded.
    InvariantViolation,
    /// Validator transitions have a height gap. Fatal.
    ChainDiscontinuity,
}

/// A cryptographic or consistency check that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("Receipt replay reached {computed} but the receipt claims anchor {expected}")]
    ReceiptRootMismatch { computed: Hash, expected: Hash },

    #[error("Proof leaf {leaf} does not match receipt start {receipt_start}")]
    LeafMismatch { leaf: Hash, receipt_start: Hash },

    #[error("Proof anchor {anchor} does not match receipt anchor {receipt_anchor}")]
    AnchorMismatch { anchor: Hash, receipt_anchor: Hash },

    #[error("Proof local block {local_block} does not match receipt local block {receipt_block}")]
    LocalBlockMismatch { local_block: u64, receipt_block: u64 },

    #[error("Proof has no source partition")]
    EmptySourcePartition,

    #[error("Partition {partition:?} is not an accepted partition URL")]
    UnacceptedPartition { partition: String },

    #[error("Block {height} of {partition} commits app hash {app_hash}, expected {expected}")]
    StateCommitmentMismatch {
        partition: String,
        height: u64,
        expected: Hash,
        app_hash: Hash,
    },

    #[error("Backend returned block {returned} when asked for block {requested}")]
    BlockHeightMismatch { requested: u64, returned: u64 },

    #[error("Partition anchor rejected: {reason}")]
    AnchorRecordMismatch { reason: String },

    #[error(
        "Commit is for block {commit_hash} at height {commit_height}, \
         expected {block_hash} at {block_height}"
    )]
    CommitMismatch {
        block_hash: Hash,
        block_height: u64,
        commit_hash: Hash,
        commit_height: u64,
    },

    #[error("Header {block_hash} at height {height} does not commit app hash {app_hash}")]
    HeaderCommitmentMismatch {
        height: u64,
        block_hash: Hash,
        app_hash: Hash,
    },

    #[error("Insufficient signing power: {signed}/{total} (need {required})")]
    QuorumNotMet { signed: i64, total: i64, required: i64 },

    #[error("Validator set at height {height} does not match the set derived from genesis")]
    ValidatorSetMismatch { height: i64 },

    #[error("Invalid voting power in validator set: negative power or overflow")]
    InvalidVotingPower,
}

/// Errors from the verification layers.
/// Each variant is a specific, actionable failure; `kind()` maps it onto the
/// retry/abort taxonomy.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    #[error("Entry {index} of chain {chain:?} under {scope} has an empty hash")]
    EmptyLeaf {
        scope: String,
        chain: String,
        index: u64,
    },

    #[error("Backend returned no receipt for entry {index} of chain {chain:?} under {scope}")]
    MissingReceipt {
        scope: String,
        chain: String,
        index: u64,
    },

    #[error("Cannot resolve source partition of block {height}: {}", describe_partition(.found))]
    PartitionResolution { height: u64, found: Option<String> },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error(
        "Insufficient signing power for transition {from_height}->{to_height}: \
         {signed}/{total} (need {required})"
    )]
    InvalidTransition {
        from_height: i64,
        to_height: i64,
        signed: i64,
        total: i64,
        required: i64,
    },

    #[error("Transition {index} is malformed: {reason}")]
    MalformedTransition { index: usize, reason: String },

    #[error(
        "Chain discontinuity: expected a transition from height {expected}, got one from {found}"
    )]
    ChainDiscontinuity { expected: i64, found: i64 },

    #[error("Height {target} is unreachable from genesis: path stops at {reached}")]
    UnreachableHeight { target: i64, reached: i64 },

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<VerificationError>,
    },
}

fn describe_partition(found: &Option<String>) -> String {
    match found {
        None => "block declares no source partition".to_string(),
        Some(p) if p.is_empty() => "block declares an empty source partition".to_string(),
        Some(p) => format!("{:?} is not an accepted partition URL", p),
    }
}

impl VerificationError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        VerificationError::MalformedInput {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VerificationError::MalformedInput { .. } | VerificationError::EmptyLeaf { .. } => {
                ErrorKind::MalformedInput
            }
            VerificationError::MissingReceipt { .. } => ErrorKind::MissingData,
            VerificationError::PartitionResolution { found, .. } => match found {
                Some(p) if !p.is_empty() => ErrorKind::InvariantViolation,
                _ => ErrorKind::MissingData,
            },
            VerificationError::Backend(e) => e.kind(),
            VerificationError::Invariant(_)
            | VerificationError::InvalidTransition { .. }
            | VerificationError::MalformedTransition { .. } => ErrorKind::InvariantViolation,
            VerificationError::ChainDiscontinuity { .. }
            | VerificationError::UnreachableHeight { .. } => ErrorKind::ChainDiscontinuity,
            VerificationError::Context { source, .. } => source.kind(),
        }
    }

    /// Transient failures only. Invariant violations are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BackendUnavailable | ErrorKind::MissingData
        )
    }

    /// Failures that end the whole verification instead of one layer.
    pub fn aborts_verification(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedInput | ErrorKind::ChainDiscontinuity
        )
    }

    /// The innermost cause, skipping context wrappers.
    pub fn root_cause(&self) -> &VerificationError {
        match self {
            VerificationError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Full message including every context layer, outermost first.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = current {
            message.push_str(": ");
            message.push_str(&err.to_string());
            current = err.source();
        }
        message
    }
}

impl From<UrlError> for VerificationError {
    fn from(e: UrlError) -> Self {
        VerificationError::malformed(e.to_string())
    }
}

impl From<HashParseError> for VerificationError {
    fn from(e: HashParseError) -> Self {
        VerificationError::malformed(e.to_string())
    }
}

/// Attach a caused-by layer to a failure while keeping the original error.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, VerificationError>;
}

impl<T, E: Into<VerificationError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, VerificationError> {
        self.map_err(|e| VerificationError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}
