//! Layer2 (state commitment) and Layer2.5 (cross-partition anchoring).

use crate::backend::{AnchorQuery, AnchorSearch, Backend, BackendError};
use crate::error::{ErrorKind, InvariantViolation, ResultExt, VerificationError};
use crate::inclusion::receipt::ReceiptVerifier;
use crate::types::consensus::BlockRecord;
use crate::types::hash::Hash;
use crate::types::receipt::{AccUrl, PartitionAnchor};
use crate::types::report::{LayerResult, LAYER_PARTITION_ANCHOR, LAYER_STATE_COMMITMENT};
use tracing::{debug, warn};

/// A source root proven to be anchored into the authority partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchoredRoot {
    pub anchor: PartitionAnchor,
    /// The authority block whose app hash is the anchor receipt's root.
    pub authority_block: BlockRecord,
    /// Which search produced the anchor.
    pub search: AnchorSearch,
}

#[derive(Clone, Debug)]
pub struct AnchoringLayer {
    receipts: ReceiptVerifier,
    authority: AccUrl,
}

impl AnchoringLayer {
    pub fn new(receipts: ReceiptVerifier, authority: AccUrl) -> Self {
        Self {
            receipts,
            authority,
        }
    }

    pub fn authority(&self) -> &AccUrl {
        &self.authority
    }

    /// Accounts homed outside the authority partition need a Layer2.5 anchor.
    pub fn requires_anchor(&self, partition: &AccUrl) -> bool {
        partition != &self.authority
    }

    /// Layer2: `root` must be the app hash of `partition`'s block at `height`.
    pub fn check_state_commitment<B: Backend + ?Sized>(
        &self,
        backend: &B,
        partition: &AccUrl,
        root: &Hash,
        height: u64,
    ) -> Result<BlockRecord, VerificationError> {
        let block = backend
            .query_block(partition, height)
            .context(format!("querying block {} of {}", height, partition))?;
        check_block_commits(&block, partition, root, height)?;
        Ok(block)
    }

    pub fn verify_state_commitment<B: Backend + ?Sized>(
        &self,
        backend: &B,
        partition: &AccUrl,
        root: &Hash,
        height: u64,
    ) -> (LayerResult, Option<BlockRecord>) {
        match self.check_state_commitment(backend, partition, root, height) {
            Ok(block) => {
                debug!(
                    partition = %partition,
                    height,
                    root = %root.short(),
                    "state commitment verified"
                );
                let result = LayerResult::passed(LAYER_STATE_COMMITMENT)
                    .with_detail("partition", partition.to_string())
                    .with_detail("height", height)
                    .with_detail("app_hash", block.app_hash.to_hex())
                    .with_detail("block_hash", block.block_hash.to_hex());
                (result, Some(block))
            }
            Err(e) => {
                warn!(
                    partition = %partition,
                    height,
                    error = %e.report(),
                    "state commitment rejected"
                );
                let result = LayerResult::failed(LAYER_STATE_COMMITMENT, &e)
                    .with_detail("partition", partition.to_string())
                    .with_detail("height", height);
                (result, None)
            }
        }
    }

    /// Layer2.5: find and verify the anchor of `source`'s `root` in the authority.
    ///
    /// The intermediate search runs first; the authority chain is the fallback
    /// when the backend has no intermediate record. An anchor that is returned
    /// but fails verification is reported as-is, never papered over by the
    /// fallback.
    pub fn find_anchor<B: Backend + ?Sized>(
        &self,
        backend: &B,
        source: &AccUrl,
        root: &Hash,
    ) -> Result<AnchoredRoot, VerificationError> {
        for search in [AnchorSearch::Intermediate, AnchorSearch::AuthorityChain] {
            let query = AnchorQuery {
                source: source.clone(),
                target: self.authority.clone(),
                root: *root,
                search,
            };
            let anchor = match backend.query_anchor(&query) {
                Ok(anchor) => anchor,
                Err(BackendError::NotFound { .. }) => {
                    debug!(
                        source = %source,
                        root = %root.short(),
                        ?search,
                        "no anchor found, trying next search"
                    );
                    continue;
                }
                Err(e) => {
                    return Err::<AnchoredRoot, _>(e)
                        .context(format!("searching {:?} anchors of {}", search, source))
                }
            };

            self.check_anchor(&anchor, source, root)?;
            let authority_block = self
                .check_state_commitment(
                    backend,
                    &self.authority,
                    &anchor.receipt.anchor,
                    anchor.receipt.local_block,
                )
                .context("authority block does not commit the anchor root")?;

            debug!(
                source = %source,
                root = %root.short(),
                authority_root = %anchor.receipt.anchor.short(),
                ?search,
                "partition anchor verified"
            );
            return Ok(AnchoredRoot {
                anchor,
                authority_block,
                search,
            });
        }

        Err(BackendError::not_found(format!(
            "anchor of {} root {} in {}",
            source, root, self.authority
        ))
        .into())
    }

    /// Structural and cryptographic checks on a single anchor record.
    pub fn check_anchor(
        &self,
        anchor: &PartitionAnchor,
        source: &AccUrl,
        root: &Hash,
    ) -> Result<(), VerificationError> {
        let reject = |reason: String| -> VerificationError {
            InvariantViolation::AnchorRecordMismatch { reason }.into()
        };

        if anchor.anchor_hash != *root {
            return Err(reject(format!(
                "anchored hash {} is not the source root {}",
                anchor.anchor_hash, root
            )));
        }
        if anchor.receipt.start != *root {
            return Err(reject(format!(
                "anchor receipt starts at {}, not the source root {}",
                anchor.receipt.start, root
            )));
        }
        match AccUrl::parse(&anchor.source_partition) {
            Ok(url) if &url == source => {}
            _ => {
                return Err(reject(format!(
                    "anchor source {:?} is not {}",
                    anchor.source_partition, source
                )))
            }
        }
        match AccUrl::parse(&anchor.target_partition) {
            Ok(url) if url == self.authority => {}
            _ => {
                return Err(reject(format!(
                    "anchor target {:?} is not {}",
                    anchor.target_partition, self.authority
                )))
            }
        }
        self.receipts
            .verify(&anchor.receipt)
            .context("anchor receipt does not reproduce the authority root")
    }

    pub fn verify_anchoring<B: Backend + ?Sized>(
        &self,
        backend: &B,
        source: &AccUrl,
        root: &Hash,
    ) -> (LayerResult, Option<AnchoredRoot>) {
        match self.find_anchor(backend, source, root) {
            Ok(anchored) => {
                let result = LayerResult::passed(LAYER_PARTITION_ANCHOR)
                    .with_detail("source_partition", source.to_string())
                    .with_detail("target_partition", self.authority.to_string())
                    .with_detail("source_root", root.to_hex())
                    .with_detail("authority_root", anchored.anchor.receipt.anchor.to_hex())
                    .with_detail("authority_height", anchored.anchor.receipt.local_block)
                    .with_detail(
                        "search",
                        match anchored.search {
                            AnchorSearch::Intermediate => "intermediate",
                            AnchorSearch::AuthorityChain => "authority_chain",
                        },
                    );
                (result, Some(anchored))
            }
            Err(e) => {
                warn!(
                    source = %source,
                    root = %root.short(),
                    error = %e.report(),
                    "partition anchor not established"
                );
                let result = LayerResult::failed(LAYER_PARTITION_ANCHOR, &e)
                    .with_detail("source_partition", source.to_string())
                    .with_detail("source_root", root.to_hex())
                    .with_detail("anchor_rejected", e.kind() == ErrorKind::InvariantViolation);
                (result, None)
            }
        }
    }
}

fn check_block_commits(
    block: &BlockRecord,
    partition: &AccUrl,
    root: &Hash,
    height: u64,
) -> Result<(), VerificationError> {
    if block.height != height {
        return Err(InvariantViolation::BlockHeightMismatch {
            requested: height,
            returned: block.height,
        }
        .into());
    }
    if block.app_hash != *root {
        return Err(InvariantViolation::StateCommitmentMismatch {
            partition: partition.to_string(),
            height,
            expected: *root,
            app_hash: block.app_hash,
        }
        .into());
    }
    Ok(())
}
