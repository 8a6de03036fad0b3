use crate::backend::Backend;
use crate::error::{InvariantViolation, ResultExt, VerificationError};
use crate::inclusion::receipt::ReceiptVerifier;
use crate::types::receipt::{
    AccUrl, Layer1EntryInclusion, BVN_PARTITION_PREFIX, DIRECTORY_PARTITION,
};
use crate::types::report::{LayerResult, LAYER_ENTRY_INCLUSION};
use tracing::{debug, warn};

/// Accepted source partitions: the directory itself, or any BVN.
pub fn is_accepted_partition(partition: &str) -> bool {
    let normalized = partition.trim().to_ascii_lowercase();
    normalized == DIRECTORY_PARTITION || normalized.contains(BVN_PARTITION_PREFIX)
}

/// Layer1: a chain entry is the leaf of a receipt whose root is an anchor.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryInclusionLayer {
    receipts: ReceiptVerifier,
}

impl EntryInclusionLayer {
    pub fn new(receipts: ReceiptVerifier) -> Self {
        Self { receipts }
    }

    /// Fetch the entry at `(scope, chain_name, chain_index)` with its receipt
    /// and resolve which partition produced the receipt's anchor.
    pub fn build_from_chain_entry<B: Backend + ?Sized>(
        &self,
        backend: &B,
        scope: &AccUrl,
        chain_name: &str,
        chain_index: u64,
    ) -> Result<Layer1EntryInclusion, VerificationError> {
        if chain_name.trim().is_empty() {
            return Err(VerificationError::malformed("chain name is empty"));
        }

        let entry = backend
            .query_chain_entry(scope, chain_name, chain_index)
            .context(format!(
                "querying entry {} of chain {:?} under {}",
                chain_index, chain_name, scope
            ))?;

        let receipt = entry.receipt.ok_or_else(|| VerificationError::MissingReceipt {
            scope: scope.to_string(),
            chain: chain_name.to_string(),
            index: chain_index,
        })?;

        if entry.entry_hash.is_zero() {
            return Err(VerificationError::EmptyLeaf {
                scope: scope.to_string(),
                chain: chain_name.to_string(),
                index: chain_index,
            });
        }

        let block = backend
            .query_block(scope, receipt.local_block)
            .context(format!(
                "resolving source partition of block {} under {}",
                receipt.local_block, scope
            ))?;

        let source_partition = match block.source_partition {
            Some(p) if !p.trim().is_empty() && is_accepted_partition(&p) => {
                AccUrl::parse(&p)
                    .map_err(|_| VerificationError::PartitionResolution {
                        height: receipt.local_block,
                        found: Some(p.clone()),
                    })?
                    .to_string()
            }
            found => {
                return Err(VerificationError::PartitionResolution {
                    height: receipt.local_block,
                    found,
                })
            }
        };

        let proof = Layer1EntryInclusion {
            scope: scope.clone(),
            chain_name: chain_name.to_string(),
            chain_index,
            leaf: entry.entry_hash,
            anchor: receipt.anchor,
            local_block: receipt.local_block,
            source_partition,
            receipt,
        };
        check_consistency(&proof)?;

        debug!(
            scope = %scope,
            chain = chain_name,
            index = chain_index,
            leaf = %proof.leaf.short(),
            anchor = %proof.anchor.short(),
            partition = %proof.source_partition,
            "built entry inclusion proof"
        );
        Ok(proof)
    }

    /// Every Layer1 check, as a `Result` so the orchestrator can abort on it.
    pub fn check(&self, proof: &Layer1EntryInclusion) -> Result<(), VerificationError> {
        check_consistency(proof)?;
        self.receipts
            .verify(&proof.receipt)
            .context("entry receipt does not reproduce its anchor")
    }

    /// Verify a Layer1 proof. Any single failed check makes the whole layer invalid.
    pub fn verify(&self, proof: &Layer1EntryInclusion) -> LayerResult {
        match self.check(proof) {
            Ok(()) => LayerResult::passed(LAYER_ENTRY_INCLUSION)
                .with_detail("scope", proof.scope.to_string())
                .with_detail("chain_name", proof.chain_name.clone())
                .with_detail("chain_index", proof.chain_index)
                .with_detail("leaf", proof.leaf.to_hex())
                .with_detail("anchor", proof.anchor.to_hex())
                .with_detail("local_block", proof.local_block)
                .with_detail("source_partition", proof.source_partition.clone())
                .with_detail("receipt_entries", proof.receipt.entries.len()),
            Err(e) => {
                warn!(scope = %proof.scope, error = %e.report(), "entry inclusion rejected");
                LayerResult::failed(LAYER_ENTRY_INCLUSION, &e)
                    .with_detail("scope", proof.scope.to_string())
            }
        }
    }
}

/// Field-by-field agreement between the proof and its embedded receipt.
fn check_consistency(proof: &Layer1EntryInclusion) -> Result<(), VerificationError> {
    if proof.leaf != proof.receipt.start {
        return Err(InvariantViolation::LeafMismatch {
            leaf: proof.leaf,
            receipt_start: proof.receipt.start,
        }
        .into());
    }
    if proof.anchor != proof.receipt.anchor {
        return Err(InvariantViolation::AnchorMismatch {
            anchor: proof.anchor,
            receipt_anchor: proof.receipt.anchor,
        }
        .into());
    }
    if proof.local_block != proof.receipt.local_block {
        return Err(InvariantViolation::LocalBlockMismatch {
            local_block: proof.local_block,
            receipt_block: proof.receipt.local_block,
        }
        .into());
    }
    if proof.source_partition.trim().is_empty() {
        return Err(InvariantViolation::EmptySourcePartition.into());
    }
    if !is_accepted_partition(&proof.source_partition) {
        return Err(InvariantViolation::UnacceptedPartition {
            partition: proof.source_partition.clone(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ChainEntry};
    use crate::error::ErrorKind;
    use crate::testing::{receipt_for, MemoryBackend};
    use crate::types::hash::{Hash, HashAlgorithm};

    const BVN: &str = "acc://bvn-apollo.acme";

    fn scope() -> AccUrl {
        AccUrl::parse("acc://alice.acme/tokens").unwrap()
    }

    fn backend_with_entry(leaf: Hash, partition: Option<&str>) -> MemoryBackend {
        let receipt = receipt_for(HashAlgorithm::Sha256, leaf, &[Hash([2; 32]), Hash([3; 32])], 40);
        let mut backend = MemoryBackend::default();
        backend.add_entry(
            &scope(),
            "main",
            0,
            ChainEntry {
                entry_hash: leaf,
                receipt: Some(receipt.clone()),
            },
        );
        backend.add_block_with_partition(&scope(), 40, receipt.anchor, partition);
        backend
    }

    #[test]
    fn test_partition_format() {
        assert!(is_accepted_partition("acc://dn.acme"));
        assert!(is_accepted_partition("acc://bvn-apollo.acme"));
        assert!(is_accepted_partition("ACC://BVN-Yutu.acme"));
        assert!(!is_accepted_partition("acc://random.acme"));
        assert!(!is_accepted_partition(""));
    }

    #[test]
    fn test_build_and_verify() {
        let leaf = Hash([1; 32]);
        let backend = backend_with_entry(leaf, Some(BVN));
        let layer = EntryInclusionLayer::default();

        let proof = layer.build_from_chain_entry(&backend, &scope(), "main", 0).unwrap();
        assert_eq!(proof.leaf, leaf);
        assert_eq!(proof.anchor, proof.receipt.anchor);
        assert_eq!(proof.local_block, 40);
        assert_eq!(proof.source_partition, BVN);

        let result = layer.verify(&proof);
        assert!(result.valid, "{:?}", result.error_message);
        assert_eq!(result.detail("local_block"), Some(&serde_json::json!(40)));
    }

    #[test]
    fn test_missing_receipt() {
        let mut backend = MemoryBackend::default();
        backend.add_entry(
            &scope(),
            "main",
            0,
            ChainEntry {
                entry_hash: Hash([1; 32]),
                receipt: None,
            },
        );
        let err = EntryInclusionLayer::default()
            .build_from_chain_entry(&backend, &scope(), "main", 0)
            .unwrap_err();
        assert!(matches!(err, VerificationError::MissingReceipt { index: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::MissingData);
    }

    #[test]
    fn test_empty_leaf() {
        let backend = backend_with_entry(Hash::ZERO, Some(BVN));
        let err = EntryInclusionLayer::default()
            .build_from_chain_entry(&backend, &scope(), "main", 0)
            .unwrap_err();
        assert!(matches!(err, VerificationError::EmptyLeaf { .. }));
        assert!(err.aborts_verification());
    }

    #[test]
    fn test_partition_resolution_failures() {
        for partition in [None, Some(""), Some("acc://random.acme")] {
            let backend = backend_with_entry(Hash([1; 32]), partition);
            let err = EntryInclusionLayer::default()
                .build_from_chain_entry(&backend, &scope(), "main", 0)
                .unwrap_err();
            assert!(
                matches!(err, VerificationError::PartitionResolution { height: 40, .. }),
                "{:?}",
                partition
            );
        }
    }

    #[test]
    fn test_backend_outage_is_retryable() {
        let mut backend = backend_with_entry(Hash([1; 32]), Some(BVN));
        backend.fail_entries_with(BackendError::unavailable("connection reset"));
        let err = EntryInclusionLayer::default()
            .build_from_chain_entry(&backend, &scope(), "main", 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_verify_rejects_tampered_fields() {
        let backend = backend_with_entry(Hash([1; 32]), Some(BVN));
        let layer = EntryInclusionLayer::default();
        let proof = layer.build_from_chain_entry(&backend, &scope(), "main", 0).unwrap();

        let mut wrong_leaf = proof.clone();
        wrong_leaf.leaf = Hash([9; 32]);
        let mut wrong_anchor = proof.clone();
        wrong_anchor.anchor = Hash([9; 32]);
        let mut wrong_block = proof.clone();
        wrong_block.local_block += 1;
        let mut no_partition = proof.clone();
        no_partition.source_partition = String::new();
        let mut forged_path = proof.clone();
        forged_path.receipt.entries[0].sibling_hash = Hash([9; 32]);

        for tampered in [wrong_leaf, wrong_anchor, wrong_block, no_partition, forged_path] {
            let result = layer.verify(&tampered);
            assert!(!result.valid);
            assert_eq!(result.error_kind, Some(ErrorKind::InvariantViolation));
            assert!(result.error_message.is_some());
        }
    }
}
