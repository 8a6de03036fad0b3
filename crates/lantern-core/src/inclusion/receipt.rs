use crate::error::{InvariantViolation, VerificationError};
use crate::types::hash::{Hash, HashAlgorithm};
use crate::types::receipt::{MerkleReceipt, ReceiptEntry};

/// Longest sibling path accepted. Combined receipts stay far below this.
pub const MAX_RECEIPT_ENTRIES: usize = 1024;

/// Replays Merkle receipts with the network's committed digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiptVerifier {
    algorithm: HashAlgorithm,
}

impl ReceiptVerifier {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Walk the sibling path from `receipt.start` and return the root reached.
    pub fn compute_root(&self, receipt: &MerkleReceipt) -> Hash {
        replay(self.algorithm, &receipt.start, &receipt.entries)
    }

    /// Check that replaying the receipt reproduces its anchor.
    ///
    /// A mismatch is the expected outcome for a forged or incomplete proof and
    /// yields `Ok(false)`. Errors are reserved for receipts that cannot be
    /// evaluated at all.
    pub fn validate_integrity(&self, receipt: &MerkleReceipt) -> Result<bool, VerificationError> {
        if receipt.entries.len() > MAX_RECEIPT_ENTRIES {
            return Err(VerificationError::malformed(format!(
                "receipt has {} entries, limit is {}",
                receipt.entries.len(),
                MAX_RECEIPT_ENTRIES
            )));
        }
        Ok(self.compute_root(receipt) == receipt.anchor)
    }

    /// Like [`validate_integrity`](Self::validate_integrity) but reports the
    /// mismatch as an invariant violation carrying both roots.
    pub fn verify(&self, receipt: &MerkleReceipt) -> Result<(), VerificationError> {
        if self.validate_integrity(receipt)? {
            return Ok(());
        }
        Err(InvariantViolation::ReceiptRootMismatch {
            computed: self.compute_root(receipt),
            expected: receipt.anchor,
        }
        .into())
    }

    /// Chain `first` (leaf → X) with `second` (X → root) into one receipt.
    pub fn combine(
        &self,
        first: &MerkleReceipt,
        second: &MerkleReceipt,
    ) -> Result<MerkleReceipt, VerificationError> {
        if first.anchor != second.start {
            return Err(VerificationError::malformed(format!(
                "cannot combine receipts: anchor {} is not the next start {}",
                first.anchor, second.start
            )));
        }
        let mut entries = Vec::with_capacity(first.entries.len() + second.entries.len());
        entries.extend_from_slice(&first.entries);
        entries.extend_from_slice(&second.entries);
        Ok(MerkleReceipt {
            start: first.start,
            anchor: second.anchor,
            local_block: second.local_block,
            entries,
        })
    }
}

fn replay(algorithm: HashAlgorithm, start: &Hash, entries: &[ReceiptEntry]) -> Hash {
    let mut current = *start;
    for entry in entries {
        current = if entry.is_right_sibling {
            algorithm.combine(&current, &entry.sibling_hash)
        } else {
            algorithm.combine(&entry.sibling_hash, &current)
        };
    }
    current
}
