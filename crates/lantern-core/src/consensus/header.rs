//! Binding between a block's signed header hash and its app hash.
//!
//! A CometBFT header hash is the root of a binary Merkle tree over the
//! header's fields, each leaf the protobuf encoding of one field. Validators
//! sign that root, so a reported `app_hash` is only as good as its path to it.
//! The header at height H carries the app hash produced by executing block
//! H-1; backends report the header whose field they prove.

use crate::consensus::vote::put_message;
use crate::error::{InvariantViolation, VerificationError};
use crate::types::consensus::BlockRecord;
use crate::types::hash::{Hash, HashAlgorithm};

/// Fields in a CometBFT header, in hashing order.
pub const HEADER_FIELD_COUNT: u64 = 14;

/// Position of `app_hash` among the header fields.
pub const APP_HASH_FIELD: u64 = 10;

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

pub fn leaf_hash(leaf: &[u8]) -> Hash {
    let mut buf = Vec::with_capacity(1 + leaf.len());
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(leaf);
    HashAlgorithm::Sha256.digest(&buf)
}

pub fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(1 + 2 * 32);
    buf.push(INNER_PREFIX);
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    HashAlgorithm::Sha256.digest(&buf)
}

/// A byte field as it enters the header tree: a `BytesValue` message,
/// empty when the field is empty.
pub fn encode_bytes_field(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if !value.is_empty() {
        put_message(&mut out, 0x0a, value);
    }
    out
}

/// Largest power of two strictly below `total`. Requires `total >= 2`.
fn split_point(total: u64) -> u64 {
    let k = 1u64 << (63 - total.leading_zeros());
    if k == total {
        k >> 1
    } else {
        k
    }
}

/// Root of the tree over `leaves`.
pub fn root_from_leaves<T: AsRef<[u8]>>(leaves: &[T]) -> Hash {
    match leaves {
        [] => HashAlgorithm::Sha256.digest(&[]),
        [leaf] => leaf_hash(leaf.as_ref()),
        _ => {
            let split = split_point(leaves.len() as u64) as usize;
            inner_hash(
                &root_from_leaves(&leaves[..split]),
                &root_from_leaves(&leaves[split..]),
            )
        }
    }
}

/// Root reached from the leaf at `index` of `total` through `aunts`, or
/// `None` when the path has the wrong shape.
pub fn root_from_aunts(index: u64, total: u64, leaf: Hash, aunts: &[Hash]) -> Option<Hash> {
    if index >= total {
        return None;
    }
    if total == 1 {
        return aunts.is_empty().then_some(leaf);
    }
    let (last, rest) = aunts.split_last()?;
    let split = split_point(total);
    if index < split {
        let left = root_from_aunts(index, split, leaf, rest)?;
        Some(inner_hash(&left, last))
    } else {
        let right = root_from_aunts(index - split, total - split, leaf, rest)?;
        Some(inner_hash(last, &right))
    }
}

/// Require `block.app_hash` to be the `app_hash` field of the header that
/// hashes to `block.block_hash`.
pub fn check_app_hash(block: &BlockRecord) -> Result<(), VerificationError> {
    let proof = &block.app_hash_proof;
    let computed = if proof.total == HEADER_FIELD_COUNT && proof.index == APP_HASH_FIELD {
        let leaf = leaf_hash(&encode_bytes_field(block.app_hash.as_bytes()));
        root_from_aunts(proof.index, proof.total, leaf, &proof.aunts)
    } else {
        None
    };
    if computed != Some(block.block_hash) {
        return Err(InvariantViolation::HeaderCommitmentMismatch {
            height: block.height,
            block_hash: block.block_hash,
            app_hash: block.app_hash,
        }
        .into());
    }
    Ok(())
}
