use crate::types::hash::Hash;
use crate::types::{hex_bytes, hex_bytes_vec};
use serde::{Deserialize, Serialize};

/// Number of bytes in an Ed25519 public key.
pub const ED25519_PUBKEY_LEN: usize = 32;

/// Number of bytes in an Ed25519 signature.
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// A validator and the voting power it holds in a given set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    pub voting_power: i64,
}

/// A precommit signature attributed to a validator address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSignature {
    #[serde(with = "hex_bytes")]
    pub validator_address: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Vote timestamp in Unix nanoseconds.
    pub timestamp: i64,
}

/// Header of the block's part set, committed into the block id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
}

/// Merkle path of the `app_hash` field through the header's field tree.
///
/// `aunts` run from the leaf's sibling up to the root's other child.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProof {
    pub total: u64,
    pub index: u64,
    pub aunts: Vec<Hash>,
}

/// A block as reported by a backend.
///
/// Nothing here is trusted: `app_hash` only counts once `app_hash_proof`
/// leads from it to `block_hash`, and `block_hash` once it is signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub height: u64,
    /// Hash of the block header; this is the block id validators sign.
    pub block_hash: Hash,
    /// Application state hash carried in this block's header.
    pub app_hash: Hash,
    pub app_hash_proof: HeaderProof,
    /// Partition that produced the block, when the backend declares it.
    pub source_partition: Option<String>,
    pub chain_id: String,
    #[serde(default)]
    pub part_set_header: PartSetHeader,
}

/// The precommits gathered for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommit {
    pub height: u64,
    pub round: i32,
    pub block_hash: Hash,
    pub signatures: Vec<ValidatorSignature>,
}

/// Outcome of checking a block's precommits against a validator set.
///
/// `signed_power` only counts validators whose signature verified against the
/// canonical vote for exactly this block and round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusProof {
    pub block_height: i64,
    pub block_hash: Hash,
    pub chain_id: String,
    pub round: i32,
    pub validators: Vec<ValidatorInfo>,
    pub signatures: Vec<ValidatorSignature>,
    pub total_power: i64,
    pub signed_power: i64,
}

impl ConsensusProof {
    pub fn required_power(&self) -> i64 {
        quorum_threshold(self.total_power)
    }

    pub fn has_quorum(&self) -> bool {
        self.signed_power >= self.required_power()
    }
}

/// A change of validator set, signed by the outgoing set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorTransition {
    pub from_height: i64,
    pub to_height: i64,
    pub old_validators: Vec<ValidatorInfo>,
    pub new_validators: Vec<ValidatorInfo>,
    /// One entry per `old_validators[i]`; an empty entry means "did not sign".
    #[serde(with = "hex_bytes_vec")]
    pub signatures: Vec<Vec<u8>>,
    /// Approval count as reported by the backend. Informational only.
    pub approvals: i64,
}

/// The axiomatic starting point of all validator-set induction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisTrust {
    pub genesis_hash: Hash,
    pub validators: Vec<ValidatorInfo>,
}

impl GenesisTrust {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// BFT quorum: strictly more than two thirds of `total_power`.
///
/// Exactly two thirds is not enough: for 300 the threshold is 201.
pub fn quorum_threshold(total_power: i64) -> i64 {
    let total = i128::from(total_power.max(0));
    (total * 2 / 3 + 1) as i64
}

/// Sum of voting power, or `None` if any power is negative or the sum overflows.
pub fn total_voting_power(validators: &[ValidatorInfo]) -> Option<i64> {
    validators.iter().try_fold(0i64, |acc, v| {
        if v.voting_power < 0 {
            return None;
        }
        acc.checked_add(v.voting_power)
    })
}
