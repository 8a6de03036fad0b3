//! Deterministic fixtures shared by the unit tests.

use crate::backend::{AnchorQuery, AnchorSearch, Backend, BackendError, ChainEntry};
use crate::consensus::header::{
    encode_bytes_field, root_from_leaves, APP_HASH_FIELD, HEADER_FIELD_COUNT,
};
use crate::consensus::validator_chain::transition_message;
use crate::consensus::vote::CanonicalVote;
use crate::types::consensus::{
    BlockCommit, BlockRecord, HeaderProof, PartSetHeader, ValidatorInfo, ValidatorSignature,
    ValidatorTransition,
};
use crate::types::hash::{Hash, HashAlgorithm};
use crate::types::receipt::{AccUrl, MerkleReceipt, PartitionAnchor, ReceiptEntry};
use ed25519_dalek::{Signer, SigningKey};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) const TEST_CHAIN_ID: &str = "test";

/// A receipt from `leaf` through `siblings`, alternating right and left.
pub(crate) fn receipt_for(
    alg: HashAlgorithm,
    leaf: Hash,
    siblings: &[Hash],
    local_block: u64,
) -> MerkleReceipt {
    let mut current = leaf;
    let mut entries = Vec::with_capacity(siblings.len());
    for (i, sibling) in siblings.iter().enumerate() {
        if i % 2 == 0 {
            current = alg.combine(&current, sibling);
            entries.push(ReceiptEntry::right(*sibling));
        } else {
            current = alg.combine(sibling, &current);
            entries.push(ReceiptEntry::left(*sibling));
        }
    }
    MerkleReceipt {
        start: leaf,
        anchor: current,
        local_block,
        entries,
    }
}

/// Encoded header fields of a block at `height`, with `app_hash` in its slot.
pub(crate) fn header_fields(scope: impl Display, height: u64, app_hash: &Hash) -> Vec<Vec<u8>> {
    (0..HEADER_FIELD_COUNT)
        .map(|i| {
            if i == APP_HASH_FIELD {
                encode_bytes_field(app_hash.as_bytes())
            } else {
                let label = format!("{}@{}/{}", scope, height, i);
                let filler = HashAlgorithm::Sha256.digest(label.as_bytes());
                encode_bytes_field(filler.as_bytes())
            }
        })
        .collect()
}

/// Aunts of `leaves[index]`, innermost first.
pub(crate) fn aunts_for<T: AsRef<[u8]>>(leaves: &[T], index: usize) -> Vec<Hash> {
    if leaves.len() <= 1 {
        return Vec::new();
    }
    let split = leaves.len().next_power_of_two() / 2;
    if index < split {
        let mut aunts = aunts_for(&leaves[..split], index);
        aunts.push(root_from_leaves(&leaves[split..]));
        aunts
    } else {
        let mut aunts = aunts_for(&leaves[split..], index - split);
        aunts.push(root_from_leaves(&leaves[..split]));
        aunts
    }
}

pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Validator whose address is the first 20 bytes of SHA-256(pubkey).
pub(crate) fn validator(seed: u8, power: i64) -> ValidatorInfo {
    let public_key = signing_key(seed).verifying_key().to_bytes().to_vec();
    let address = HashAlgorithm::Sha256.digest(&public_key).0[..20].to_vec();
    ValidatorInfo {
        address,
        public_key,
        voting_power: power,
    }
}

pub(crate) fn validator_set(members: &[(u8, i64)]) -> Vec<ValidatorInfo> {
    members.iter().map(|(seed, power)| validator(*seed, *power)).collect()
}

/// Precommit signature by `seed` over `block` in `round`.
pub(crate) fn sign_vote(
    seed: u8,
    block: &BlockRecord,
    round: i32,
    timestamp: i64,
) -> ValidatorSignature {
    let vote = CanonicalVote {
        height: block.height as i64,
        round,
        block_hash: &block.block_hash,
        part_set_header: &block.part_set_header,
        timestamp,
        chain_id: &block.chain_id,
    };
    ValidatorSignature {
        validator_address: validator(seed, 0).address,
        signature: signing_key(seed).sign(&vote.sign_bytes()).to_bytes().to_vec(),
        timestamp,
    }
}

pub(crate) fn sign_commit(block: &BlockRecord, round: i32, signers: &[u8]) -> BlockCommit {
    let signatures = signers
        .iter()
        .enumerate()
        .map(|(i, seed)| sign_vote(*seed, block, round, 1_700_000_000_000_000_000 + i as i64))
        .collect();
    BlockCommit {
        height: block.height,
        round,
        block_hash: block.block_hash,
        signatures,
    }
}

/// A transition from `old` to `new` signed by the old validators in `signers`.
pub(crate) fn sign_transition(
    alg: HashAlgorithm,
    from_height: i64,
    to_height: i64,
    old: &[(u8, i64)],
    new: &[(u8, i64)],
    signers: &[u8],
) -> ValidatorTransition {
    let mut transition = ValidatorTransition {
        from_height,
        to_height,
        old_validators: validator_set(old),
        new_validators: validator_set(new),
        signatures: vec![Vec::new(); old.len()],
        approvals: 0,
    };
    let message = transition_message(alg, &transition);
    for (i, (seed, _)) in old.iter().enumerate() {
        if signers.contains(seed) {
            let signature = signing_key(*seed).sign(message.as_bytes());
            transition.signatures[i] = signature.to_bytes().to_vec();
            transition.approvals += 1;
        }
    }
    transition
}

/// In-memory backend. Missing records come back as `NotFound`.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    heads: HashMap<(AccUrl, String), u64>,
    entries: HashMap<(AccUrl, String, u64), ChainEntry>,
    blocks: HashMap<(AccUrl, u64), BlockRecord>,
    anchors: Vec<(AnchorSearch, PartitionAnchor)>,
    commits: HashMap<(AccUrl, u64), BlockCommit>,
    validator_sets: HashMap<(AccUrl, u64), Vec<ValidatorInfo>>,
    transitions: Vec<ValidatorTransition>,
    entry_failure: Option<BackendError>,
    commit_failure: Option<BackendError>,
    pub entry_queries: AtomicUsize,
    pub commit_queries: AtomicUsize,
    pub transition_queries: AtomicUsize,
}

impl MemoryBackend {
    /// Adds an entry and moves the chain head to it.
    pub fn add_entry(&mut self, scope: &AccUrl, chain: &str, index: u64, entry: ChainEntry) {
        let head = self.heads.entry((scope.clone(), chain.to_string())).or_insert(index);
        *head = (*head).max(index);
        self.entries.insert((scope.clone(), chain.to_string(), index), entry);
    }

    pub fn add_block(&mut self, scope: &AccUrl, block: BlockRecord) {
        self.blocks.insert((scope.clone(), block.height), block);
    }

    /// Adds a block whose header commits `app_hash` and returns it for signing.
    pub fn add_block_with_partition(
        &mut self,
        scope: &AccUrl,
        height: u64,
        app_hash: Hash,
        partition: Option<&str>,
    ) -> BlockRecord {
        let alg = HashAlgorithm::Sha256;
        let fields = header_fields(scope, height, &app_hash);
        let block_hash = root_from_leaves(&fields);
        let block = BlockRecord {
            height,
            block_hash,
            app_hash,
            app_hash_proof: HeaderProof {
                total: HEADER_FIELD_COUNT,
                index: APP_HASH_FIELD,
                aunts: aunts_for(&fields, APP_HASH_FIELD as usize),
            },
            source_partition: partition.map(str::to_string),
            chain_id: TEST_CHAIN_ID.to_string(),
            part_set_header: PartSetHeader {
                total: 1,
                hash: alg.digest(block_hash.as_bytes()).0.to_vec(),
            },
        };
        self.add_block(scope, block.clone());
        block
    }

    pub fn add_anchor(&mut self, search: AnchorSearch, anchor: PartitionAnchor) {
        self.anchors.push((search, anchor));
    }

    pub fn add_commit(&mut self, partition: &AccUrl, commit: BlockCommit) {
        self.commits.insert((partition.clone(), commit.height), commit);
    }

    pub fn add_validator_set(
        &mut self,
        partition: &AccUrl,
        height: u64,
        validators: Vec<ValidatorInfo>,
    ) {
        self.validator_sets.insert((partition.clone(), height), validators);
    }

    pub fn set_transitions(&mut self, transitions: Vec<ValidatorTransition>) {
        self.transitions = transitions;
    }

    pub fn fail_entries_with(&mut self, error: BackendError) {
        self.entry_failure = Some(error);
    }

    pub fn fail_commits_with(&mut self, error: BackendError) {
        self.commit_failure = Some(error);
    }
}

impl Backend for MemoryBackend {
    fn query_chain_head(&self, scope: &AccUrl, chain_name: &str) -> Result<u64, BackendError> {
        if let Some(e) = &self.entry_failure {
            return Err(e.clone());
        }
        self.heads
            .get(&(scope.clone(), chain_name.to_string()))
            .copied()
            .ok_or_else(|| BackendError::not_found(format!("chain {} of {}", chain_name, scope)))
    }

    fn query_chain_entry(
        &self,
        scope: &AccUrl,
        chain_name: &str,
        index: u64,
    ) -> Result<ChainEntry, BackendError> {
        self.entry_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.entry_failure {
            return Err(e.clone());
        }
        self.entries
            .get(&(scope.clone(), chain_name.to_string(), index))
            .cloned()
            .ok_or_else(|| {
                BackendError::not_found(format!("entry {} of {}#{}", index, scope, chain_name))
            })
    }

    fn query_block(&self, scope: &AccUrl, height: u64) -> Result<BlockRecord, BackendError> {
        self.blocks
            .get(&(scope.clone(), height))
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("block {} of {}", height, scope)))
    }

    fn query_anchor(&self, query: &AnchorQuery) -> Result<PartitionAnchor, BackendError> {
        self.anchors
            .iter()
            .find(|(search, anchor)| *search == query.search && anchor.anchor_hash == query.root)
            .map(|(_, anchor)| anchor.clone())
            .ok_or_else(|| BackendError::not_found(format!("anchor of {}", query.root)))
    }

    fn query_commit(&self, partition: &AccUrl, height: u64) -> Result<BlockCommit, BackendError> {
        self.commit_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.commit_failure {
            return Err(e.clone());
        }
        self.commits
            .get(&(partition.clone(), height))
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("commit {} of {}", height, partition)))
    }

    fn query_validator_set(
        &self,
        partition: &AccUrl,
        height: u64,
    ) -> Result<Vec<ValidatorInfo>, BackendError> {
        self.validator_sets
            .get(&(partition.clone(), height))
            .cloned()
            .ok_or_else(|| {
                BackendError::not_found(format!("validator set {} of {}", height, partition))
            })
    }

    fn query_transitions(
        &self,
        from_height: i64,
        to_height: i64,
    ) -> Result<Vec<ValidatorTransition>, BackendError> {
        self.transition_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transitions
            .iter()
            .filter(|t| t.from_height >= from_height && t.to_height <= to_height)
            .cloned()
            .collect())
    }
}
