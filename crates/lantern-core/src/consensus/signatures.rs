use crate::backend::{Backend, BackendError};
use crate::consensus::header::check_app_hash;
use crate::consensus::vote::CanonicalVote;
use crate::error::{ErrorKind, InvariantViolation, ResultExt, VerificationError};
use crate::types::consensus::{
    quorum_threshold, total_voting_power, BlockCommit, BlockRecord, ConsensusProof, ValidatorInfo,
    ValidatorSignature, ED25519_PUBKEY_LEN,
};
use crate::types::receipt::AccUrl;
use crate::types::report::{LayerResult, LAYER_BLOCK_SIGNATURES};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How the precommits of one commit were counted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureTally {
    pub total_power: i64,
    pub signed_power: i64,
    pub required_power: i64,
    pub signers: usize,
    /// Signatures from addresses outside the validator set.
    pub skipped_unknown: usize,
    /// Extra signatures from a validator already counted.
    pub skipped_duplicate: usize,
    /// Signatures or keys that failed to parse or verify.
    pub invalid_signatures: usize,
}

impl SignatureTally {
    pub fn has_quorum(&self) -> bool {
        self.signed_power >= self.required_power
    }

    fn annotate(&self, result: LayerResult) -> LayerResult {
        result
            .with_detail("total_power", self.total_power)
            .with_detail("signed_power", self.signed_power)
            .with_detail("required_power", self.required_power)
            .with_detail("signers", self.signers)
            .with_detail("skipped_unknown", self.skipped_unknown)
            .with_detail("skipped_duplicate", self.skipped_duplicate)
            .with_detail("invalid_signatures", self.invalid_signatures)
    }
}

/// Layer3: a block is final once validators holding more than two thirds of
/// the voting power signed its canonical precommit.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockSignatureLayer;

impl BlockSignatureLayer {
    pub fn new() -> Self {
        Self
    }

    /// Count the valid precommits of `commit` without enforcing quorum.
    ///
    /// Nothing is counted unless the block's header commits its `app_hash`.
    pub fn tally(
        &self,
        block: &BlockRecord,
        commit: &BlockCommit,
        validators: &[ValidatorInfo],
    ) -> Result<(ConsensusProof, SignatureTally), VerificationError> {
        if commit.height != block.height || commit.block_hash != block.block_hash {
            return Err(InvariantViolation::CommitMismatch {
                block_hash: block.block_hash,
                block_height: block.height,
                commit_hash: commit.block_hash,
                commit_height: commit.height,
            }
            .into());
        }
        check_app_hash(block)?;
        let height = i64::try_from(block.height).map_err(|_| {
            VerificationError::malformed(format!("block height {} overflows", block.height))
        })?;
        let total_power =
            total_voting_power(validators).ok_or(InvariantViolation::InvalidVotingPower)?;

        let by_address: HashMap<&[u8], &ValidatorInfo> =
            validators.iter().map(|v| (v.address.as_slice(), v)).collect();
        let mut counted: HashSet<&[u8]> = HashSet::new();
        let mut tally = SignatureTally {
            total_power,
            required_power: quorum_threshold(total_power),
            ..SignatureTally::default()
        };

        for signature in &commit.signatures {
            let address = signature.validator_address.as_slice();
            let Some(validator) = by_address.get(address) else {
                tally.skipped_unknown += 1;
                continue;
            };
            if counted.contains(address) {
                tally.skipped_duplicate += 1;
                continue;
            }
            if !verify_precommit(validator, signature, block, commit.round, height) {
                tally.invalid_signatures += 1;
                continue;
            }
            counted.insert(address);
            tally.signers += 1;
            // Cannot overflow: each power is counted once and the total fits.
            tally.signed_power += validator.voting_power;
        }

        let proof = ConsensusProof {
            block_height: height,
            block_hash: block.block_hash,
            chain_id: block.chain_id.clone(),
            round: commit.round,
            validators: validators.to_vec(),
            signatures: commit.signatures.clone(),
            total_power: tally.total_power,
            signed_power: tally.signed_power,
        };
        Ok((proof, tally))
    }

    /// [`tally`](Self::tally) and require a BFT quorum.
    pub fn check(
        &self,
        block: &BlockRecord,
        commit: &BlockCommit,
        validators: &[ValidatorInfo],
    ) -> Result<(ConsensusProof, SignatureTally), VerificationError> {
        let (proof, tally) = self.tally(block, commit, validators)?;
        if !tally.has_quorum() {
            return Err(InvariantViolation::QuorumNotMet {
                signed: tally.signed_power,
                total: tally.total_power,
                required: tally.required_power,
            }
            .into());
        }
        Ok((proof, tally))
    }

    pub fn verify(
        &self,
        block: &BlockRecord,
        commit: &BlockCommit,
        validators: &[ValidatorInfo],
    ) -> (LayerResult, Option<ConsensusProof>) {
        let base = |result: LayerResult| {
            result
                .with_detail("height", block.height)
                .with_detail("block_hash", block.block_hash.to_hex())
                .with_detail("round", commit.round)
        };

        match self.tally(block, commit, validators) {
            Ok((proof, tally)) if tally.has_quorum() => {
                debug!(
                    height = block.height,
                    block = %block.block_hash.short(),
                    signed = tally.signed_power,
                    total = tally.total_power,
                    "block signatures reach quorum"
                );
                let result = tally.annotate(base(LayerResult::passed(LAYER_BLOCK_SIGNATURES)));
                (result.with_detail("data_unavailable", false), Some(proof))
            }
            Ok((_, tally)) => {
                let err: VerificationError = InvariantViolation::QuorumNotMet {
                    signed: tally.signed_power,
                    total: tally.total_power,
                    required: tally.required_power,
                }
                .into();
                warn!(height = block.height, error = %err, "block signatures below quorum");
                let result =
                    tally.annotate(base(LayerResult::failed(LAYER_BLOCK_SIGNATURES, &err)));
                (result.with_detail("data_unavailable", false), None)
            }
            Err(e) => {
                warn!(height = block.height, error = %e.report(), "block signatures rejected");
                (base(unavailable_or_failed(&e)), None)
            }
        }
    }

    /// Fetch the validator set and commit of `block` from `partition` and verify them.
    ///
    /// A backend that cannot supply either is reported with
    /// `data_unavailable = true`, which callers must not read as fraud.
    pub fn verify_from_backend<B: Backend + ?Sized>(
        &self,
        backend: &B,
        partition: &AccUrl,
        block: &BlockRecord,
    ) -> (LayerResult, Option<ConsensusProof>) {
        let fetched = fetch_consensus_data(backend, partition, block.height);
        match fetched {
            Ok((validators, commit)) => {
                let (result, proof) = self.verify(block, &commit, &validators);
                (result.with_detail("partition", partition.to_string()), proof)
            }
            Err(e) => {
                warn!(
                    partition = %partition,
                    height = block.height,
                    error = %e.report(),
                    "consensus data unavailable"
                );
                let result = unavailable_or_failed(&e)
                    .with_detail("partition", partition.to_string())
                    .with_detail("height", block.height);
                (result, None)
            }
        }
    }
}

fn fetch_consensus_data<B: Backend + ?Sized>(
    backend: &B,
    partition: &AccUrl,
    height: u64,
) -> Result<(Vec<ValidatorInfo>, BlockCommit), VerificationError> {
    let validators = backend
        .query_validator_set(partition, height)
        .context(format!("querying validator set of {} at {}", partition, height))?;
    if validators.is_empty() {
        return Err(
            BackendError::not_found(format!("validators of {} at {}", partition, height)).into(),
        );
    }
    let commit = backend
        .query_commit(partition, height)
        .context(format!("querying commit of {} block {}", partition, height))?;
    if commit.signatures.is_empty() {
        return Err(BackendError::not_found(format!(
            "precommit signatures of {} block {}",
            partition, height
        ))
        .into());
    }
    Ok((validators, commit))
}

fn unavailable_or_failed(e: &VerificationError) -> LayerResult {
    let unavailable = matches!(
        e.kind(),
        ErrorKind::MissingData | ErrorKind::BackendUnavailable
    );
    LayerResult::failed(LAYER_BLOCK_SIGNATURES, e).with_detail("data_unavailable", unavailable)
}

fn verify_precommit(
    validator: &ValidatorInfo,
    signature: &ValidatorSignature,
    block: &BlockRecord,
    round: i32,
    height: i64,
) -> bool {
    let Ok(key_bytes) = <[u8; ED25519_PUBKEY_LEN]>::try_from(validator.public_key.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&signature.signature) else {
        return false;
    };
    let vote = CanonicalVote {
        height,
        round,
        block_hash: &block.block_hash,
        part_set_header: &block.part_set_header,
        timestamp: signature.timestamp,
        chain_id: &block.chain_id,
    };
    key.verify(&vote.sign_bytes(), &sig).is_ok()
}
