//! Runs the layers in order for one account and assesses the trust reached.
//!
//! Layers are sequentially dependent: each consumes the previous layer's
//! output. A layer that fails is recorded and the layers after it are marked
//! skipped, so partial trust stays computable. Only malformed input and a
//! validator chain with a height gap abort the whole run.

use crate::backend::Backend;
use crate::cache::{ProofCache, StoreOptions};
use crate::config::VerifierConfig;
use crate::consensus::header::check_app_hash;
use crate::consensus::signatures::BlockSignatureLayer;
use crate::consensus::validator_chain::{put_validator_set, GenesisTrace, GenesisTrustLayer};
use crate::error::{ErrorKind, ResultExt, VerificationError};
use crate::inclusion::anchor::AnchoringLayer;
use crate::inclusion::entry::EntryInclusionLayer;
use crate::inclusion::receipt::ReceiptVerifier;
use crate::types::consensus::{
    total_voting_power, BlockRecord, ConsensusProof, GenesisTrust, ValidatorInfo,
};
use crate::types::hash::{Hash, HashAlgorithm};
use crate::types::receipt::{AccUrl, Layer1EntryInclusion};
use crate::types::report::{
    CompleteProof, LayerResult, TrustLevel, VerificationTiming, LAYER_BLOCK_SIGNATURES,
    LAYER_ENTRY_INCLUSION, LAYER_GENESIS_TRUST, LAYER_PARTITION_ANCHOR, LAYER_STATE_COMMITMENT,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const LAYER_ORDER: [&str; 5] = [
    LAYER_ENTRY_INCLUSION,
    LAYER_STATE_COMMITMENT,
    LAYER_PARTITION_ANCHOR,
    LAYER_BLOCK_SIGNATURES,
    LAYER_GENESIS_TRUST,
];

pub struct Verifier<B: Backend> {
    backend: B,
    config: VerifierConfig,
    authority: AccUrl,
    entries: EntryInclusionLayer,
    anchoring: AnchoringLayer,
    signatures: BlockSignatureLayer,
    genesis: GenesisTrustLayer,
    cache: Arc<ProofCache>,
}

impl<B: Backend> Verifier<B> {
    pub fn new(
        backend: B,
        config: VerifierConfig,
        genesis: GenesisTrust,
    ) -> Result<Self, VerificationError> {
        let cache = Arc::new(ProofCache::new(&config.cache));
        Self::with_cache(backend, config, genesis, cache)
    }

    /// Build a verifier that shares `cache` with other verifiers.
    pub fn with_cache(
        backend: B,
        config: VerifierConfig,
        genesis: GenesisTrust,
        cache: Arc<ProofCache>,
    ) -> Result<Self, VerificationError> {
        config.validate()?;
        if genesis.validators.is_empty() {
            return Err(VerificationError::malformed("genesis validator set is empty"));
        }
        match total_voting_power(&genesis.validators) {
            Some(power) if power > 0 => {}
            _ => {
                return Err(VerificationError::malformed(
                    "genesis validator set has no valid voting power",
                ))
            }
        }

        let authority = config.authority()?;
        let receipts = ReceiptVerifier::new(config.hash_algorithm);
        Ok(Self {
            entries: EntryInclusionLayer::new(receipts),
            anchoring: AnchoringLayer::new(receipts, authority.clone()),
            signatures: BlockSignatureLayer::new(),
            genesis: GenesisTrustLayer::new(genesis, config.hash_algorithm),
            authority,
            backend,
            config,
            cache,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn genesis(&self) -> &GenesisTrust {
        self.genesis.genesis()
    }

    pub fn cache(&self) -> &Arc<ProofCache> {
        &self.cache
    }

    /// Verify `account` through every layer and report the trust reached.
    ///
    /// `Err` is returned only for malformed input and for a validator chain
    /// with a height gap. Every other failure is reported inside the proof
    /// as a lower trust level.
    pub fn verify_account(&self, account: &str) -> Result<CompleteProof, VerificationError> {
        let account = AccUrl::parse(account)?;
        if let Some(proof) = self.cache.proofs().get(account.as_str()) {
            debug!(account = %account, "complete proof served from cache");
            return Ok(proof);
        }

        let mut run = Run::new(self.cache.now_ms());
        let outcome = match self.run_layers(&account, &mut run) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(account = %account, error = %e.report(), "verification aborted");
                return Err(e);
            }
        };

        let trust_level = TrustLevel::assess(
            outcome.entry_included,
            outcome.anchored,
            outcome.signed,
            outcome.genesis_traced,
        );
        let (layers, timing) = run.finish();
        let proof = CompleteProof::new(
            account.clone(),
            trust_level,
            layers,
            outcome.inclusion,
            outcome.consensus,
            timing,
        );

        info!(
            account = %account,
            trust = %trust_level,
            verified = proof.verified(),
            micros = proof.timing().total_micros,
            "account verification finished"
        );
        if proof.verified() {
            self.cache
                .proofs()
                .store(account.as_str(), proof.clone(), StoreOptions::default());
        }
        Ok(proof)
    }

    /// `true` only for fully verified accounts. Errors count as `false`.
    pub fn verify_account_simple(&self, account: &str) -> bool {
        match self.verify_account(account) {
            Ok(proof) => proof.verified(),
            Err(e) => {
                debug!(account, error = %e, "simple verification failed");
                false
            }
        }
    }

    fn run_layers(&self, account: &AccUrl, run: &mut Run) -> Result<Outcome, VerificationError> {
        let mut outcome = Outcome::default();

        // Layer1
        let started = Instant::now();
        let inclusion = match self.entry_inclusion(account) {
            Ok(inclusion) => inclusion,
            Err(e) if e.aborts_verification() => return Err(e),
            Err(e) => {
                warn!(
                    account = %account,
                    error = %e.report(),
                    "entry inclusion not established"
                );
                run.record(
                    LayerResult::failed(LAYER_ENTRY_INCLUSION, &e)
                        .with_detail("scope", account.to_string()),
                    started,
                );
                run.skip_after(LAYER_ENTRY_INCLUSION, "entry inclusion was not established");
                return Ok(outcome);
            }
        };
        let layer1 = self.entries.verify(&inclusion);
        outcome.entry_included = layer1.valid;
        run.record(layer1, started);
        if !outcome.entry_included {
            run.skip_after(LAYER_ENTRY_INCLUSION, "entry inclusion failed verification");
            outcome.inclusion = Some(inclusion);
            return Ok(outcome);
        }
        self.remember_inclusion(&inclusion);

        // Layer2
        let started = Instant::now();
        let home = match AccUrl::parse(&inclusion.source_partition) {
            Ok(home) => home,
            Err(_) => {
                let e = VerificationError::PartitionResolution {
                    height: inclusion.local_block,
                    found: Some(inclusion.source_partition.clone()),
                };
                run.record(LayerResult::failed(LAYER_STATE_COMMITMENT, &e), started);
                run.skip_after(LAYER_STATE_COMMITMENT, "home partition is not a valid URL");
                outcome.inclusion = Some(inclusion);
                return Ok(outcome);
            }
        };
        let (layer2, home_block) = self.anchoring.verify_state_commitment(
            &self.backend,
            &home,
            &inclusion.anchor,
            inclusion.local_block,
        );
        run.record(layer2, started);
        let Some(home_block) = home_block else {
            run.skip_after(LAYER_STATE_COMMITMENT, "state commitment was not established");
            outcome.inclusion = Some(inclusion);
            return Ok(outcome);
        };

        // Layer2.5
        let started = Instant::now();
        let (signing_partition, signing_block) = if self.anchoring.requires_anchor(&home) {
            let (layer25, anchored) = self
                .anchoring
                .verify_anchoring(&self.backend, &home, &inclusion.anchor);
            run.record(layer25, started);
            match anchored {
                Some(anchored) => (self.authority.clone(), anchored.authority_block),
                None => {
                    run.skip_after(LAYER_PARTITION_ANCHOR, "partition anchor was not established");
                    outcome.inclusion = Some(inclusion);
                    return Ok(outcome);
                }
            }
        } else {
            run.record(
                LayerResult::passed(LAYER_PARTITION_ANCHOR)
                    .with_detail("required", false)
                    .with_detail("source_partition", home.to_string()),
                started,
            );
            (home, home_block)
        };
        outcome.anchored = true;
        outcome.inclusion = Some(inclusion);

        // Layer3
        let started = Instant::now();
        let (layer3, consensus) = self.block_signatures(&signing_partition, &signing_block);
        run.record(layer3, started);
        let Some(consensus) = consensus else {
            run.skip_after(LAYER_BLOCK_SIGNATURES, "block signatures were not verified");
            return Ok(outcome);
        };
        outcome.signed = true;

        // Layer4
        let started = Instant::now();
        let layer4 = self.genesis_trust(&consensus)?;
        outcome.genesis_traced = layer4.valid;
        run.record(layer4, started);
        outcome.consensus = Some(consensus);

        Ok(outcome)
    }

    fn entry_inclusion(&self, account: &AccUrl) -> Result<Layer1EntryInclusion, VerificationError> {
        let chain = self.config.chain_name.as_str();
        let index = self
            .backend
            .query_chain_head(account, chain)
            .context(format!("querying head of chain {:?} under {}", chain, account))?;

        let key = entry_key(account, chain, index);
        if let Some(cached) = self.cache.inclusions().get(&key) {
            debug!(key = %key, "entry inclusion served from cache");
            return Ok(cached);
        }
        self.entries
            .build_from_chain_entry(&self.backend, account, chain, index)
    }

    fn remember_inclusion(&self, inclusion: &Layer1EntryInclusion) {
        let key = entry_key(&inclusion.scope, &inclusion.chain_name, inclusion.chain_index);
        self.cache
            .receipts()
            .store(key.clone(), inclusion.receipt.clone(), StoreOptions::default());
        self.cache
            .inclusions()
            .store(key, inclusion.clone(), StoreOptions::default());
    }

    fn block_signatures(
        &self,
        partition: &AccUrl,
        block: &BlockRecord,
    ) -> (LayerResult, Option<ConsensusProof>) {
        if let Err(e) = check_app_hash(block) {
            warn!(
                partition = %partition,
                height = block.height,
                error = %e,
                "block header rejected"
            );
            let result = LayerResult::failed(LAYER_BLOCK_SIGNATURES, &e)
                .with_detail("partition", partition.to_string())
                .with_detail("height", block.height)
                .with_detail("data_unavailable", false);
            return (result, None);
        }
        let key = format!("{}@{}", partition, block.height);
        if let Some(proof) = self.cache.consensus().get(&key) {
            if proof.block_hash == block.block_hash && proof.has_quorum() {
                debug!(key = %key, "block signatures served from cache");
                let result = LayerResult::passed(LAYER_BLOCK_SIGNATURES)
                    .with_detail("partition", partition.to_string())
                    .with_detail("height", block.height)
                    .with_detail("block_hash", block.block_hash.to_hex())
                    .with_detail("total_power", proof.total_power)
                    .with_detail("signed_power", proof.signed_power)
                    .with_detail("required_power", proof.required_power())
                    .with_detail("from_cache", true);
                return (result, Some(proof));
            }
        }

        let (result, proof) = self
            .signatures
            .verify_from_backend(&self.backend, partition, block);
        if let Some(proof) = &proof {
            self.cache
                .consensus()
                .store(key, proof.clone(), StoreOptions::default());
        }
        (result, proof)
    }

    fn genesis_trust(&self, consensus: &ConsensusProof) -> Result<LayerResult, VerificationError> {
        let height = consensus.block_height;
        let key = format!(
            "{}:{}:{}",
            self.genesis().genesis_hash,
            height,
            validator_set_digest(self.config.hash_algorithm, &consensus.validators)
        );
        if let Some(trace) = self.cache.validator_chains().get(&key) {
            debug!(height, "validator chain served from cache");
            return Ok(trace.layer_result().with_detail("from_cache", true));
        }

        match self.trace_to_genesis(&consensus.validators, height) {
            Ok(trace) => {
                let result = trace.layer_result();
                self.cache
                    .validator_chains()
                    .store(key, trace, StoreOptions::default());
                Ok(result)
            }
            Err(e) if e.aborts_verification() => Err::<LayerResult, _>(e)
                .context(format!("tracing validators of height {} to genesis", height)),
            Err(e) => {
                warn!(height, error = %e.report(), "validator set not traced to genesis");
                let unavailable = matches!(
                    e.kind(),
                    ErrorKind::MissingData | ErrorKind::BackendUnavailable
                );
                Ok(LayerResult::failed(LAYER_GENESIS_TRUST, &e)
                    .with_detail("genesis_hash", self.genesis().genesis_hash.to_hex())
                    .with_detail("current_height", height)
                    .with_detail("data_unavailable", unavailable))
            }
        }
    }

    fn trace_to_genesis(
        &self,
        validators: &[ValidatorInfo],
        height: i64,
    ) -> Result<GenesisTrace, VerificationError> {
        let transitions = self
            .backend
            .query_transitions(0, height)
            .context(format!("querying validator transitions up to {}", height))?;
        self.genesis.check(validators, height, &transitions)
    }
}

#[derive(Default)]
struct Outcome {
    inclusion: Option<Layer1EntryInclusion>,
    consensus: Option<ConsensusProof>,
    entry_included: bool,
    anchored: bool,
    signed: bool,
    genesis_traced: bool,
}

/// Layer results and timings collected during one run.
struct Run {
    layers: Vec<LayerResult>,
    timing: VerificationTiming,
    started: Instant,
}

impl Run {
    fn new(started_at_ms: u64) -> Self {
        Self {
            layers: Vec::with_capacity(LAYER_ORDER.len()),
            timing: VerificationTiming {
                started_at_ms,
                ..VerificationTiming::default()
            },
            started: Instant::now(),
        }
    }

    fn record(&mut self, result: LayerResult, started: Instant) {
        self.timing
            .layer_micros
            .insert(result.layer_name.clone(), elapsed_micros(started));
        self.layers.push(result);
    }

    fn skip_after(&mut self, layer: &str, reason: &str) {
        let next = LAYER_ORDER
            .iter()
            .position(|l| *l == layer)
            .map_or(LAYER_ORDER.len(), |i| i + 1);
        for skipped in &LAYER_ORDER[next..] {
            self.layers.push(LayerResult::skipped(skipped, reason));
        }
    }

    fn finish(mut self) -> (Vec<LayerResult>, VerificationTiming) {
        self.timing.total_micros = elapsed_micros(self.started);
        (self.layers, self.timing)
    }
}

fn elapsed_micros(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn entry_key(scope: &AccUrl, chain: &str, index: u64) -> String {
    format!("{}#{}/{}", scope, chain, index)
}

/// Identifies a validator set in cache keys.
fn validator_set_digest(algorithm: HashAlgorithm, validators: &[ValidatorInfo]) -> Hash {
    let mut buf = Vec::with_capacity(4 + validators.len() * 88);
    put_validator_set(&mut buf, validators);
    algorithm.digest(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AnchorSearch, BackendError, ChainEntry};
    use crate::testing::{receipt_for, sign_commit, sign_transition, validator_set, MemoryBackend};
    use crate::types::receipt::{PartitionAnchor, DIRECTORY_PARTITION};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const ALG: HashAlgorithm = HashAlgorithm::Sha256;
    const BVN: &str = "acc://bvn-apollo.acme";
    const ACCOUNT: &str = "acc://alice.acme/tokens";
    const MALLORY: &str = "acc://mallory.acme";

    const V123: &[(u8, i64)] = &[(1, 100), (2, 100), (3, 100)];
    const V124: &[(u8, i64)] = &[(1, 100), (2, 100), (4, 100)];

    fn url(s: &str) -> AccUrl {
        AccUrl::parse(s).unwrap()
    }

    fn genesis() -> GenesisTrust {
        GenesisTrust {
            genesis_hash: Hash([0x6E; 32]),
            validators: validator_set(V123),
        }
    }

    /// An account on a BVN whose root is anchored into DN block 90, signed
    /// by {V1, V2, V4}, which genesis {V1, V2, V3} handed over to at height 10.
    fn bvn_backend(with_anchor: bool) -> (MemoryBackend, BlockRecord) {
        let mut backend = MemoryBackend::default();
        let leaf = ALG.digest(b"alice main chain entry");
        let receipt = receipt_for(ALG, leaf, &[Hash([2; 32]), Hash([3; 32])], 40);
        let bvn_root = receipt.anchor;
        backend.add_entry(
            &url(ACCOUNT),
            "main",
            0,
            ChainEntry {
                entry_hash: leaf,
                receipt: Some(receipt),
            },
        );
        backend.add_block_with_partition(&url(ACCOUNT), 40, bvn_root, Some(BVN));
        backend.add_block_with_partition(&url(BVN), 40, bvn_root, None);

        let anchor = PartitionAnchor {
            source_partition: BVN.to_string(),
            target_partition: DIRECTORY_PARTITION.to_string(),
            anchor_hash: bvn_root,
            receipt: receipt_for(ALG, bvn_root, &[Hash([5; 32]), Hash([6; 32])], 90),
        };
        let dn_root = anchor.receipt.anchor;
        if with_anchor {
            backend.add_anchor(AnchorSearch::Intermediate, anchor);
        }
        let dn = url(DIRECTORY_PARTITION);
        let dn_block =
            backend.add_block_with_partition(&dn, 90, dn_root, Some(DIRECTORY_PARTITION));
        backend.add_validator_set(&dn, 90, validator_set(V124));
        backend.add_commit(&dn, sign_commit(&dn_block, 0, &[1, 2, 4]));
        backend.set_transitions(vec![sign_transition(ALG, 0, 10, V123, V124, &[1, 2, 3])]);
        (backend, dn_block)
    }

    fn verifier(backend: MemoryBackend) -> Verifier<MemoryBackend> {
        Verifier::new(backend, VerifierConfig::default(), genesis()).unwrap()
    }

    fn layer_names(proof: &CompleteProof) -> Vec<&str> {
        proof.layers().iter().map(|l| l.layer_name.as_str()).collect()
    }

    #[test]
    fn test_full_trust_end_to_end() {
        let (backend, dn_block) = bvn_backend(true);
        let proof = verifier(backend).verify_account(ACCOUNT).unwrap();

        assert!(proof.verified(), "{:?}", proof.errors());
        assert_eq!(proof.trust_level(), TrustLevel::Full);
        assert_eq!(layer_names(&proof), LAYER_ORDER.to_vec());
        assert!(proof.layers().iter().all(|l| l.valid));
        assert!(proof.errors().is_empty());

        let consensus = proof.consensus().unwrap();
        assert_eq!(consensus.block_hash, dn_block.block_hash);
        assert_eq!(consensus.signed_power, 300);
        assert_eq!(proof.inclusion().unwrap().source_partition, BVN);
        assert_eq!(proof.timing().layer_micros.len(), 5);
        assert_eq!(
            proof.layer(LAYER_GENESIS_TRUST).unwrap().detail("height_path"),
            Some(&json!([0, 10]))
        );
    }

    #[test]
    fn test_verified_proof_is_cached() {
        let (backend, _) = bvn_backend(true);
        let verifier = verifier(backend);

        let first = verifier.verify_account(ACCOUNT).unwrap();
        let second = verifier.verify_account("ACC://Alice.acme/tokens/").unwrap();
        assert_eq!(first, second);
        assert_eq!(verifier.backend().entry_queries.load(Ordering::SeqCst), 1);

        let cache = verifier.cache();
        assert_eq!(cache.proofs().len(), 1);
        assert_eq!(cache.receipts().len(), 1);
        assert_eq!(cache.inclusions().len(), 1);
        assert_eq!(cache.consensus().len(), 1);
        assert_eq!(cache.validator_chains().len(), 1);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn test_layer_caches_are_reused() {
        let (backend, _) = bvn_backend(true);
        let verifier = verifier(backend);
        verifier.verify_account(ACCOUNT).unwrap();
        verifier.cache().proofs().clear();

        let proof = verifier.verify_account(ACCOUNT).unwrap();
        assert!(proof.verified());
        let backend = verifier.backend();
        assert_eq!(backend.entry_queries.load(Ordering::SeqCst), 1);
        assert_eq!(backend.commit_queries.load(Ordering::SeqCst), 1);
        assert_eq!(backend.transition_queries.load(Ordering::SeqCst), 1);
        assert_eq!(
            proof.layer(LAYER_BLOCK_SIGNATURES).unwrap().detail("from_cache"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_two_thirds_commit_is_partial_bvn() {
        let (mut backend, dn_block) = bvn_backend(true);
        backend.add_commit(&url(DIRECTORY_PARTITION), sign_commit(&dn_block, 0, &[1, 2]));
        let verifier = verifier(backend);

        let proof = verifier.verify_account(ACCOUNT).unwrap();
        assert!(!proof.verified());
        assert_eq!(proof.trust_level(), TrustLevel::PartialBvn);

        let layer3 = proof.layer(LAYER_BLOCK_SIGNATURES).unwrap();
        assert_eq!(layer3.error_kind, Some(ErrorKind::InvariantViolation));
        assert_eq!(layer3.detail("data_unavailable"), Some(&json!(false)));
        assert!(proof.layer(LAYER_GENESIS_TRUST).unwrap().is_skipped());
        assert!(verifier.cache().proofs().is_empty());
        assert!(verifier.cache().consensus().is_empty());
    }

    #[test]
    fn test_unavailable_commit_is_reported_as_data_gap() {
        let (mut backend, _) = bvn_backend(true);
        backend.fail_commits_with(BackendError::unavailable("timeout"));
        let verifier = verifier(backend);

        let proof = verifier.verify_account(ACCOUNT).unwrap();
        assert_eq!(proof.trust_level(), TrustLevel::PartialBvn);
        let layer3 = proof.layer(LAYER_BLOCK_SIGNATURES).unwrap();
        assert_eq!(layer3.error_kind, Some(ErrorKind::BackendUnavailable));
        assert_eq!(layer3.detail("data_unavailable"), Some(&json!(true)));
        assert!(verifier.cache().proofs().is_empty());
    }

    #[test]
    fn test_missing_anchor_is_partial_bpt() {
        let (backend, _) = bvn_backend(false);
        let proof = verifier(backend).verify_account(ACCOUNT).unwrap();

        assert_eq!(proof.trust_level(), TrustLevel::PartialBpt);
        assert!(proof.layer(LAYER_STATE_COMMITMENT).unwrap().valid);
        let anchor = proof.layer(LAYER_PARTITION_ANCHOR).unwrap();
        assert!(!anchor.valid && !anchor.is_skipped());
        assert_eq!(anchor.error_kind, Some(ErrorKind::MissingData));
        assert!(proof.layer(LAYER_BLOCK_SIGNATURES).unwrap().is_skipped());
        assert!(proof.layer(LAYER_GENESIS_TRUST).unwrap().is_skipped());
    }

    #[test]
    fn test_forged_receipt_is_trust_none() {
        let (mut backend, _) = bvn_backend(true);
        let mallory = url("acc://mallory.acme");
        let leaf = ALG.digest(b"mallory entry");
        let mut receipt = receipt_for(ALG, leaf, &[Hash([2; 32]), Hash([3; 32])], 41);
        receipt.entries[1].sibling_hash = Hash([9; 32]);
        backend.add_block_with_partition(&mallory, 41, receipt.anchor, Some(BVN));
        backend.add_block_with_partition(&url(BVN), 41, receipt.anchor, None);
        backend.add_entry(
            &mallory,
            "main",
            3,
            ChainEntry {
                entry_hash: leaf,
                receipt: Some(receipt),
            },
        );

        let verifier = verifier(backend);
        let proof = verifier.verify_account(mallory.as_str()).unwrap();
        assert_eq!(proof.trust_level(), TrustLevel::None);
        assert!(!proof.verified());

        let layer1 = proof.layer(LAYER_ENTRY_INCLUSION).unwrap();
        assert_eq!(layer1.error_kind, Some(ErrorKind::InvariantViolation));
        assert!(proof.layers()[1..].iter().all(|l| l.is_skipped()));
        assert!(proof.inclusion().is_some());
        assert!(verifier.cache().inclusions().is_empty());
    }

    /// `bvn_backend` plus a fabricated account whose BVN root is "anchored"
    /// into the genuine, quorum-signed DN block 90 under a made-up app hash.
    fn fabricated_backend() -> MemoryBackend {
        let (mut backend, genuine_dn_block) = bvn_backend(true);
        let mallory = url(MALLORY);
        let leaf = ALG.digest(b"fabricated balance");
        let receipt = receipt_for(ALG, leaf, &[Hash([0x21; 32]), Hash([0x22; 32])], 40);
        let forged_bvn_root = receipt.anchor;
        backend.add_entry(
            &mallory,
            "main",
            0,
            ChainEntry {
                entry_hash: leaf,
                receipt: Some(receipt),
            },
        );
        backend.add_block_with_partition(&mallory, 40, forged_bvn_root, Some(BVN));
        backend.add_block_with_partition(&url(BVN), 40, forged_bvn_root, None);
        let anchor = PartitionAnchor {
            source_partition: BVN.to_string(),
            target_partition: DIRECTORY_PARTITION.to_string(),
            anchor_hash: forged_bvn_root,
            receipt: receipt_for(ALG, forged_bvn_root, &[Hash([0x23; 32])], 90),
        };
        let forged_dn_root = anchor.receipt.anchor;
        backend.add_anchor(AnchorSearch::Intermediate, anchor);
        backend.add_block(
            &url(DIRECTORY_PARTITION),
            BlockRecord {
                app_hash: forged_dn_root,
                ..genuine_dn_block
            },
        );
        backend
    }

    fn assert_fabrication_rejected(proof: &CompleteProof) {
        assert!(!proof.verified());
        assert_eq!(proof.trust_level(), TrustLevel::PartialBvn);
        assert!(proof.layer(LAYER_PARTITION_ANCHOR).unwrap().valid);
        let signatures = proof.layer(LAYER_BLOCK_SIGNATURES).unwrap();
        assert!(!signatures.valid && !signatures.is_skipped());
        assert_eq!(signatures.error_kind, Some(ErrorKind::InvariantViolation));
        assert_eq!(signatures.detail("data_unavailable"), Some(&json!(false)));
        assert!(proof.layer(LAYER_GENESIS_TRUST).unwrap().is_skipped());
        assert!(proof.consensus().is_none());
    }

    #[test]
    fn test_signed_block_with_fabricated_app_hash_is_not_trusted() {
        let proof = verifier(fabricated_backend()).verify_account(MALLORY).unwrap();
        assert_fabrication_rejected(&proof);
    }

    #[test]
    fn test_cached_signatures_do_not_vouch_for_fabricated_app_hash() {
        let cache = Arc::new(ProofCache::new(&VerifierConfig::default().cache));
        let (backend, _) = bvn_backend(true);
        let genuine =
            Verifier::with_cache(backend, VerifierConfig::default(), genesis(), cache.clone())
                .unwrap();
        assert!(genuine.verify_account(ACCOUNT).unwrap().verified());
        assert_eq!(cache.consensus().len(), 1);

        let forged =
            Verifier::with_cache(fabricated_backend(), VerifierConfig::default(), genesis(), cache)
                .unwrap();
        let proof = forged.verify_account(MALLORY).unwrap();
        assert_fabrication_rejected(&proof);
    }

    #[test]
    fn test_unknown_account_is_trust_none() {
        let (backend, _) = bvn_backend(true);
        let proof = verifier(backend).verify_account("acc://nobody.acme").unwrap();
        assert_eq!(proof.trust_level(), TrustLevel::None);
        let layer1 = proof.layer(LAYER_ENTRY_INCLUSION).unwrap();
        assert_eq!(layer1.error_kind, Some(ErrorKind::MissingData));
        assert_eq!(proof.layers().len(), 5);
    }

    #[test]
    fn test_transition_gap_aborts() {
        let (mut backend, _) = bvn_backend(true);
        backend.set_transitions(vec![
            sign_transition(ALG, 0, 10, V123, V124, &[1, 2, 3]),
            sign_transition(ALG, 20, 30, V124, V124, &[1, 2, 4]),
        ]);
        let err = verifier(backend).verify_account(ACCOUNT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChainDiscontinuity);
        assert!(matches!(
            err.root_cause(),
            VerificationError::ChainDiscontinuity {
                expected: 10,
                found: 20
            }
        ));
    }

    #[test]
    fn test_signers_not_descending_from_genesis() {
        let (mut backend, dn_block) = bvn_backend(true);
        let dn = url(DIRECTORY_PARTITION);
        // Genesis never handed over to {V4, V5, V6}.
        backend.add_validator_set(&dn, 90, validator_set(&[(4, 100), (5, 100), (6, 100)]));
        backend.add_commit(&dn, sign_commit(&dn_block, 0, &[4, 5, 6]));

        let proof = verifier(backend).verify_account(ACCOUNT).unwrap();
        assert!(proof.layer(LAYER_BLOCK_SIGNATURES).unwrap().valid);
        let layer4 = proof.layer(LAYER_GENESIS_TRUST).unwrap();
        assert!(!layer4.valid);
        assert_eq!(layer4.error_kind, Some(ErrorKind::InvariantViolation));
        assert_eq!(proof.trust_level(), TrustLevel::PartialBvn);
    }

    #[test]
    fn test_directory_account_needs_no_anchor() {
        let mut backend = MemoryBackend::default();
        let dn = url(DIRECTORY_PARTITION);
        let account = url("acc://dn.acme/operators");
        let leaf = ALG.digest(b"operators entry");
        let receipt = receipt_for(ALG, leaf, &[Hash([4; 32])], 50);
        let root = receipt.anchor;
        backend.add_entry(
            &account,
            "main",
            7,
            ChainEntry {
                entry_hash: leaf,
                receipt: Some(receipt),
            },
        );
        backend.add_block_with_partition(&account, 50, root, Some(DIRECTORY_PARTITION));
        let dn_block = backend.add_block_with_partition(&dn, 50, root, None);
        backend.add_validator_set(&dn, 50, validator_set(V123));
        backend.add_commit(&dn, sign_commit(&dn_block, 1, &[1, 2, 3]));

        let proof = verifier(backend).verify_account(account.as_str()).unwrap();
        assert_eq!(proof.trust_level(), TrustLevel::Full, "{:?}", proof.errors());
        assert_eq!(
            proof.layer(LAYER_PARTITION_ANCHOR).unwrap().detail("required"),
            Some(&json!(false))
        );
    }

    #[test]
    fn test_malformed_account_aborts() {
        let (backend, _) = bvn_backend(true);
        let verifier = verifier(backend);
        let err = verifier.verify_account("https://alice.acme").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(!verifier.verify_account_simple("https://alice.acme"));
        assert!(verifier.verify_account_simple(ACCOUNT));
    }

    #[test]
    fn test_rejects_unusable_genesis() {
        let empty = GenesisTrust {
            genesis_hash: Hash::ZERO,
            validators: vec![],
        };
        let unpowered = GenesisTrust {
            genesis_hash: Hash::ZERO,
            validators: validator_set(&[(1, 0)]),
        };
        for genesis in [empty, unpowered] {
            let result =
                Verifier::new(MemoryBackend::default(), VerifierConfig::default(), genesis);
            assert!(matches!(result, Err(VerificationError::MalformedInput { .. })));
        }
    }

    #[test]
    fn test_shared_cache_between_verifiers() {
        let cache = Arc::new(ProofCache::new(&VerifierConfig::default().cache));
        let (backend, _) = bvn_backend(true);
        let first =
            Verifier::with_cache(backend, VerifierConfig::default(), genesis(), cache.clone())
                .unwrap();
        first.verify_account(ACCOUNT).unwrap();

        let second = Verifier::with_cache(
            MemoryBackend::default(),
            VerifierConfig::default(),
            genesis(),
            cache,
        )
        .unwrap();
        assert!(second.verify_account_simple(ACCOUNT));
    }
}
