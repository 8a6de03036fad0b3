//! Layer4: validator-set induction from the genesis trust anchor.
//!
//! The genesis validator set is trusted axiomatically. Every later set is
//! trusted only if the set before it signed the handover with more than two
//! thirds of its voting power, and the walk must cover every height without a
//! gap. The set that signed the block under verification has to be the one
//! the walk ends on.

use crate::error::{InvariantViolation, VerificationError};
use crate::types::consensus::{
    quorum_threshold, total_voting_power, GenesisTrust, ValidatorInfo, ValidatorTransition,
    ED25519_PUBKEY_LEN,
};
use crate::types::hash::{Hash, HashAlgorithm};
use crate::types::report::{LayerResult, LAYER_GENESIS_TRUST};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Digest the outgoing validators sign to hand over to the incoming set.
///
/// `H(from ‖ to ‖ |old| ‖ old… ‖ |new| ‖ new…)` with heights as 8-byte
/// big-endian and set sizes as 4-byte big-endian. Each validator is
/// `|address| ‖ address ‖ |public_key| ‖ public_key ‖ power`, lengths 4-byte
/// and power 8-byte big-endian.
pub fn transition_message(algorithm: HashAlgorithm, transition: &ValidatorTransition) -> Hash {
    let mut buf = Vec::with_capacity(
        24 + 88 * (transition.old_validators.len() + transition.new_validators.len()),
    );
    buf.extend_from_slice(&transition.from_height.to_be_bytes());
    buf.extend_from_slice(&transition.to_height.to_be_bytes());
    for set in [&transition.old_validators, &transition.new_validators] {
        put_validator_set(&mut buf, set);
    }
    algorithm.digest(&buf)
}

pub(crate) fn put_validator_set(buf: &mut Vec<u8>, validators: &[ValidatorInfo]) {
    buf.extend_from_slice(&(validators.len() as u32).to_be_bytes());
    for v in validators {
        buf.extend_from_slice(&(v.address.len() as u32).to_be_bytes());
        buf.extend_from_slice(&v.address);
        buf.extend_from_slice(&(v.public_key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&v.public_key);
        buf.extend_from_slice(&v.voting_power.to_be_bytes());
    }
}

/// Structural pre-check run before any signature is verified.
pub fn validate_transition_chain(
    transitions: &[ValidatorTransition],
) -> Result<(), VerificationError> {
    let malformed =
        |index: usize, reason: String| VerificationError::MalformedTransition { index, reason };

    let mut previous_to: Option<i64> = None;
    for (index, t) in transitions.iter().enumerate() {
        if t.old_validators.is_empty() || t.new_validators.is_empty() {
            return Err(malformed(index, "empty validator set".to_string()));
        }
        if t.signatures.len() != t.old_validators.len() {
            return Err(malformed(
                index,
                format!(
                    "{} signatures for {} outgoing validators",
                    t.signatures.len(),
                    t.old_validators.len()
                ),
            ));
        }
        if t.signatures.iter().all(|s| s.is_empty()) {
            return Err(malformed(index, "no signatures".to_string()));
        }
        if t.to_height <= t.from_height {
            return Err(malformed(
                index,
                format!("height does not advance: {} -> {}", t.from_height, t.to_height),
            ));
        }
        if let Some(prev) = previous_to {
            if t.to_height <= prev {
                return Err(malformed(
                    index,
                    format!("ends at {} after a transition ending at {}", t.to_height, prev),
                ));
            }
        }
        if total_voting_power(&t.old_validators).is_none()
            || total_voting_power(&t.new_validators).is_none()
        {
            return Err(malformed(index, "negative or overflowing voting power".to_string()));
        }
        previous_to = Some(t.to_height);
    }
    Ok(())
}

/// Checkpoint heights reachable from genesis on the way to `target`.
///
/// Starts at 0 and follows every transition ending at or below `target`.
/// A transition that does not start where the previous one ended is a
/// [`VerificationError::ChainDiscontinuity`].
pub fn trace_height_path(
    transitions: &[ValidatorTransition],
    target: i64,
) -> Result<Vec<i64>, VerificationError> {
    if target < 0 {
        return Err(VerificationError::UnreachableHeight { target, reached: 0 });
    }
    let mut path = vec![0];
    let mut last = 0;
    for t in transitions {
        if t.from_height != last {
            return Err(VerificationError::ChainDiscontinuity {
                expected: last,
                found: t.from_height,
            });
        }
        if t.to_height > target {
            break;
        }
        path.push(t.to_height);
        last = t.to_height;
    }
    Ok(path)
}

/// Outcome of a successful walk from genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisTrace {
    pub genesis_hash: Hash,
    pub current_height: i64,
    pub height_path: Vec<i64>,
    pub transitions_applied: usize,
}

impl GenesisTrace {
    pub fn layer_result(&self) -> LayerResult {
        LayerResult::passed(LAYER_GENESIS_TRUST)
            .with_detail("genesis_hash", self.genesis_hash.to_hex())
            .with_detail("current_height", self.current_height)
            .with_detail("height_path", self.height_path.clone())
            .with_detail("transitions_applied", self.transitions_applied)
    }
}

#[derive(Clone, Debug)]
pub struct GenesisTrustLayer {
    genesis: GenesisTrust,
    algorithm: HashAlgorithm,
}

impl GenesisTrustLayer {
    pub fn new(genesis: GenesisTrust, algorithm: HashAlgorithm) -> Self {
        Self { genesis, algorithm }
    }

    pub fn genesis(&self) -> &GenesisTrust {
        &self.genesis
    }

    /// Verify one handover against the validator set trusted before it.
    /// Returns the signing power that approved it.
    pub fn verify_transition(
        &self,
        index: usize,
        transition: &ValidatorTransition,
    ) -> Result<i64, VerificationError> {
        let total = total_voting_power(&transition.old_validators)
            .ok_or(InvariantViolation::InvalidVotingPower)?;
        let required = quorum_threshold(total);
        let message = transition_message(self.algorithm, transition);

        let mut signed = 0i64;
        for (validator, signature) in transition.old_validators.iter().zip(&transition.signatures) {
            if signature.is_empty() {
                continue;
            }
            if verify_handover(validator, signature, &message) {
                signed += validator.voting_power;
            } else {
                debug!(
                    index,
                    validator = %hex::encode(&validator.address),
                    "transition signature does not verify"
                );
            }
        }

        if signed < required {
            return Err(VerificationError::InvalidTransition {
                from_height: transition.from_height,
                to_height: transition.to_height,
                signed,
                total,
                required,
            });
        }
        Ok(signed)
    }

    /// Walk `transitions` from genesis and compare the resulting set with
    /// `current_validators`.
    ///
    /// `Ok(false)` means every handover verified but the final set is not the
    /// one supplied. Gaps, malformed transitions and failed handovers are errors.
    pub fn verify_validator_chain(
        &self,
        current_validators: &[ValidatorInfo],
        current_height: i64,
        transitions: &[ValidatorTransition],
    ) -> Result<bool, VerificationError> {
        self.trace(current_validators, current_height, transitions)
            .map(|trace| trace.is_some())
    }

    /// Like [`verify_validator_chain`](Self::verify_validator_chain) but a
    /// final-set mismatch is an error and success carries the walked path.
    pub fn check(
        &self,
        current_validators: &[ValidatorInfo],
        current_height: i64,
        transitions: &[ValidatorTransition],
    ) -> Result<GenesisTrace, VerificationError> {
        self.trace(current_validators, current_height, transitions)?
            .ok_or_else(|| {
                InvariantViolation::ValidatorSetMismatch {
                    height: current_height,
                }
                .into()
            })
    }

    pub fn verify(
        &self,
        current_validators: &[ValidatorInfo],
        current_height: i64,
        transitions: &[ValidatorTransition],
    ) -> LayerResult {
        match self.check(current_validators, current_height, transitions) {
            Ok(trace) => trace.layer_result(),
            Err(e) => {
                warn!(
                    height = current_height,
                    error = %e.report(),
                    "validator set not traced to genesis"
                );
                LayerResult::failed(LAYER_GENESIS_TRUST, &e)
                    .with_detail("genesis_hash", self.genesis.genesis_hash.to_hex())
                    .with_detail("current_height", current_height)
            }
        }
    }

    fn trace(
        &self,
        current_validators: &[ValidatorInfo],
        current_height: i64,
        transitions: &[ValidatorTransition],
    ) -> Result<Option<GenesisTrace>, VerificationError> {
        let mut trace = GenesisTrace {
            genesis_hash: self.genesis.genesis_hash,
            current_height,
            height_path: vec![0],
            transitions_applied: 0,
        };

        // No handover can have happened yet.
        if current_height <= 1 {
            let matches = current_validators == self.genesis.validators.as_slice();
            return Ok(matches.then_some(trace));
        }

        validate_transition_chain(transitions)?;
        if let Some((index, t)) = transitions
            .iter()
            .enumerate()
            .find(|(_, t)| t.to_height > current_height)
        {
            return Err(VerificationError::MalformedTransition {
                index,
                reason: format!("ends at {}, beyond height {}", t.to_height, current_height),
            });
        }
        trace.height_path = trace_height_path(transitions, current_height)?;

        let mut trusted: &[ValidatorInfo] = &self.genesis.validators;
        for (index, t) in transitions.iter().enumerate() {
            if t.old_validators.as_slice() != trusted {
                return Err(InvariantViolation::ValidatorSetMismatch {
                    height: t.from_height,
                }
                .into());
            }
            let signed = self.verify_transition(index, t)?;
            debug!(
                from = t.from_height,
                to = t.to_height,
                signed,
                validators = t.new_validators.len(),
                "validator transition verified"
            );
            trusted = &t.new_validators;
            trace.transitions_applied += 1;
        }

        Ok((trusted == current_validators).then_some(trace))
    }
}

fn verify_handover(validator: &ValidatorInfo, signature: &[u8], message: &Hash) -> bool {
    let Ok(key_bytes) = <[u8; ED25519_PUBKEY_LEN]>::try_from(validator.public_key.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message.as_bytes(), &sig).is_ok()
}
