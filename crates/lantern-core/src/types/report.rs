use crate::error::{ErrorKind, VerificationError};
use crate::types::consensus::ConsensusProof;
use crate::types::receipt::{AccUrl, Layer1EntryInclusion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const LAYER_ENTRY_INCLUSION: &str = "layer1_entry_inclusion";
pub const LAYER_STATE_COMMITMENT: &str = "layer2_state_commitment";
pub const LAYER_PARTITION_ANCHOR: &str = "layer2_5_partition_anchor";
pub const LAYER_BLOCK_SIGNATURES: &str = "layer3_block_signatures";
pub const LAYER_GENESIS_TRUST: &str = "layer4_genesis_trust";

/// Uniform outcome of one verification layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer_name: String,
    pub valid: bool,
    pub details: BTreeMap<String, Value>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl LayerResult {
    pub fn passed(layer_name: &str) -> Self {
        Self {
            layer_name: layer_name.to_string(),
            valid: true,
            details: BTreeMap::new(),
            error_message: None,
            error_kind: None,
        }
    }

    /// A failed layer. The message carries the whole caused-by chain.
    pub fn failed(layer_name: &str, error: &VerificationError) -> Self {
        Self {
            layer_name: layer_name.to_string(),
            valid: false,
            details: BTreeMap::new(),
            error_message: Some(error.report()),
            error_kind: Some(error.kind()),
        }
    }

    /// A layer that did not run because an earlier one failed.
    pub fn skipped(layer_name: &str, reason: impl Into<String>) -> Self {
        let mut details = BTreeMap::new();
        details.insert("skipped".to_string(), Value::Bool(true));
        Self {
            layer_name: layer_name.to_string(),
            valid: false,
            details,
            error_message: Some(reason.into()),
            error_kind: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.details.get("skipped"), Some(Value::Bool(true)))
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// How far the trust chain reached for an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustLevel {
    #[serde(rename = "none")]
    None,
    /// The entry is included under a partition anchor.
    #[serde(rename = "partial-bpt")]
    PartialBpt,
    /// The partition root is also anchored into the authority partition.
    #[serde(rename = "partial-bvn")]
    PartialBvn,
    /// Signed by a quorum of validators descending from genesis.
    #[serde(rename = "full")]
    Full,
}

impl TrustLevel {
    /// Derive the trust level from which layers held.
    ///
    /// A failed Layer1 yields `None` regardless of what later layers report.
    pub fn assess(
        entry_included: bool,
        anchored: bool,
        signed: bool,
        genesis_traced: bool,
    ) -> Self {
        if !entry_included {
            return TrustLevel::None;
        }
        if anchored && signed && genesis_traced {
            return TrustLevel::Full;
        }
        if anchored {
            return TrustLevel::PartialBvn;
        }
        TrustLevel::PartialBpt
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::None => "none",
            TrustLevel::PartialBpt => "partial-bpt",
            TrustLevel::PartialBvn => "partial-bvn",
            TrustLevel::Full => "full",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock bookkeeping for one verification run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationTiming {
    /// Unix milliseconds when the run started.
    pub started_at_ms: u64,
    pub total_micros: u64,
    pub layer_micros: BTreeMap<String, u64>,
}

/// The full result of verifying one account.
///
/// Built once per run and never mutated afterwards; the fields are private so
/// that a cached copy cannot be edited into claiming more trust. A stored
/// `verified` flag is ignored on load and derived from `trust_level` again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredProof")]
pub struct CompleteProof {
    account: AccUrl,
    verified: bool,
    trust_level: TrustLevel,
    layers: Vec<LayerResult>,
    inclusion: Option<Layer1EntryInclusion>,
    consensus: Option<ConsensusProof>,
    timing: VerificationTiming,
}

#[derive(Deserialize)]
struct StoredProof {
    account: AccUrl,
    trust_level: TrustLevel,
    layers: Vec<LayerResult>,
    inclusion: Option<Layer1EntryInclusion>,
    consensus: Option<ConsensusProof>,
    timing: VerificationTiming,
}

impl From<StoredProof> for CompleteProof {
    fn from(stored: StoredProof) -> Self {
        CompleteProof::new(
            stored.account,
            stored.trust_level,
            stored.layers,
            stored.inclusion,
            stored.consensus,
            stored.timing,
        )
    }
}

impl CompleteProof {
    pub(crate) fn new(
        account: AccUrl,
        trust_level: TrustLevel,
        layers: Vec<LayerResult>,
        inclusion: Option<Layer1EntryInclusion>,
        consensus: Option<ConsensusProof>,
        timing: VerificationTiming,
    ) -> Self {
        Self {
            account,
            verified: trust_level == TrustLevel::Full,
            trust_level,
            layers,
            inclusion,
            consensus,
            timing,
        }
    }

    pub fn account(&self) -> &AccUrl {
        &self.account
    }

    /// `true` only when every layer required for full trust passed.
    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    pub fn layers(&self) -> &[LayerResult] {
        &self.layers
    }

    pub fn layer(&self, layer_name: &str) -> Option<&LayerResult> {
        self.layers.iter().find(|l| l.layer_name == layer_name)
    }

    pub fn inclusion(&self) -> Option<&Layer1EntryInclusion> {
        self.inclusion.as_ref()
    }

    pub fn consensus(&self) -> Option<&ConsensusProof> {
        self.consensus.as_ref()
    }

    pub fn timing(&self) -> &VerificationTiming {
        &self.timing
    }

    /// Error messages of every failed, non-skipped layer.
    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.layers
            .iter()
            .filter(|l| !l.valid && !l.is_skipped())
            .filter_map(|l| {
                l.error_message
                    .as_deref()
                    .map(|m| (l.layer_name.as_str(), m))
            })
            .collect()
    }
}
