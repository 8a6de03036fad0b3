use crate::error::VerificationError;
use crate::types::hash::HashAlgorithm;
use crate::types::receipt::{AccUrl, DIRECTORY_PARTITION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHAIN_NAME: &str = "main";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1024;

/// Verifier settings. Every field has a default, so `{}` is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VerifierConfig {
    /// Digest used for receipts and transition messages.
    pub hash_algorithm: HashAlgorithm,
    /// Partition that aggregates anchors and whose validators sign them.
    pub authority_partition: String,
    /// Chain whose head entry proves an account's state.
    pub chain_name: String,
    pub cache: CacheConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            authority_partition: DIRECTORY_PARTITION.to_string(),
            chain_name: DEFAULT_CHAIN_NAME.to_string(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    /// Bound on entries across all cache tables together.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl VerifierConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, VerificationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VerificationError::malformed(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VerificationError> {
        self.authority()?;
        if self.chain_name.trim().is_empty() {
            return Err(VerificationError::malformed("chain_name is empty"));
        }
        if self.cache.max_entries == 0 {
            return Err(VerificationError::malformed("cache.max_entries must be at least 1"));
        }
        Ok(())
    }

    pub fn authority(&self) -> Result<AccUrl, VerificationError> {
        Ok(AccUrl::parse(&self.authority_partition)?)
    }
}
