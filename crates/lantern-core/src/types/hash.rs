use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

/// Number of bytes in every digest the network commits to.
pub const HASH_LEN: usize = 32;

/// A 32-byte cryptographic digest.
///
/// Equality is byte-exact. The value is only ever shortened for display
/// through [`Hash::short`]; every comparison uses all 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// The all-zero digest. Backends use it to mean "no value".
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashParseError> {
        if bytes.len() != HASH_LEN {
            return Err(HashParseError::InvalidLength { got: bytes.len() });
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Parse a hex-encoded hash, with or without a `0x` prefix.
    pub fn from_hex(hex_str: &str) -> Result<Self, HashParseError> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);

        if hex_str.len() != HASH_LEN * 2 {
            return Err(HashParseError::InvalidLength {
                got: hex_str.len() / 2,
            });
        }

        let bytes = hex::decode(hex_str).map_err(|e| HashParseError::InvalidHex {
            reason: e.to_string(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines only.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors from parsing a [`Hash`] out of untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashParseError {
    #[error("Hash must be 32 bytes, got {got}")]
    InvalidLength { got: usize },

    #[error("Invalid hex in hash: {reason}")]
    InvalidHex { reason: String },
}

/// The digest the network commits with.
///
/// Receipts, anchors and transition messages are all combined with the
/// configured algorithm, so a network that switches digests only changes
/// configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Keccak256,
}

impl HashAlgorithm {
    /// Hash arbitrary data.
    pub fn digest(&self, data: &[u8]) -> Hash {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                let result = hasher.finalize();
                let mut output = [0u8; HASH_LEN];
                output.copy_from_slice(&result);
                Hash(output)
            }
            HashAlgorithm::Keccak256 => {
                let mut hasher = Keccak::v256();
                let mut output = [0u8; HASH_LEN];
                hasher.update(data);
                hasher.finalize(&mut output);
                Hash(output)
            }
        }
    }

    /// Hash of `left ‖ right`. Order matters.
    pub fn combine(&self, left: &Hash, right: &Hash) -> Hash {
        let mut data = [0u8; HASH_LEN * 2];
        data[..HASH_LEN].copy_from_slice(&left.0);
        data[HASH_LEN..].copy_from_slice(&right.0);
        self.digest(&data)
    }
}
