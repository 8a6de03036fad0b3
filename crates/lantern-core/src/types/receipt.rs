use crate::types::hash::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// URL scheme of every Accumulate identifier.
pub const ACC_SCHEME: &str = "acc://";

/// The authority partition (Directory Network) that aggregates every anchor.
pub const DIRECTORY_PARTITION: &str = "acc://dn.acme";

/// Prefix shared by every Block Validation Network partition URL.
pub const BVN_PARTITION_PREFIX: &str = "acc://bvn-";

/// One step on a Merkle path: the sibling to combine with, and on which side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEntry {
    /// Hash of the sibling node at this level.
    pub sibling_hash: Hash,
    /// `true` if the sibling sits to the right of the running hash.
    pub is_right_sibling: bool,
}

impl ReceiptEntry {
    pub fn right(sibling_hash: Hash) -> Self {
        Self {
            sibling_hash,
            is_right_sibling: true,
        }
    }

    pub fn left(sibling_hash: Hash) -> Self {
        Self {
            sibling_hash,
            is_right_sibling: false,
        }
    }
}

/// A Merkle inclusion receipt.
/// Replaying `entries` from `start` must reproduce `anchor` exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleReceipt {
    /// The leaf being proven.
    pub start: Hash,
    /// The root the receipt claims to reach.
    pub anchor: Hash,
    /// Block of the producing partition in which the anchor was recorded.
    pub local_block: u64,
    /// Sibling path, leaf to root.
    pub entries: Vec<ReceiptEntry>,
}

/// One partition's root committed into another partition's structure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAnchor {
    pub source_partition: String,
    pub target_partition: String,
    /// The source root that was anchored.
    pub anchor_hash: Hash,
    /// Receipt from `anchor_hash` to the target partition's root.
    pub receipt: MerkleReceipt,
}

/// Layer1 output: a chain entry proven to sit under an anchor, and the
/// partition that produced that anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer1EntryInclusion {
    pub scope: AccUrl,
    pub chain_name: String,
    pub chain_index: u64,
    /// The entry hash; must equal `receipt.start`.
    pub leaf: Hash,
    pub receipt: MerkleReceipt,
    /// Must equal `receipt.anchor`.
    pub anchor: Hash,
    /// Must equal `receipt.local_block`.
    pub local_block: u64,
    pub source_partition: String,
}

/// A normalised `acc://` URL.
///
/// The scheme and authority are lower-cased and a trailing `/` is dropped, so
/// two spellings of the same account produce the same cache key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccUrl(String);

/// Errors from parsing an [`AccUrl`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("URL {url:?} does not use the acc:// scheme")]
    WrongScheme { url: String },

    #[error("URL {url:?} has an empty authority")]
    EmptyAuthority { url: String },

    #[error("URL {url:?} contains whitespace")]
    Whitespace { url: String },
}

impl AccUrl {
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let trimmed = input.trim();
        if trimmed.chars().any(char::is_whitespace) {
            return Err(UrlError::Whitespace {
                url: input.to_string(),
            });
        }
        match trimmed.get(..ACC_SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(ACC_SCHEME) => {}
            _ => {
                return Err(UrlError::WrongScheme {
                    url: input.to_string(),
                })
            }
        }

        let rest = trimmed[ACC_SCHEME.len()..].trim_end_matches('/');
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(UrlError::EmptyAuthority {
                url: input.to_string(),
            });
        }

        Ok(Self(format!(
            "{}{}{}",
            ACC_SCHEME,
            authority.to_ascii_lowercase(),
            path
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The authority component, e.g. `bvn-apollo.acme`.
    pub fn authority(&self) -> &str {
        let rest = &self.0[ACC_SCHEME.len()..];
        match rest.find('/') {
            Some(idx) => &rest[..idx],
            None => rest,
        }
    }

    /// The path component including its leading `/`, or `""`.
    pub fn path(&self) -> &str {
        let rest = &self.0[ACC_SCHEME.len()..];
        match rest.find('/') {
            Some(idx) => &rest[idx..],
            None => "",
        }
    }

    pub fn is_directory(&self) -> bool {
        self.0 == DIRECTORY_PARTITION
    }

    pub fn is_bvn(&self) -> bool {
        self.0.starts_with(BVN_PARTITION_PREFIX)
    }
}

impl TryFrom<String> for AccUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccUrl> for String {
    fn from(url: AccUrl) -> Self {
        url.0
    }
}

impl std::str::FromStr for AccUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AccUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccUrl({})", self.0)
    }
}
