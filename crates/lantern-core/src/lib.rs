//! # Lantern Core
//!
//! Trustless verification of Accumulate account state for lite clients.
//!
//! This crate contains **no networking code** and **no async runtime**. Data
//! comes in through the [`Backend`] trait and nothing it returns is trusted
//! until it passes the layers below.
//!
//! ## Trust Model
//!
//! - **Layer1, entry inclusion** (`inclusion::entry`): the account's chain
//!   entry is the leaf of a Merkle receipt whose root is a partition anchor.
//!
//! - **Layer2 / Layer2.5, state commitment and anchoring** (`inclusion::anchor`):
//!   that root is the app hash of a block of the account's home partition and,
//!   for BVN accounts, is anchored into the directory partition.
//!
//! - **Layer3, block signatures** (`consensus::signatures`): the block's header
//!   commits its app hash (`consensus::header`), and validators holding more
//!   than two thirds of the voting power signed the canonical precommit for
//!   that header with Ed25519.
//!
//! - **Layer4, genesis trust** (`consensus::validator_chain`): the signing
//!   validator set descends from the configured genesis set through handovers
//!   each signed by a quorum of the outgoing set.
//!
//! Only an account that passes all four is `verified`. Anything less is
//! reported as a partial [`TrustLevel`] together with the failing layer.
//!
//! ## Usage
//!
//! ```ignore
//! use lantern_core::{GenesisTrust, Verifier, VerifierConfig};
//!
//! let verifier = Verifier::new(backend, VerifierConfig::default(), genesis)?;
//! let proof = verifier.verify_account("acc://alice.acme/tokens")?;
//! println!("{} -> {}", proof.account(), proof.trust_level());
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod error;
pub mod inclusion;
pub mod types;
pub mod verifier;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use backend::{AnchorQuery, AnchorSearch, Backend, BackendError, ChainEntry};
pub use cache::{CacheMetrics, Clock, ManualClock, ProofCache, StoreOptions, SystemClock};
pub use config::{CacheConfig, VerifierConfig};
pub use consensus::{
    signatures::BlockSignatureLayer,
    validator_chain::{trace_height_path, validate_transition_chain, GenesisTrustLayer},
};
pub use error::{ErrorKind, InvariantViolation, ResultExt, VerificationError};
pub use inclusion::{anchor::AnchoringLayer, entry::EntryInclusionLayer, receipt::ReceiptVerifier};
pub use types::*;
pub use verifier::Verifier;
