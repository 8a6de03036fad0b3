pub mod vote;
pub mod header;
pub mod signatures;
pub mod validator_chain;

pub use vote::*;
pub use header::*;
pub use signatures::*;
pub use validator_chain::*;
