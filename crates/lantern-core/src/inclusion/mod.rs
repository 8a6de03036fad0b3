pub mod receipt;
pub mod entry;
pub mod anchor;

pub use receipt::*;
pub use entry::*;
pub use anchor::*;
