// Thin re-export module: the ledger is split into records and hashing, the
// chain itself, integrity checks, and the single-writer handle.

pub mod chain;
pub mod record;
pub mod shared;
pub mod validation;

pub use chain::*;
pub use record::*;
pub use shared::*;
pub use validation::*;
