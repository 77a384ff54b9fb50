//! guard-domain
//!
//! Pure domain models for duplicate-invoice detection (ledger rows, candidates,
//! check results, decisions, sessions). No I/O, no storage. Only data types.

pub mod candidate;
pub mod decision;
pub mod session;
pub mod transaction;

pub use candidate::*;
pub use decision::*;
pub use session::*;
pub use transaction::*;
