//! guard-core
//!
//! Duplicate-invoice detection services: bounded ledger search, result cache,
//! query monitoring, decision sessions and conservative artifact cleanup.
//! Depends on guard-domain. No CLI, no terminal I/O, no concrete storage format.

pub mod duplicate_checker;
pub mod error;
pub mod file_cleanup;
pub mod query_cache;
pub mod query_optimizer;
pub mod session_manager;
pub mod storage;
pub mod time;

pub use duplicate_checker::*;
pub use error::*;
pub use file_cleanup::*;
pub use query_cache::*;
pub use query_optimizer::*;
pub use session_manager::*;
pub use storage::*;
pub use time::*;
