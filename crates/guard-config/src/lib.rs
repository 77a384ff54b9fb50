//! guard-config
//!
//! Tunables for duplicate detection plus disk persistence helpers.

pub mod error;
pub mod manager;
pub mod model;

pub use error::ConfigError;
pub use manager::{resolve_base_dir, ConfigManager, HOME_ENV_VAR};
pub use model::Config;
