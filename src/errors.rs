use std::result::Result as StdResult;

use guard_config::ConfigError;
use guard_core::{CheckerError, CleanupError, SessionError, StoreError};
use guard_domain::{UnknownDecision, ValidationError};
use thiserror::Error;

/// Unified error type for the duplicate guard and its CLI.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Invalid transaction: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Cleanup error: {0}")]
    Cleanup(#[from] CleanupError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Decision for session {session_id} could not be written to the audit log")]
    DecisionNotLogged { session_id: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = StdResult<T, GuardError>;

impl From<CheckerError> for GuardError {
    fn from(err: CheckerError) -> Self {
        match err {
            CheckerError::Validation(err) => GuardError::Validation(err),
            CheckerError::StoreUnavailable(err) => GuardError::Store(err),
        }
    }
}

impl From<UnknownDecision> for GuardError {
    fn from(err: UnknownDecision) -> Self {
        GuardError::InvalidInput(err.to_string())
    }
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        GuardError::Store(StoreError::Io(err))
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Store(StoreError::Serde(err.to_string()))
    }
}
