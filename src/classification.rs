//! Translates component failures into one user-safe contract.
//!
//! Callers match on [`ErrorCategory`] and `can_continue`, never on message
//! text. `user_message` is fixed per error kind and never embeds the
//! underlying error, which only reaches the log.

use std::fmt;

use guard_core::{CleanupError, SessionError, StoreError};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Database,
    Filesystem,
    Validation,
    Security,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Database => "database",
            ErrorCategory::Filesystem => "filesystem",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Security => "security",
            ErrorCategory::System => "system",
        };
        f.write_str(label)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub error_code: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub user_message: &'static str,
    pub recovery_suggestions: Vec<&'static str>,
    pub can_continue: bool,
}

struct Rule {
    code: &'static str,
    category: ErrorCategory,
    severity: Severity,
    message: &'static str,
    suggestions: &'static [&'static str],
    can_continue: bool,
}

const VALIDATION: Rule = Rule {
    code: "VALIDATION_FAILED",
    category: ErrorCategory::Validation,
    severity: Severity::Low,
    message: "The transaction details are incomplete or invalid.",
    suggestions: &[
        "Check that the reference number is filled in.",
        "Use a YYYY-MM-DD date and an amount greater than zero.",
    ],
    can_continue: false,
};

const STORE_UNAVAILABLE: Rule = Rule {
    code: "STORE_UNAVAILABLE",
    category: ErrorCategory::Database,
    severity: Severity::High,
    message: "Could not verify duplicates, proceeding with a warning.",
    suggestions: &[
        "Review the booking for duplicates manually.",
        "Retry once the ledger is reachable again.",
    ],
    can_continue: true,
};

const RECORD_NOT_FOUND: Rule = Rule {
    code: "RECORD_NOT_FOUND",
    category: ErrorCategory::Database,
    severity: Severity::Medium,
    message: "The requested ledger record does not exist.",
    suggestions: &["Check the transaction id and ledger table."],
    can_continue: true,
};

const STORE_CORRUPTED: Rule = Rule {
    code: "STORE_CORRUPTED",
    category: ErrorCategory::Database,
    severity: Severity::Critical,
    message: "Stored ledger data could not be read.",
    suggestions: &["Restore the ledger from a backup before booking further transactions."],
    can_continue: false,
};

const SESSION_TIMEOUT: Rule = Rule {
    code: "SESSION_TIMEOUT",
    category: ErrorCategory::System,
    severity: Severity::Medium,
    message: "The decision window expired, so the upload was cancelled.",
    suggestions: &["Upload the document again if it should be booked."],
    can_continue: true,
};

const SESSION_INVALID: Rule = Rule {
    code: "SESSION_INVALID",
    category: ErrorCategory::System,
    severity: Severity::Low,
    message: "This decision was already handled or never started.",
    suggestions: &["Run the duplicate check again to start a new decision."],
    can_continue: true,
};

const CLEANUP_REJECTED: Rule = Rule {
    code: "CLEANUP_REJECTED",
    category: ErrorCategory::Security,
    severity: Severity::High,
    message: "The uploaded file was kept because it is not in managed storage.",
    suggestions: &["The artifact may require manual removal."],
    can_continue: true,
};

const ARTIFACT_MISSING: Rule = Rule {
    code: "ARTIFACT_MISSING",
    category: ErrorCategory::Filesystem,
    severity: Severity::Low,
    message: "The uploaded file was already gone.",
    suggestions: &[],
    can_continue: true,
};

const CLEANUP_FAILED: Rule = Rule {
    code: "CLEANUP_FAILED",
    category: ErrorCategory::Filesystem,
    severity: Severity::Medium,
    message: "The uploaded file could not be removed.",
    suggestions: &[
        "The artifact may require manual removal.",
        "Check permissions on the storage directory.",
    ],
    can_continue: true,
};

const AUDIT_WRITE_FAILED: Rule = Rule {
    code: "AUDIT_WRITE_FAILED",
    category: ErrorCategory::Database,
    severity: Severity::Medium,
    message: "Your decision was applied but could not be recorded in the audit log.",
    suggestions: &["Check free disk space for the decision log."],
    can_continue: true,
};

const CONFIG_INVALID: Rule = Rule {
    code: "CONFIG_INVALID",
    category: ErrorCategory::System,
    severity: Severity::Critical,
    message: "Invoice Guard is misconfigured.",
    suggestions: &["Fix the configuration file and restart."],
    can_continue: false,
};

const INVALID_INPUT: Rule = Rule {
    code: "INVALID_INPUT",
    category: ErrorCategory::Validation,
    severity: Severity::Low,
    message: "The request could not be understood.",
    suggestions: &["Check the command arguments."],
    can_continue: false,
};

/// Single translation point from [`GuardError`] to [`ClassifiedError`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classifies `error` and logs it once with its operation context.
    pub fn classify(
        &self,
        error: &GuardError,
        operation_context: &str,
        user_id: Option<&str>,
    ) -> ClassifiedError {
        let rule = rule_for(error);
        let classified = ClassifiedError {
            error_code: rule.code,
            category: rule.category,
            severity: rule.severity,
            user_message: rule.message,
            recovery_suggestions: rule.suggestions.to_vec(),
            can_continue: rule.can_continue,
        };

        let user_id = user_id.unwrap_or("-");
        match classified.severity {
            Severity::Critical => error!(
                code = classified.error_code,
                category = %classified.category,
                context = operation_context,
                user_id,
                %error,
                "operation failed"
            ),
            Severity::High | Severity::Medium => warn!(
                code = classified.error_code,
                category = %classified.category,
                context = operation_context,
                user_id,
                %error,
                "operation degraded"
            ),
            Severity::Low => info!(
                code = classified.error_code,
                category = %classified.category,
                context = operation_context,
                user_id,
                %error,
                "operation rejected"
            ),
        }
        classified
    }
}

fn rule_for(error: &GuardError) -> &'static Rule {
    match error {
        GuardError::Validation(_) => &VALIDATION,
        GuardError::InvalidInput(_) => &INVALID_INPUT,
        GuardError::Store(err) => match err {
            StoreError::Unavailable(_) | StoreError::Io(_) => &STORE_UNAVAILABLE,
            StoreError::TableNotFound(_) | StoreError::TransactionNotFound(_) => {
                &RECORD_NOT_FOUND
            }
            StoreError::Serde(_) => &STORE_CORRUPTED,
            StoreError::InvalidTableName(_) => &CONFIG_INVALID,
        },
        GuardError::Session(err) => match err {
            SessionError::Timeout { .. } => &SESSION_TIMEOUT,
            SessionError::NotFound(_) | SessionError::AlreadyExists(_) => &SESSION_INVALID,
        },
        GuardError::Cleanup(err) => match err {
            CleanupError::OutsideStorageRoot(_) | CleanupError::ExternalReference(_) => {
                &CLEANUP_REJECTED
            }
            CleanupError::NotFound(_) => &ARTIFACT_MISSING,
            CleanupError::RemoteUnavailable
            | CleanupError::Transient(_)
            | CleanupError::Failed(_)
            | CleanupError::Io(_) => &CLEANUP_FAILED,
        },
        GuardError::DecisionNotLogged { .. } => &AUDIT_WRITE_FAILED,
        GuardError::Config(_) => &CONFIG_INVALID,
    }
}
