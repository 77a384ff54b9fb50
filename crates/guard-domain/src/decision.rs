//! User decisions on detected duplicates and their audit records.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transaction::TransactionSnapshot;

/// Outcome chosen by the user for a pending duplicate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Book the new transaction despite the existing matches.
    Continue,
    /// Drop the new transaction and roll back its uploaded artifact.
    Cancel,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Continue => "continue",
            Decision::Cancel => "cancel",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDecision(pub String);

impl fmt::Display for UnknownDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown decision `{}` (expected continue or cancel)", self.0)
    }
}

impl std::error::Error for UnknownDecision {}

impl FromStr for Decision {
    type Err = UnknownDecision;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" | "keep" => Ok(Decision::Continue),
            "cancel" | "discard" => Ok(Decision::Cancel),
            other => Err(UnknownDecision(other.to_string())),
        }
    }
}

/// Append-only audit row for a resolved duplicate decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionLogRecord {
    pub id: Uuid,
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub decision: Decision,
    pub existing_transaction_ids: Vec<u64>,
    pub new_transaction: Option<TransactionSnapshot>,
    pub user_id: String,
    pub session_id: String,
    pub logged_at: DateTime<Utc>,
    /// Set when the decision was implied by an expired session.
    #[serde(default)]
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_parses_aliases() {
        assert_eq!("Continue".parse::<Decision>(), Ok(Decision::Continue));
        assert_eq!(" cancel ".parse::<Decision>(), Ok(Decision::Cancel));
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn decision_serializes_lowercase() {
        let json = serde_json::to_string(&Decision::Cancel).unwrap();
        assert_eq!(json, "\"cancel\"");
    }
}
