//! Search keys and check results for duplicate detection.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::transaction::{LedgerTransaction, TransactionSnapshot};

/// ISO calendar date accepted for candidate dates.
pub const CANDIDATE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Default tolerance absorbing rounding from VAT and multi-step computations.
pub const DEFAULT_AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rejection reasons for a malformed candidate. These indicate a caller bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyReference,
    InvalidDate(String),
    NonPositiveAmount(Decimal),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyReference => f.write_str("reference number must not be empty"),
            ValidationError::InvalidDate(raw) => {
                write!(f, "transaction date `{raw}` is not a valid YYYY-MM-DD date")
            }
            ValidationError::NonPositiveAmount(amount) => {
                write!(f, "transaction amount must be greater than zero (got {amount})")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Ephemeral lookup key for a not-yet-committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub transaction_amount: Decimal,
}

impl DuplicateCandidate {
    pub fn new(
        reference_number: &str,
        transaction_date: NaiveDate,
        transaction_amount: Decimal,
    ) -> Result<Self, ValidationError> {
        let reference = reference_number.trim();
        if reference.is_empty() {
            return Err(ValidationError::EmptyReference);
        }
        if transaction_amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(transaction_amount));
        }
        Ok(Self {
            reference_number: reference.to_string(),
            transaction_date,
            transaction_amount,
        })
    }

    /// Validates raw caller input, parsing the date from its ISO form.
    pub fn parse(
        reference_number: &str,
        transaction_date: &str,
        transaction_amount: Decimal,
    ) -> Result<Self, ValidationError> {
        if reference_number.trim().is_empty() {
            return Err(ValidationError::EmptyReference);
        }
        let date = parse_candidate_date(transaction_date)?;
        Self::new(reference_number, date, transaction_amount)
    }

    /// Canonical text form of the key fields; equal candidates always agree.
    pub fn key_material(&self) -> String {
        key_material(
            &self.reference_number,
            self.transaction_date,
            self.transaction_amount,
        )
    }
}

impl fmt::Display for DuplicateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} for {}",
            self.reference_number, self.transaction_date, self.transaction_amount
        )
    }
}

/// Canonical `reference|date|amount` text used to derive cache keys.
pub fn key_material(reference: &str, date: NaiveDate, amount: Decimal) -> String {
    format!(
        "{}|{}|{}",
        reference.trim(),
        date.format(CANDIDATE_DATE_FORMAT),
        amount.normalize()
    )
}

pub fn parse_candidate_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), CANDIDATE_DATE_FORMAT)
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

/// Bounded search predicate evaluated by ledger stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchQuery {
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub tolerance: Decimal,
    pub not_before: NaiveDate,
}

impl MatchQuery {
    pub fn new(candidate: &DuplicateCandidate, tolerance: Decimal, not_before: NaiveDate) -> Self {
        Self {
            reference_number: candidate.reference_number.clone(),
            transaction_date: candidate.transaction_date,
            amount: candidate.transaction_amount,
            tolerance,
            not_before,
        }
    }

    /// Exact reference and date, amount strictly within tolerance, inside the lookback window.
    pub fn matches(&self, row: &LedgerTransaction) -> bool {
        row.transaction_date >= self.not_before
            && row.reference_number == self.reference_number
            && row.transaction_date == self.transaction_date
            && (row.amount - self.amount).abs() < self.tolerance
    }
}

/// Projection of an existing ledger row shown to the user when deciding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchSummary {
    pub id: u64,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub debit: String,
    pub credit: String,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
}

impl From<&LedgerTransaction> for MatchSummary {
    fn from(row: &LedgerTransaction) -> Self {
        Self {
            id: row.id,
            date: row.transaction_date,
            description: row.description.clone(),
            amount: row.amount,
            debit: row.debit_account.clone(),
            credit: row.credit_account.clone(),
            reference: row.reference_number.clone(),
            artifact_ref: row.artifact_ref.clone(),
        }
    }
}

/// Result of a duplicate check, formatted for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DuplicateInfo {
    pub has_duplicates: bool,
    pub duplicate_count: usize,
    pub existing_transactions: Vec<MatchSummary>,
    pub requires_user_decision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_transaction: Option<TransactionSnapshot>,
    /// User-safe note when the check itself could not be completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl DuplicateInfo {
    pub fn from_matches(
        matches: Vec<MatchSummary>,
        new_transaction: Option<TransactionSnapshot>,
    ) -> Self {
        let has_duplicates = !matches.is_empty();
        Self {
            has_duplicates,
            duplicate_count: matches.len(),
            existing_transactions: matches,
            requires_user_decision: has_duplicates,
            new_transaction,
            warning: None,
        }
    }

    /// An empty result carrying a warning, used when protection is degraded.
    pub fn unverified(warning: impl Into<String>, new_transaction: Option<TransactionSnapshot>) -> Self {
        Self {
            new_transaction,
            warning: Some(warning.into()),
            ..Self::default()
        }
    }

    pub fn existing_ids(&self) -> Vec<u64> {
        self.existing_transactions.iter().map(|m| m.id).collect()
    }
}
