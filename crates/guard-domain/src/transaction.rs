//! Domain models for committed ledger rows and incoming uploads.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::candidate::{DuplicateCandidate, ValidationError};

/// A committed ledger row. Only the artifact reference may change after commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: u64,
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub debit_account: String,
    pub credit_account: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub tenant: String,
}

impl LedgerTransaction {
    /// Builds the committed row for `incoming` under the store-assigned `id`.
    pub fn from_incoming(id: u64, incoming: &IncomingTransaction) -> Self {
        Self {
            id,
            reference_number: incoming.reference_number.trim().to_string(),
            transaction_date: incoming.transaction_date,
            amount: incoming.transaction_amount,
            debit_account: incoming.debit_account.clone(),
            credit_account: incoming.credit_account.clone(),
            description: incoming.description.clone(),
            artifact_ref: incoming.artifact_ref.clone(),
            tenant: incoming.tenant.clone(),
        }
    }
}

impl fmt::Display for LedgerTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {}",
            self.id, self.reference_number, self.transaction_date, self.amount
        )
    }
}

/// A transaction extracted from an uploaded artifact, not yet committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingTransaction {
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub transaction_amount: Decimal,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub debit_account: String,
    #[serde(default)]
    pub credit_account: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
}

impl IncomingTransaction {
    pub fn new(
        reference_number: impl Into<String>,
        transaction_date: NaiveDate,
        transaction_amount: Decimal,
    ) -> Self {
        Self {
            reference_number: reference_number.into(),
            transaction_date,
            transaction_amount,
            tenant: String::new(),
            debit_account: String::new(),
            credit_account: String::new(),
            description: String::new(),
            artifact_ref: None,
        }
    }

    pub fn with_accounts(mut self, debit: impl Into<String>, credit: impl Into<String>) -> Self {
        self.debit_account = debit.into();
        self.credit_account = credit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_artifact(mut self, artifact_ref: impl Into<String>) -> Self {
        self.artifact_ref = Some(artifact_ref.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Validates the search key fields and returns the candidate for lookups.
    pub fn candidate(&self) -> Result<DuplicateCandidate, ValidationError> {
        DuplicateCandidate::new(
            &self.reference_number,
            self.transaction_date,
            self.transaction_amount,
        )
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            reference_number: self.reference_number.trim().to_string(),
            transaction_date: self.transaction_date,
            amount: self.transaction_amount,
            debit_account: self.debit_account.clone(),
            credit_account: self.credit_account.clone(),
            description: self.description.clone(),
            artifact_ref: self.artifact_ref.clone(),
            tenant: self.tenant.clone(),
        }
    }
}

/// Point-in-time copy of a pending transaction, stored alongside decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionSnapshot {
    pub reference_number: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub debit_account: String,
    #[serde(default)]
    pub credit_account: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub tenant: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn from_incoming_trims_reference() {
        let incoming = IncomingTransaction::new(
            "  INV-7 ",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            dec!(12.50),
        )
        .with_accounts("6000", "2440")
        .with_artifact("uploads/inv-7.pdf");

        let row = LedgerTransaction::from_incoming(9, &incoming);
        assert_eq!(row.id, 9);
        assert_eq!(row.reference_number, "INV-7");
        assert_eq!(row.debit_account, "6000");
        assert_eq!(row.artifact_ref.as_deref(), Some("uploads/inv-7.pdf"));
    }

    #[test]
    fn amounts_serialize_without_float_loss() {
        let incoming = IncomingTransaction::new(
            "Kuwait",
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            dec!(150.004),
        );
        let json = serde_json::to_string(&incoming.snapshot()).unwrap();
        assert!(json.contains("150.004"), "unexpected json: {json}");
    }
}
