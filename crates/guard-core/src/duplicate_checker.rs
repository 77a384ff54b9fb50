//! Bounded ledger search for duplicate invoices and the decision audit trail.

use std::sync::Arc;

use chrono::{Duration, Months, NaiveDate};
use guard_domain::{
    Decision, DecisionLogRecord, DuplicateCandidate, DuplicateInfo, MatchQuery, MatchSummary,
    TransactionSnapshot, ValidationError, DEFAULT_AMOUNT_TOLERANCE,
};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AuditStore, Clock, LedgerStore, StoreError};

pub const DEFAULT_LOOKBACK_YEARS: u32 = 2;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("invalid duplicate candidate: {0}")]
    Validation(#[from] ValidationError),
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerSettings {
    /// Amounts closer than this are considered equal.
    pub amount_tolerance: Decimal,
    /// Rows older than this many years are never matched.
    pub lookback_years: u32,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
            lookback_years: DEFAULT_LOOKBACK_YEARS,
        }
    }
}

/// Searches the ledger for prior bookings of a candidate and records decisions.
///
/// See also: [`crate::QueryOptimizer`] for the cached, timed entry point.
pub struct DuplicateChecker {
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    settings: CheckerSettings,
}

impl DuplicateChecker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        settings: CheckerSettings,
    ) -> Self {
        Self {
            ledger,
            audit,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    /// Validates raw input and returns matching rows, most recently inserted first.
    pub fn check_for_duplicates(
        &self,
        reference: &str,
        date: &str,
        amount: Decimal,
        table: &str,
    ) -> Result<Vec<MatchSummary>, CheckerError> {
        let candidate = DuplicateCandidate::parse(reference, date, amount)?;
        self.search(&candidate, table)
    }

    /// Runs the bounded search for an already validated candidate.
    pub fn search(
        &self,
        candidate: &DuplicateCandidate,
        table: &str,
    ) -> Result<Vec<MatchSummary>, CheckerError> {
        let query = MatchQuery::new(
            candidate,
            self.settings.amount_tolerance,
            self.lookback_start(),
        );
        let mut rows = self
            .ledger
            .find_matches(table, &query)
            .map_err(CheckerError::StoreUnavailable)?;
        // Stores may return rows in any order and may over-select.
        rows.retain(|row| query.matches(row));
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        debug!(
            candidate = %candidate,
            table,
            matches = rows.len(),
            "duplicate search completed"
        );
        Ok(rows.iter().map(MatchSummary::from).collect())
    }

    /// First date still inside the lookback window.
    pub fn lookback_start(&self) -> NaiveDate {
        let today = self.clock.today();
        today
            .checked_sub_months(Months::new(self.settings.lookback_years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn format_duplicate_info(
        matches: Vec<MatchSummary>,
        new_transaction: Option<TransactionSnapshot>,
    ) -> DuplicateInfo {
        DuplicateInfo::from_matches(matches, new_transaction)
    }

    /// Persists the user's decision. Returns `false` instead of failing so the
    /// decision itself is never blocked by the audit trail.
    pub fn log_duplicate_decision(
        &self,
        decision: Decision,
        info: &DuplicateInfo,
        new_transaction: &TransactionSnapshot,
        user_id: &str,
        session_id: &str,
    ) -> bool {
        self.write_record(decision, info, new_transaction, user_id, session_id, false)
    }

    /// Records the cancel implied by an expired decision session.
    pub fn log_implicit_cancel(
        &self,
        info: &DuplicateInfo,
        new_transaction: &TransactionSnapshot,
        user_id: &str,
        session_id: &str,
    ) -> bool {
        self.write_record(Decision::Cancel, info, new_transaction, user_id, session_id, true)
    }

    pub fn decision_log(&self) -> Result<Vec<DecisionLogRecord>, StoreError> {
        self.audit.records()
    }

    /// Drops audit records older than `horizon` and reports the removed count.
    pub fn purge_decision_log(&self, horizon: Duration) -> Result<usize, StoreError> {
        let cutoff = self.clock.now() - horizon;
        let removed = self.audit.purge_before(cutoff)?;
        debug!(removed, %cutoff, "purged decision log");
        Ok(removed)
    }

    fn write_record(
        &self,
        decision: Decision,
        info: &DuplicateInfo,
        new_transaction: &TransactionSnapshot,
        user_id: &str,
        session_id: &str,
        timed_out: bool,
    ) -> bool {
        let record = DecisionLogRecord {
            id: Uuid::new_v4(),
            reference_number: new_transaction.reference_number.clone(),
            transaction_date: new_transaction.transaction_date,
            amount: new_transaction.amount,
            decision,
            existing_transaction_ids: info.existing_ids(),
            new_transaction: Some(new_transaction.clone()),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            logged_at: self.clock.now(),
            timed_out,
        };
        match self.audit.append(&record) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, session_id, %decision, "failed to persist duplicate decision");
                false
            }
        }
    }
}
