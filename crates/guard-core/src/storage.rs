use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Utc};
use guard_domain::{DecisionLogRecord, IncomingTransaction, LedgerTransaction, MatchQuery};

use crate::StoreError;

/// Backing store holding committed ledger rows, grouped into named tables.
///
/// Calls are blocking; implementations must be safe to share across threads.
pub trait LedgerStore: Send + Sync {
    /// Returns every row in `table` accepted by `query`, in any order.
    fn find_matches(
        &self,
        table: &str,
        query: &MatchQuery,
    ) -> Result<Vec<LedgerTransaction>, StoreError>;

    /// Commits `incoming`, assigning the next insertion id.
    fn insert(
        &self,
        table: &str,
        incoming: &IncomingTransaction,
    ) -> Result<LedgerTransaction, StoreError>;

    fn get(&self, table: &str, id: u64) -> Result<Option<LedgerTransaction>, StoreError>;

    /// Replaces the artifact reference of a committed row. No other field may change.
    fn repair_artifact_ref(
        &self,
        table: &str,
        id: u64,
        artifact_ref: &str,
    ) -> Result<LedgerTransaction, StoreError>;
}

/// Append-only store of duplicate decisions.
pub trait AuditStore: Send + Sync {
    fn append(&self, record: &DecisionLogRecord) -> Result<(), StoreError>;
    fn records(&self) -> Result<Vec<DecisionLogRecord>, StoreError>;
    /// Removes records logged before `cutoff` and reports how many were dropped.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    tables: HashMap<String, Vec<LedgerTransaction>>,
    next_id: u64,
}

/// Process-local ledger store, used for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: Mutex<MemoryTables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts pre-built rows as-is, keeping their ids.
    pub fn seed(&self, table: &str, rows: Vec<LedgerTransaction>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let max_id = rows.iter().map(|row| row.id).max().unwrap_or(0);
        inner.next_id = inner.next_id.max(max_id);
        inner.tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub fn len(&self, table: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tables.get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn find_matches(
        &self,
        table: &str,
        query: &MatchQuery,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default())
    }

    fn insert(
        &self,
        table: &str,
        incoming: &IncomingTransaction,
    ) -> Result<LedgerTransaction, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let row = LedgerTransaction::from_incoming(inner.next_id, incoming);
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    fn get(&self, table: &str, id: u64) -> Result<Option<LedgerTransaction>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| row.id == id).cloned()))
    }

    fn repair_artifact_ref(
        &self,
        table: &str,
        id: u64,
        artifact_ref: &str,
    ) -> Result<LedgerTransaction, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        row.artifact_ref = Some(artifact_ref.to_string());
        Ok(row.clone())
    }
}

/// Process-local audit store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<Vec<DecisionLogRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, record: &DecisionLogRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<DecisionLogRecord>, StoreError> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|record| record.logged_at >= cutoff);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use guard_domain::{DuplicateCandidate, DEFAULT_AMOUNT_TOLERANCE};
    use rust_decimal_macros::dec;

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = InMemoryLedgerStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let first = store
            .insert("ledger", &IncomingTransaction::new("A", date, dec!(1)))
            .unwrap();
        let second = store
            .insert("ledger", &IncomingTransaction::new("B", date, dec!(2)))
            .unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.len("ledger"), 2);
    }

    #[test]
    fn find_matches_is_scoped_to_table() {
        let store = InMemoryLedgerStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        store
            .insert("other", &IncomingTransaction::new("A", date, dec!(1)))
            .unwrap();
        let candidate = DuplicateCandidate::new("A", date, dec!(1)).unwrap();
        let query = MatchQuery::new(
            &candidate,
            DEFAULT_AMOUNT_TOLERANCE,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        assert!(store.find_matches("ledger", &query).unwrap().is_empty());
        assert_eq!(store.find_matches("other", &query).unwrap().len(), 1);
    }

    #[test]
    fn repair_only_touches_artifact() {
        let store = InMemoryLedgerStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let row = store
            .insert("ledger", &IncomingTransaction::new("A", date, dec!(1)))
            .unwrap();
        let repaired = store
            .repair_artifact_ref("ledger", row.id, "uploads/a.pdf")
            .unwrap();
        assert_eq!(repaired.artifact_ref.as_deref(), Some("uploads/a.pdf"));
        assert_eq!(repaired.amount, row.amount);
        assert!(matches!(
            store.repair_artifact_ref("ledger", 999, "x"),
            Err(StoreError::TransactionNotFound(999))
        ));
    }
}
