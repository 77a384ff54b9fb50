use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use guard_core::{AuditStore, LedgerStore, StoreError};
use guard_domain::{DecisionLogRecord, IncomingTransaction, LedgerTransaction, MatchQuery};
use serde::{Deserialize, Serialize};
use tracing::debug;

const TABLE_EXTENSION: &str = "json";
const TMP_SUFFIX: &str = "tmp";
pub const DECISION_LOG_FILE: &str = "decisions.jsonl";

/// On-disk shape of one ledger table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TableDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    transactions: Vec<LedgerTransaction>,
}

/// Filesystem-backed ledger tables, one pretty-printed JSON document each.
///
/// Writes go through a temp file and rename; a process-wide mutex serializes
/// read-modify-write cycles.
#[derive(Debug)]
pub struct JsonLedgerStore {
    tables_dir: PathBuf,
    guard: Mutex<()>,
}

impl JsonLedgerStore {
    pub fn new(tables_dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&tables_dir)?;
        Ok(Self {
            tables_dir,
            guard: Mutex::new(()),
        })
    }

    /// File backing `table`. Names map to files verbatim, so anything outside
    /// `[a-z0-9_]` is rejected instead of being rewritten onto another table.
    pub fn table_path(&self, table: &str) -> Result<PathBuf, StoreError> {
        if !is_table_name(table) {
            return Err(StoreError::InvalidTableName(table.to_string()));
        }
        Ok(self.tables_dir.join(format!("{}.{}", table, TABLE_EXTENSION)))
    }

    pub fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.tables_dir)? {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(TABLE_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, table: &str) -> Result<Option<TableDocument>, StoreError> {
        let path = self.table_path(table)?;
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|err| StoreError::Serde(format!("{}: {}", path.display(), err)))
    }

    fn save(&self, table: &str, document: &TableDocument) -> Result<(), StoreError> {
        let path = self.table_path(table)?;
        let json = serde_json::to_string_pretty(document)
            .map_err(|err| StoreError::Serde(err.to_string()))?;
        let tmp = tmp_path(&path);
        write_atomic(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for JsonLedgerStore {
    fn find_matches(
        &self,
        table: &str,
        query: &MatchQuery,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        let _guard = self.lock();
        Ok(self
            .load(table)?
            .map(|document| {
                document
                    .transactions
                    .into_iter()
                    .filter(|row| query.matches(row))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn insert(
        &self,
        table: &str,
        incoming: &IncomingTransaction,
    ) -> Result<LedgerTransaction, StoreError> {
        let _guard = self.lock();
        let mut document = self.load(table)?.unwrap_or_default();
        let max_id = document.transactions.iter().map(|row| row.id).max().unwrap_or(0);
        let id = document.next_id.max(max_id) + 1;
        let row = LedgerTransaction::from_incoming(id, incoming);
        document.next_id = id;
        document.transactions.push(row.clone());
        self.save(table, &document)?;
        debug!(table, id, "ledger row committed");
        Ok(row)
    }

    fn get(&self, table: &str, id: u64) -> Result<Option<LedgerTransaction>, StoreError> {
        let _guard = self.lock();
        Ok(self
            .load(table)?
            .and_then(|document| document.transactions.into_iter().find(|row| row.id == id)))
    }

    fn repair_artifact_ref(
        &self,
        table: &str,
        id: u64,
        artifact_ref: &str,
    ) -> Result<LedgerTransaction, StoreError> {
        let _guard = self.lock();
        let mut document = self
            .load(table)?
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let row = document
            .transactions
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        row.artifact_ref = Some(artifact_ref.to_string());
        let repaired = row.clone();
        self.save(table, &document)?;
        Ok(repaired)
    }
}

/// Decision log stored as JSON lines. Appends never rewrite earlier lines;
/// only a retention purge rewrites the file, atomically.
#[derive(Debug)]
pub struct JsonAuditStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonAuditStore {
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    /// Store at `<dir>/decisions.jsonl`.
    pub fn in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::new(dir.join(DECISION_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<DecisionLogRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|err| {
                StoreError::Serde(format!("{} line {}: {}", self.path.display(), index + 1, err))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuditStore for JsonAuditStore {
    fn append(&self, record: &DecisionLogRecord) -> Result<(), StoreError> {
        let mut line =
            serde_json::to_string(record).map_err(|err| StoreError::Serde(err.to_string()))?;
        line.push('\n');
        let _guard = self.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<DecisionLogRecord>, StoreError> {
        let _guard = self.lock();
        self.read_all()
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.lock();
        let records = self.read_all()?;
        let before = records.len();
        let kept: Vec<_> = records
            .into_iter()
            .filter(|record| record.logged_at >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        let mut buffer = String::new();
        for record in &kept {
            buffer.push_str(
                &serde_json::to_string(record).map_err(|err| StoreError::Serde(err.to_string()))?,
            );
            buffer.push('\n');
        }
        let tmp = tmp_path(&self.path);
        write_atomic(&tmp, buffer.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        debug!(removed, kept = kept.len(), "decision log purged");
        Ok(removed)
    }
}

fn is_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
