#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use chrono::{NaiveDate, TimeZone, Utc};
use guard_config::Config;
use guard_core::{
    ArtifactApi, CleanupError, CleanupSettings, FileCleanupManager, InMemoryAuditStore,
    InMemoryLedgerStore, LedgerStore, ManualClock, StoreError,
};
use guard_domain::{IncomingTransaction, LedgerTransaction, MatchQuery};
use invoice_guard::DuplicateGuard;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub const OWNED_HOST: &str = "store";

pub fn temp_root() -> PathBuf {
    let temp = TempDir::new().expect("create temp dir");
    let path = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    path
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// The invoice used throughout the scenarios.
pub fn kuwait(amount: Decimal) -> IncomingTransaction {
    IncomingTransaction::new("Kuwait", date(2024, 1, 15), amount)
        .with_accounts("6000", "2440")
        .with_description("Freight Kuwait")
}

pub fn kuwait_default() -> IncomingTransaction {
    kuwait(dec!(150.00))
}

/// Remote artifact API that records deletions and can fail on demand.
#[derive(Default)]
pub struct RecordingArtifactApi {
    pub deleted: Mutex<Vec<String>>,
    pub fail_always: bool,
}

impl RecordingArtifactApi {
    pub fn failing() -> Self {
        Self {
            fail_always: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl ArtifactApi for RecordingArtifactApi {
    fn delete_artifact(&self, file_id: &str) -> Result<(), CleanupError> {
        self.deleted.lock().unwrap().push(file_id.to_string());
        if self.fail_always {
            Err(CleanupError::Transient("503 Service Unavailable".into()))
        } else {
            Ok(())
        }
    }
}

/// Ledger store whose backend is down.
pub struct UnavailableStore;

impl LedgerStore for UnavailableStore {
    fn find_matches(&self, _: &str, _: &MatchQuery) -> Result<Vec<LedgerTransaction>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn insert(&self, _: &str, _: &IncomingTransaction) -> Result<LedgerTransaction, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn get(&self, _: &str, _: u64) -> Result<Option<LedgerTransaction>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn repair_artifact_ref(
        &self,
        _: &str,
        _: u64,
        _: &str,
    ) -> Result<LedgerTransaction, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// In-memory store that sleeps on every search and counts them.
pub struct SlowStore {
    pub inner: InMemoryLedgerStore,
    pub delay: Duration,
    pub searches: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            delay,
            searches: AtomicUsize::new(0),
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

impl LedgerStore for SlowStore {
    fn find_matches(
        &self,
        table: &str,
        query: &MatchQuery,
    ) -> Result<Vec<LedgerTransaction>, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.find_matches(table, query)
    }

    fn insert(
        &self,
        table: &str,
        incoming: &IncomingTransaction,
    ) -> Result<LedgerTransaction, StoreError> {
        self.inner.insert(table, incoming)
    }

    fn get(&self, table: &str, id: u64) -> Result<Option<LedgerTransaction>, StoreError> {
        self.inner.get(table, id)
    }

    fn repair_artifact_ref(
        &self,
        table: &str,
        id: u64,
        artifact_ref: &str,
    ) -> Result<LedgerTransaction, StoreError> {
        self.inner.repair_artifact_ref(table, id, artifact_ref)
    }
}

/// A guard over injectable stores with a manual clock at 2024-06-01 09:00 UTC.
pub struct Harness {
    pub guard: DuplicateGuard,
    pub audit: Arc<InMemoryAuditStore>,
    pub clock: Arc<ManualClock>,
    pub api: Arc<RecordingArtifactApi>,
    pub storage_root: PathBuf,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(InMemoryLedgerStore::new()), RecordingArtifactApi::default())
}

pub fn harness_with(ledger: Arc<dyn LedgerStore>, api: RecordingArtifactApi) -> Harness {
    let storage_root = temp_root();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let audit = Arc::new(InMemoryAuditStore::new());
    let api = Arc::new(api);

    let mut settings = CleanupSettings::new(&storage_root).with_owned_host(OWNED_HOST);
    settings.backoff = Duration::from_millis(1);
    let cleanup = FileCleanupManager::new(settings).with_remote(api.clone());

    let guard = DuplicateGuard::new(&Config::default(), ledger, audit.clone(), clock.clone(), cleanup);
    Harness {
        guard,
        audit,
        clock,
        api,
        storage_root,
    }
}
