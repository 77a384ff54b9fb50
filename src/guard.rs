//! The outbound API used by the ingestion pipeline.
//!
//! [`DuplicateGuard`] owns the cache, the optimizer, the session registry and
//! the cleanup manager. Build one per process and share it behind an `Arc`.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Duration as ChronoDuration;
use guard_config::Config;
use guard_core::{
    should_cleanup_file, AuditStore, CacheStats, CheckerSettings, CleanupSettings, Clock,
    DuplicateChecker, FileCleanupManager, LedgerStore, QueryCache, QueryOptimizer, QueryStats,
    Recommendation, SessionError, SessionManager, SystemClock, DUPLICATE_RESOLUTION_OPERATION,
};
use guard_domain::{
    Decision, DuplicateCandidate, DuplicateInfo, IncomingTransaction, LedgerTransaction,
};
use guard_storage_json::{JsonAuditStore, JsonLedgerStore};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{artifact::HttpArtifactApi, ErrorClassifier, GuardError, Result};

/// Warning attached to checks that could not reach the ledger.
pub const UNVERIFIED_WARNING: &str = "could not verify duplicates, proceeding with a warning";
/// Warning attached to cancels whose artifact could not be removed.
pub const ARTIFACT_WARNING: &str = "artifact may require manual removal";
const AUDIT_WARNING: &str = "decision could not be written to the audit log";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionOutcome {
    pub success: bool,
    pub decision: Option<Decision>,
    pub timed_out: bool,
    pub transactions_to_commit: Vec<IncomingTransaction>,
    pub cleanup_performed: bool,
    pub warnings: Vec<String>,
}

impl ResolutionOutcome {
    fn rejected(warning: &str) -> Self {
        Self {
            success: false,
            decision: None,
            timed_out: false,
            transactions_to_commit: Vec::new(),
            cleanup_performed: false,
            warnings: vec![warning.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub cache_stats: CacheStats,
    pub query_stats: QueryStats,
    pub recommendations: Vec<Recommendation>,
}

/// State kept between opening a decision session and resolving it.
#[derive(Debug, Clone)]
struct PendingDecision {
    incoming: IncomingTransaction,
    candidate: DuplicateCandidate,
    info: DuplicateInfo,
}

pub struct DuplicateGuard {
    ledger: Arc<dyn LedgerStore>,
    checker: Arc<DuplicateChecker>,
    optimizer: QueryOptimizer,
    sessions: SessionManager,
    cleanup: FileCleanupManager,
    classifier: ErrorClassifier,
    pending: Mutex<HashMap<String, PendingDecision>>,
    table: String,
    audit_retention_days: u32,
}

impl DuplicateGuard {
    /// Assembles the guard from explicit collaborators.
    pub fn new(
        config: &Config,
        ledger: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditStore>,
        clock: Arc<dyn Clock>,
        cleanup: FileCleanupManager,
    ) -> Self {
        let checker = Arc::new(DuplicateChecker::new(
            ledger.clone(),
            audit,
            clock.clone(),
            CheckerSettings {
                amount_tolerance: config.amount_tolerance,
                lookback_years: config.lookback_years,
            },
        ));
        let cache = Arc::new(QueryCache::new(
            clock.clone(),
            config.cache_ttl(),
            config.cache_max_entries,
        ));
        let optimizer = QueryOptimizer::new(
            checker.clone(),
            cache,
            clock.clone(),
            config.ledger_table.clone(),
            config.slow_query_threshold(),
        );
        Self {
            ledger,
            checker,
            optimizer,
            sessions: SessionManager::new(clock, config.session_timeout_seconds),
            cleanup,
            classifier: ErrorClassifier::new(),
            pending: Mutex::new(HashMap::new()),
            table: config.ledger_table.clone(),
            audit_retention_days: config.audit_retention_days,
        }
    }

    /// Opens JSON-backed stores and the artifact API described by `config`.
    pub fn open(config: &Config, base_dir: &Path) -> Result<Self> {
        config.validate()?;
        let storage_root = config.resolve_storage_root(base_dir);
        let ledger = Arc::new(JsonLedgerStore::new(storage_root.join("ledgers"))?);
        let audit = Arc::new(JsonAuditStore::in_dir(&storage_root.join("audit"))?);

        let mut settings = CleanupSettings::new(storage_root.join("uploads"));
        settings.owned_hosts = config.owned_hosts();
        settings.max_attempts = config.cleanup_max_attempts;
        settings.backoff = config.cleanup_backoff();
        std::fs::create_dir_all(&settings.storage_root)?;
        let mut cleanup = FileCleanupManager::new(settings);
        if let Some(base_url) = &config.artifact_api_base_url {
            let api = HttpArtifactApi::new(base_url, config.artifact_api_timeout())?;
            cleanup = cleanup.with_remote(Arc::new(api));
        }

        Ok(Self::new(config, ledger, audit, Arc::new(SystemClock), cleanup))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cleanup_manager(&self) -> &FileCleanupManager {
        &self.cleanup
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn checker(&self) -> &DuplicateChecker {
        &self.checker
    }

    /// Runs the cached duplicate check. Only validation errors surface; a
    /// ledger outage yields an empty result carrying [`UNVERIFIED_WARNING`].
    pub fn check_for_duplicates(&self, incoming: &IncomingTransaction) -> Result<DuplicateInfo> {
        let candidate = incoming.candidate()?;
        Ok(self.lookup(&candidate, incoming))
    }

    /// Checks `incoming` and opens a decision window for it.
    ///
    /// Expired windows are resolved as implicit cancels first.
    pub fn begin_decision_session(
        &self,
        incoming: &IncomingTransaction,
        timeout_seconds: Option<u64>,
    ) -> Result<String> {
        let candidate = incoming.candidate()?;
        self.expire_sessions();
        let info = self.lookup(&candidate, incoming);

        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .create_session(&session_id, DUPLICATE_RESOLUTION_OPERATION, timeout_seconds)?;
        self.pending_lock().insert(
            session_id.clone(),
            PendingDecision {
                incoming: incoming.clone(),
                candidate,
                info,
            },
        );
        Ok(session_id)
    }

    /// Applies the user's decision. An expired session resolves as a cancel
    /// with `timed_out` set; the outcome never fails on audit or cleanup errors.
    pub fn resolve_duplicate_decision(
        &self,
        session_id: &str,
        decision: Decision,
        user_id: &str,
    ) -> ResolutionOutcome {
        let timed_out = match self.sessions.validate_session(session_id) {
            Ok(_) => {
                self.sessions.resolve_session(session_id);
                false
            }
            Err(err @ SessionError::Timeout { .. }) => {
                self.classifier
                    .classify(&err.into(), "resolve_duplicate_decision", Some(user_id));
                true
            }
            Err(err) => {
                let classified = self.classifier.classify(
                    &err.into(),
                    "resolve_duplicate_decision",
                    Some(user_id),
                );
                self.pending_lock().remove(session_id);
                return ResolutionOutcome::rejected(classified.user_message);
            }
        };

        let pending = self.pending_lock().remove(session_id);
        let Some(pending) = pending else {
            let err = GuardError::Session(SessionError::NotFound(session_id.to_string()));
            let classified =
                self.classifier
                    .classify(&err, "resolve_duplicate_decision", Some(user_id));
            return ResolutionOutcome::rejected(classified.user_message);
        };

        let effective = if timed_out { Decision::Cancel } else { decision };
        self.finalize(pending, session_id, effective, user_id, timed_out)
    }

    /// Resolves every expired decision window as an implicit cancel.
    pub fn expire_sessions(&self) -> usize {
        let expired = self.sessions.cleanup_expired_sessions();
        for session in &expired {
            let pending = self.pending_lock().remove(&session.session_id);
            if let Some(pending) = pending {
                self.finalize(pending, &session.session_id, Decision::Cancel, "system", true);
            }
        }
        expired.len()
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            cache_stats: self.optimizer.cache_stats(),
            query_stats: self.optimizer.query_stats(),
            recommendations: self.optimizer.optimization_recommendations(),
        }
    }

    /// Commits `incoming` and invalidates its cache key before returning.
    pub fn record_commit(&self, incoming: &IncomingTransaction) -> Result<LedgerTransaction> {
        let candidate = incoming.candidate()?;
        let committed = self.ledger.insert(&self.table, incoming);
        self.optimizer.invalidate_cache_for_transaction(&candidate);
        let committed = committed?;
        info!(id = committed.id, reference = %committed.reference_number, "transaction committed");
        Ok(committed)
    }

    /// Points a committed row at a different artifact. Nothing else changes.
    pub fn repair_artifact_ref(&self, id: u64, artifact_ref: &str) -> Result<LedgerTransaction> {
        if artifact_ref.trim().is_empty() {
            return Err(GuardError::InvalidInput(
                "artifact reference must not be empty".into(),
            ));
        }
        let repaired = self
            .ledger
            .repair_artifact_ref(&self.table, id, artifact_ref.trim())?;
        if let Ok(candidate) = DuplicateCandidate::new(
            &repaired.reference_number,
            repaired.transaction_date,
            repaired.amount,
        ) {
            self.optimizer.invalidate_cache_for_transaction(&candidate);
        }
        info!(id, "artifact reference repaired");
        Ok(repaired)
    }

    /// Drops decision records older than `horizon_days` (default from config).
    pub fn purge_decision_log(&self, horizon_days: Option<u32>) -> Result<usize> {
        let days = horizon_days.unwrap_or(self.audit_retention_days);
        let removed = self
            .checker
            .purge_decision_log(ChronoDuration::days(i64::from(days)))?;
        info!(removed, days, "decision log retention applied");
        Ok(removed)
    }

    fn lookup(&self, candidate: &DuplicateCandidate, incoming: &IncomingTransaction) -> DuplicateInfo {
        let snapshot = Some(incoming.snapshot());
        let (result, perf) = self.optimizer.check_duplicates_optimized(candidate, true);
        debug!(
            cache_hit = perf.cache_hit,
            elapsed_ms = perf.execution_time.as_millis() as u64,
            "duplicate lookup"
        );
        match result {
            Ok(matches) => DuplicateChecker::format_duplicate_info(matches, snapshot),
            Err(err) => {
                self.classifier
                    .classify(&err.into(), "check_for_duplicates", None);
                DuplicateInfo::unverified(UNVERIFIED_WARNING, snapshot)
            }
        }
    }

    fn finalize(
        &self,
        pending: PendingDecision,
        session_id: &str,
        decision: Decision,
        user_id: &str,
        timed_out: bool,
    ) -> ResolutionOutcome {
        let mut warnings = Vec::new();
        let snapshot = pending.incoming.snapshot();

        let logged = if timed_out {
            self.checker
                .log_implicit_cancel(&pending.info, &snapshot, user_id, session_id)
        } else {
            self.checker
                .log_duplicate_decision(decision, &pending.info, &snapshot, user_id, session_id)
        };
        if !logged {
            self.classifier.classify(
                &GuardError::DecisionNotLogged {
                    session_id: session_id.to_string(),
                },
                "log_duplicate_decision",
                Some(user_id),
            );
            warnings.push(AUDIT_WARNING.to_string());
        }

        self.optimizer.invalidate_cache_for_transaction(&pending.candidate);

        let mut cleanup_performed = false;
        let mut transactions_to_commit = Vec::new();
        match decision {
            Decision::Continue => transactions_to_commit.push(pending.incoming.clone()),
            Decision::Cancel => {
                if let Some(new_ref) = pending.incoming.artifact_ref.as_deref() {
                    match self.remove_cancelled_artifact(&pending.candidate, new_ref, session_id) {
                        Ok(removed) => cleanup_performed = removed,
                        Err(err) => {
                            self.classifier
                                .classify(&err, "cleanup_uploaded_file", Some(user_id));
                            warnings.push(ARTIFACT_WARNING.to_string());
                        }
                    }
                }
            }
        }

        info!(
            session_id,
            user_id,
            %decision,
            timed_out,
            cleanup_performed,
            "duplicate decision resolved"
        );
        if !warnings.is_empty() {
            warn!(session_id, ?warnings, "duplicate decision resolved with warnings");
        }

        ResolutionOutcome {
            success: true,
            decision: Some(decision),
            timed_out,
            transactions_to_commit,
            cleanup_performed,
            warnings,
        }
    }

    /// Deletes the upload of a cancelled transaction unless a committed row
    /// still references it. The ledger is read directly: rows committed while
    /// the decision was pending must be seen, and cached answers never decide
    /// a deletion.
    fn remove_cancelled_artifact(
        &self,
        candidate: &DuplicateCandidate,
        new_ref: &str,
        session_id: &str,
    ) -> Result<bool> {
        let current = self.checker.search(candidate, &self.table)?;
        let shared = current.iter().any(|row| {
            !should_cleanup_file(new_ref, row.artifact_ref.as_deref().unwrap_or_default())
        });
        if shared {
            debug!(session_id, "new artifact is shared with a kept row; not removed");
            return Ok(false);
        }
        let existing_ref = current.first().and_then(|row| row.artifact_ref.as_deref());
        self.cleanup.try_cleanup(new_ref, None, existing_ref)?;
        Ok(true)
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingDecision>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
