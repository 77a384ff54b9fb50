//! Cached, timed entry point for duplicate searches plus performance tracking.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, NaiveDate, Utc};
use guard_domain::{DuplicateCandidate, MatchSummary};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{CacheStats, CheckerError, Clock, DuplicateChecker, QueryCache};

pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(2);
const SLOW_QUERY_HISTORY: usize = 100;
const MIN_HIT_RATE_SAMPLES: u64 = 10;
const MIN_HIT_RATE_PERCENT: f64 = 50.0;
const MAX_SLOW_RATE_PERCENT: f64 = 10.0;

/// Timing and provenance of one lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfInfo {
    pub execution_time: Duration,
    pub cache_hit: bool,
    pub rows_returned: usize,
    pub query_optimized: bool,
    pub slow_query: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowQuery {
    pub candidate: DuplicateCandidate,
    pub execution_time: Duration,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub cached_queries: u64,
    pub optimized_queries: u64,
    pub slow_queries: u64,
    pub failed_queries: u64,
    pub average_query_time: Duration,
    pub slow_query_rate_percent: f64,
    pub recent_slow_queries: Vec<SlowQuery>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecommendationKind {
    Caching,
    Indexing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct QueryCounters {
    total_queries: u64,
    cached_queries: u64,
    optimized_queries: u64,
    slow_queries: u64,
    failed_queries: u64,
    total_time: Duration,
    slow_log: VecDeque<SlowQuery>,
}

type KeyLock = Arc<Mutex<()>>;

/// Amounts within tolerance share a match set, so locking is per (reference, date).
type LockKey = (String, NaiveDate);

/// Composes [`QueryCache`] and [`DuplicateChecker`] for one ledger table.
///
/// Lookups sharing a reference and date are serialized so concurrent requests
/// for one key share one store search. The slow-query threshold is advisory and never cancels work.
pub struct QueryOptimizer {
    checker: Arc<DuplicateChecker>,
    cache: Arc<QueryCache>,
    clock: Arc<dyn Clock>,
    table: String,
    slow_threshold: Duration,
    counters: Mutex<QueryCounters>,
    key_locks: Mutex<HashMap<LockKey, KeyLock>>,
}

impl QueryOptimizer {
    pub fn new(
        checker: Arc<DuplicateChecker>,
        cache: Arc<QueryCache>,
        clock: Arc<dyn Clock>,
        table: impl Into<String>,
        slow_threshold: Duration,
    ) -> Self {
        Self {
            checker,
            cache,
            clock,
            table: table.into(),
            slow_threshold,
            counters: Mutex::new(QueryCounters::default()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn checker(&self) -> &DuplicateChecker {
        &self.checker
    }

    pub fn check_duplicates_optimized(
        &self,
        candidate: &DuplicateCandidate,
        use_cache: bool,
    ) -> (Result<Vec<MatchSummary>, CheckerError>, PerfInfo) {
        if !use_cache {
            return self.search_and_record(candidate, false);
        }

        let key_lock = self.acquire_key_lock(candidate);
        let outcome = {
            let _guard = key_lock.lock().unwrap_or_else(|e| e.into_inner());
            let started = Instant::now();
            match self.cache.get(candidate) {
                Some(rows) => {
                    let perf = PerfInfo {
                        execution_time: started.elapsed(),
                        cache_hit: true,
                        rows_returned: rows.len(),
                        query_optimized: false,
                        slow_query: false,
                        error: None,
                    };
                    self.record_hit(perf.execution_time);
                    (Ok(rows), perf)
                }
                None => self.search_and_record(candidate, true),
            }
        };
        self.release_key_lock(candidate, key_lock);
        outcome
    }

    /// Drops every cached answer whose match set may include `candidate`:
    /// all amounts cached for its reference and date, since any of them may
    /// lie within tolerance of it.
    pub fn invalidate_cache_for_transaction(&self, candidate: &DuplicateCandidate) -> bool {
        let key_lock = self.acquire_key_lock(candidate);
        let removed = {
            let _guard = key_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.cache.invalidate(
                Some(&candidate.reference_number),
                Some(candidate.transaction_date),
                None,
            ) > 0
        };
        self.release_key_lock(candidate, key_lock);
        debug!(candidate = %candidate, removed, "invalidated cached duplicate lookup");
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn query_stats(&self) -> QueryStats {
        let counters = self.counters();
        let average_query_time = if counters.total_queries == 0 {
            Duration::ZERO
        } else {
            counters.total_time / u32::try_from(counters.total_queries).unwrap_or(u32::MAX)
        };
        QueryStats {
            total_queries: counters.total_queries,
            cached_queries: counters.cached_queries,
            optimized_queries: counters.optimized_queries,
            slow_queries: counters.slow_queries,
            failed_queries: counters.failed_queries,
            average_query_time,
            slow_query_rate_percent: percent(counters.slow_queries, counters.total_queries),
            recent_slow_queries: counters.slow_log.iter().cloned().collect(),
        }
    }

    pub fn optimization_recommendations(&self) -> Vec<Recommendation> {
        let cache = self.cache.stats();
        let queries = self.query_stats();
        let mut recommendations = Vec::new();

        if cache.total_requests > MIN_HIT_RATE_SAMPLES && cache.hit_rate_percent < MIN_HIT_RATE_PERCENT
        {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Caching,
                message: format!(
                    "Cache hit rate is {:.1}% over {} lookups; consider a longer TTL or narrower invalidation.",
                    cache.hit_rate_percent, cache.total_requests
                ),
            });
        }
        if queries.slow_query_rate_percent > MAX_SLOW_RATE_PERCENT {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Indexing,
                message: format!(
                    "{:.1}% of lookups exceeded {:.1}s; review indexing on the ledger table.",
                    queries.slow_query_rate_percent,
                    self.slow_threshold.as_secs_f64()
                ),
            });
        }
        recommendations.push(Recommendation {
            kind: RecommendationKind::Indexing,
            message: "Keep a composite index over (reference_number, transaction_date, amount)."
                .into(),
        });
        recommendations
    }

    pub fn reset_stats(&self) {
        *self.counters() = QueryCounters::default();
    }

    fn search_and_record(
        &self,
        candidate: &DuplicateCandidate,
        populate_cache: bool,
    ) -> (Result<Vec<MatchSummary>, CheckerError>, PerfInfo) {
        let started = Instant::now();
        let result = self.checker.search(candidate, &self.table);
        let execution_time = started.elapsed();

        match result {
            Ok(rows) => {
                if populate_cache {
                    self.cache.set(candidate, rows.clone(), None);
                }
                let slow_query = execution_time > self.slow_threshold;
                if slow_query {
                    warn!(
                        candidate = %candidate,
                        elapsed_ms = execution_time.as_millis() as u64,
                        threshold_ms = self.slow_threshold.as_millis() as u64,
                        "slow duplicate lookup"
                    );
                }
                self.record_search(candidate, execution_time, slow_query);
                let perf = PerfInfo {
                    execution_time,
                    cache_hit: false,
                    rows_returned: rows.len(),
                    query_optimized: true,
                    slow_query,
                    error: None,
                };
                (Ok(rows), perf)
            }
            Err(err) => {
                self.record_failure(execution_time);
                let perf = PerfInfo {
                    execution_time,
                    cache_hit: false,
                    rows_returned: 0,
                    query_optimized: false,
                    slow_query: false,
                    error: Some(err.to_string()),
                };
                (Err(err), perf)
            }
        }
    }

    fn record_hit(&self, elapsed: Duration) {
        let mut counters = self.counters();
        counters.total_queries += 1;
        counters.cached_queries += 1;
        counters.total_time += elapsed;
    }

    fn record_search(&self, candidate: &DuplicateCandidate, elapsed: Duration, slow: bool) {
        let recorded_at = self.clock.now();
        let mut counters = self.counters();
        counters.total_queries += 1;
        counters.optimized_queries += 1;
        counters.total_time += elapsed;
        if slow {
            counters.slow_queries += 1;
            if counters.slow_log.len() == SLOW_QUERY_HISTORY {
                counters.slow_log.pop_front();
            }
            counters.slow_log.push_back(SlowQuery {
                candidate: candidate.clone(),
                execution_time: elapsed,
                recorded_at,
            });
        }
    }

    fn record_failure(&self, elapsed: Duration) {
        let mut counters = self.counters();
        counters.total_queries += 1;
        counters.failed_queries += 1;
        counters.total_time += elapsed;
    }

    fn acquire_key_lock(&self, candidate: &DuplicateCandidate) -> KeyLock {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(lock_key(candidate)).or_default().clone()
    }

    fn release_key_lock(&self, candidate: &DuplicateCandidate, key_lock: KeyLock) {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference held by the map, one by us: nobody else is waiting.
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(&lock_key(candidate));
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, QueryCounters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_key(candidate: &DuplicateCandidate) -> LockKey {
    (
        candidate.reference_number.clone(),
        candidate.transaction_date,
    )
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
