//! TTL cache over duplicate search results keyed by (reference, date, amount).
//!
//! Expiry is checked on every read, so correctness never depends on how often
//! [`QueryCache::cleanup_expired`] runs. The cache is a read optimization only;
//! nothing that commits or deletes data may treat it as authoritative.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use guard_domain::{key_material, DuplicateCandidate, MatchSummary};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Clock;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Stable SHA-256 digest of the normalized key fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(reference: &str, date: NaiveDate, amount: Decimal) -> Self {
        let digest = Sha256::digest(key_material(reference, date, amount).as_bytes());
        Self(hex::encode(digest))
    }

    pub fn for_candidate(candidate: &DuplicateCandidate) -> Self {
        Self::new(
            &candidate.reference_number,
            candidate.transaction_date,
            candidate.transaction_amount,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub reference: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub data: Vec<MatchSummary>,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn matches_fields(
        &self,
        reference: Option<&str>,
        date: Option<NaiveDate>,
        amount: Option<Decimal>,
    ) -> bool {
        reference.map_or(true, |r| self.reference == r.trim())
            && date.map_or(true, |d| self.date == d)
            && amount.map_or(true, |a| self.amount.normalize() == a.normalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub evictions: u64,
    pub total_requests: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Process-wide result cache. Construct once and share behind an `Arc`.
pub struct QueryCache {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    max_entries: Option<usize>,
}

impl QueryCache {
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            clock,
            default_ttl,
            max_entries: max_entries.map(|max| max.max(1)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns cached matches while the entry is fresh; expired entries are evicted.
    pub fn get(&self, candidate: &DuplicateCandidate) -> Option<Vec<MatchSummary>> {
        let key = CacheKey::for_candidate(candidate);
        let now = self.clock.now();
        let mut state = self.lock();
        let lookup = state
            .entries
            .get(&key)
            .map(|entry| (entry.is_expired(now), entry.data.clone()));
        let expired = match lookup {
            Some((false, data)) => {
                state.hits += 1;
                debug!(key = %key, rows = data.len(), "query cache hit");
                return Some(data);
            }
            Some((true, _)) => {
                state.entries.remove(&key);
                state.evictions += 1;
                true
            }
            None => false,
        };
        state.misses += 1;
        debug!(key = %key, expired, "query cache miss");
        None
    }

    pub fn set(
        &self,
        candidate: &DuplicateCandidate,
        data: Vec<MatchSummary>,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let key = CacheKey::for_candidate(candidate);
        let entry = CacheEntry {
            key: key.clone(),
            reference: candidate.reference_number.clone(),
            date: candidate.transaction_date,
            amount: candidate.transaction_amount,
            data,
            cached_at: now,
            expires_at,
            ttl,
        };

        let mut state = self.lock();
        if let Some(max) = self.max_entries {
            if !state.entries.contains_key(&key) && state.entries.len() >= max {
                Self::evict_soonest(&mut state);
            }
        }
        state.entries.insert(key, entry);
    }

    /// Removes cached entries. With every field present exactly one key is
    /// dropped; with none the whole cache is cleared; otherwise every entry
    /// agreeing on the supplied fields goes. Returns the number removed.
    pub fn invalidate(
        &self,
        reference: Option<&str>,
        date: Option<NaiveDate>,
        amount: Option<Decimal>,
    ) -> usize {
        let mut state = self.lock();
        let removed = match (reference, date, amount) {
            (Some(reference), Some(date), Some(amount)) => {
                let key = CacheKey::new(reference, date, amount);
                usize::from(state.entries.remove(&key).is_some())
            }
            (None, None, None) => {
                let count = state.entries.len();
                state.entries.clear();
                count
            }
            _ => {
                let before = state.entries.len();
                state
                    .entries
                    .retain(|_, entry| !entry.matches_fields(reference, date, amount));
                before - state.entries.len()
            }
        };
        debug!(removed, "query cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.invalidate(None, None, None);
    }

    /// Maintenance sweep dropping every expired entry.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.evictions += removed as u64;
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let total_requests = state.hits + state.misses;
        let hit_rate_percent = if total_requests == 0 {
            0.0
        } else {
            state.hits as f64 / total_requests as f64 * 100.0
        };
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate_percent,
            evictions: state.evictions,
            total_requests,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_soonest(state: &mut CacheState) {
        let victim = state
            .entries
            .values()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key.clone());
        if let Some(key) = victim {
            state.entries.remove(&key);
            state.evictions += 1;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn candidate(reference: &str, amount: Decimal) -> DuplicateCandidate {
        DuplicateCandidate::new(
            reference,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount,
        )
        .unwrap()
    }

    fn summary(id: u64) -> MatchSummary {
        MatchSummary {
            id,
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            description: String::new(),
            amount: dec!(150),
            debit: "6000".into(),
            credit: "2440".into(),
            reference: "Kuwait".into(),
            artifact_ref: None,
        }
    }

    #[test]
    fn key_is_stable_across_formatting() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            CacheKey::new("Kuwait", date, dec!(150.00)),
            CacheKey::new(" Kuwait", date, dec!(150))
        );
        assert_ne!(
            CacheKey::new("Kuwait", date, dec!(150.00)),
            CacheKey::new("Kuwait", date, dec!(150.01))
        );
        let key = CacheKey::new("Kuwait", date, dec!(1));
        assert_eq!(key.as_str().len(), 64);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn entry_expires_at_ttl_boundary() {
        let clock = clock();
        let cache = QueryCache::new(clock.clone(), DEFAULT_CACHE_TTL, None);
        let key = candidate("Kuwait", dec!(150));
        cache.set(&key, vec![summary(1)], Some(Duration::from_secs(60)));

        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(cache.get(&key).map(|rows| rows.len()), Some(1));

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get(&key).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_requests, 2);
        assert!((stats.hit_rate_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalidate_variants() {
        let cache = QueryCache::new(clock(), DEFAULT_CACHE_TTL, None);
        cache.set(&candidate("A", dec!(1)), Vec::new(), None);
        cache.set(&candidate("A", dec!(2)), Vec::new(), None);
        cache.set(&candidate("B", dec!(1)), Vec::new(), None);

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(cache.invalidate(Some("A"), Some(date), Some(dec!(1.0))), 1);
        assert_eq!(cache.invalidate(Some("A"), None, None), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(None, None, None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_expired_sweeps_stale_entries() {
        let clock = clock();
        let cache = QueryCache::new(clock.clone(), Duration::from_secs(10), None);
        cache.set(&candidate("A", dec!(1)), Vec::new(), None);
        cache.set(&candidate("B", dec!(1)), Vec::new(), Some(Duration::from_secs(120)));
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn capacity_evicts_entry_closest_to_expiry() {
        let cache = QueryCache::new(clock(), DEFAULT_CACHE_TTL, Some(2));
        cache.set(&candidate("A", dec!(1)), Vec::new(), Some(Duration::from_secs(5)));
        cache.set(&candidate("B", dec!(1)), Vec::new(), None);
        cache.set(&candidate("C", dec!(1)), Vec::new(), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&candidate("A", dec!(1))).is_none());
        assert!(cache.get(&candidate("C", dec!(1))).is_some());
    }
}
