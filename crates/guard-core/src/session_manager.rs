//! Registry of pending duplicate-resolution sessions with inactivity timeouts.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use guard_domain::{Session, SessionState};
use thiserror::Error;
use tracing::{debug, info};

use crate::Clock;

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;
pub const DUPLICATE_RESOLUTION_OPERATION: &str = "duplicate_resolution";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {session_id} timed out after {timeout_seconds}s of inactivity")]
    Timeout {
        session_id: String,
        timeout_seconds: u64,
    },
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already exists: {0}")]
    AlreadyExists(String),
}

/// Tracks decision windows. Sessions leave the registry once they reach a
/// terminal state; the returned [`Session`] carries that final state.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    default_timeout: u64,
}

impl SessionManager {
    pub fn new(clock: Arc<dyn Clock>, default_timeout: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            default_timeout,
        }
    }

    pub fn create_session(
        &self,
        session_id: &str,
        operation_type: &str,
        timeout_seconds: Option<u64>,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.lock();
        if sessions.contains_key(session_id) {
            return Err(SessionError::AlreadyExists(session_id.to_string()));
        }
        let session = Session::new(
            session_id,
            operation_type,
            timeout_seconds.unwrap_or(self.default_timeout),
            self.clock.now(),
        );
        sessions.insert(session_id.to_string(), session.clone());
        info!(
            session_id,
            operation_type,
            timeout_seconds = session.timeout_seconds,
            "decision session opened"
        );
        Ok(session)
    }

    /// Refreshes an active session. An expired session is removed and
    /// reported as [`SessionError::Timeout`]; callers treat that as a cancel.
    pub fn validate_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if session.is_expired(now) {
            let timeout_seconds = session.timeout_seconds;
            sessions.remove(session_id);
            info!(session_id, timeout_seconds, "decision session timed out");
            return Err(SessionError::Timeout {
                session_id: session_id.to_string(),
                timeout_seconds,
            });
        }
        session.touch(now);
        Ok(true)
    }

    /// Explicitly closes a session without a decision.
    pub fn invalidate_session(&self, session_id: &str) -> Option<Session> {
        self.finish(session_id, SessionState::Closed)
    }

    /// Marks a session as resolved by a user decision.
    pub fn resolve_session(&self, session_id: &str) -> Option<Session> {
        self.finish(session_id, SessionState::Resolved)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.lock().get(session_id).cloned()
    }

    /// Removes every session past its timeout, returning them as timed out.
    pub fn cleanup_expired_sessions(&self) -> Vec<Session> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .values()
            .filter(|session| session.is_expired(now))
            .map(|session| session.session_id.clone())
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(mut session) = sessions.remove(&id) {
                session.state = SessionState::TimedOut;
                removed.push(session);
            }
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "expired decision sessions removed");
        }
        removed
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().len()
    }

    fn finish(&self, session_id: &str, state: SessionState) -> Option<Session> {
        let mut session = self.lock().remove(session_id)?;
        session.state = state;
        debug!(session_id, %state, "decision session finished");
        Some(session)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn manager() -> (SessionManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        ));
        (SessionManager::new(clock.clone(), DEFAULT_SESSION_TIMEOUT_SECS), clock)
    }

    #[test]
    fn validate_refreshes_last_accessed() {
        let (manager, clock) = manager();
        let created = manager
            .create_session("s-1", DUPLICATE_RESOLUTION_OPERATION, Some(30))
            .unwrap();
        assert_eq!(created.created_at, created.last_accessed);

        clock.advance(Duration::seconds(20));
        assert_eq!(manager.validate_session("s-1"), Ok(true));
        clock.advance(Duration::seconds(20));
        assert_eq!(manager.validate_session("s-1"), Ok(true));

        let session = manager.get("s-1").unwrap();
        assert_eq!(session.last_accessed, created.created_at + Duration::seconds(40));
    }

    #[test]
    fn validate_times_out_after_inactivity() {
        let (manager, clock) = manager();
        manager
            .create_session("s-1", DUPLICATE_RESOLUTION_OPERATION, Some(30))
            .unwrap();
        clock.advance(Duration::seconds(31));

        assert_eq!(
            manager.validate_session("s-1"),
            Err(SessionError::Timeout {
                session_id: "s-1".into(),
                timeout_seconds: 30
            })
        );
        assert_eq!(
            manager.validate_session("s-1"),
            Err(SessionError::NotFound("s-1".into()))
        );
    }

    #[test]
    fn terminal_transitions_remove_session() {
        let (manager, _) = manager();
        manager
            .create_session("a", DUPLICATE_RESOLUTION_OPERATION, None)
            .unwrap();
        manager
            .create_session("b", DUPLICATE_RESOLUTION_OPERATION, None)
            .unwrap();
        assert!(matches!(
            manager.create_session("a", DUPLICATE_RESOLUTION_OPERATION, None),
            Err(SessionError::AlreadyExists(_))
        ));

        assert_eq!(manager.resolve_session("a").unwrap().state, SessionState::Resolved);
        assert_eq!(manager.invalidate_session("b").unwrap().state, SessionState::Closed);
        assert!(manager.invalidate_session("b").is_none());
        assert_eq!(manager.active_sessions(), 0);
    }

    #[test]
    fn cleanup_reports_timed_out_sessions() {
        let (manager, clock) = manager();
        manager
            .create_session("short", DUPLICATE_RESOLUTION_OPERATION, Some(10))
            .unwrap();
        manager
            .create_session("long", DUPLICATE_RESOLUTION_OPERATION, Some(600))
            .unwrap();
        clock.advance(Duration::seconds(60));

        let removed = manager.cleanup_expired_sessions();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id, "short");
        assert_eq!(removed[0].state, SessionState::TimedOut);
        assert_eq!(manager.active_sessions(), 1);
    }
}
