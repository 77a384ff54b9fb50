//! Decision sessions tracking a pending duplicate resolution.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// Largest span chrono's `Duration::seconds` accepts.
const MAX_TIMEOUT_SECONDS: i64 = i64::MAX / 1_000;

/// Lifecycle of a decision session. Every state except `Active` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Resolved,
    TimedOut,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Active => "active",
            SessionState::Resolved => "resolved",
            SessionState::TimedOut => "timed out",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub operation_type: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub timeout_seconds: u64,
    pub state: SessionState,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        operation_type: impl Into<String>,
        timeout_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            operation_type: operation_type.into(),
            created_at: now,
            last_accessed: now,
            timeout_seconds,
            state: SessionState::Active,
        }
    }

    /// True once more than `timeout_seconds` elapsed since the last touch.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let seconds = i64::try_from(self.timeout_seconds)
            .unwrap_or(i64::MAX)
            .min(MAX_TIMEOUT_SECONDS);
        let timeout = Duration::seconds(seconds);
        now.signed_duration_since(self.last_accessed) > timeout
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
    }
}
