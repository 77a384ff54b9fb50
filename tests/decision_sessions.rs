mod common;

use std::fs;

use chrono::Duration;
use common::{harness, kuwait_default};
use guard_core::{AuditStore, SessionError};
use guard_domain::Decision;
use invoice_guard::GuardError;

#[test]
fn resolution_within_timeout_applies_decision() {
    let h = harness();
    h.guard.record_commit(&kuwait_default()).unwrap();
    let session = h.guard.begin_decision_session(&kuwait_default(), Some(60)).unwrap();

    h.clock.advance(Duration::seconds(59));
    let outcome = h.guard.resolve_duplicate_decision(&session, Decision::Continue, "u");
    assert!(outcome.success);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.decision, Some(Decision::Continue));
}

#[test]
fn expired_session_becomes_implicit_cancel() {
    let h = harness();
    h.guard.record_commit(&kuwait_default()).unwrap();
    fs::write(h.storage_root.join("scan.pdf"), b"%PDF").unwrap();

    let incoming = kuwait_default().with_artifact("scan.pdf");
    let session = h.guard.begin_decision_session(&incoming, Some(30)).unwrap();
    h.clock.advance(Duration::seconds(31));

    let outcome = h.guard.resolve_duplicate_decision(&session, Decision::Continue, "u");
    assert!(outcome.success);
    assert!(outcome.timed_out);
    assert_eq!(outcome.decision, Some(Decision::Cancel));
    assert!(outcome.transactions_to_commit.is_empty());
    assert!(outcome.cleanup_performed);
    assert!(!h.storage_root.join("scan.pdf").exists());

    let records = h.audit.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, Decision::Cancel);
    assert!(records[0].timed_out);
}

#[test]
fn timeout_is_measured_from_last_access() {
    let h = harness();
    h.guard.record_commit(&kuwait_default()).unwrap();
    let session = h.guard.begin_decision_session(&kuwait_default(), Some(30)).unwrap();

    h.clock.advance(Duration::seconds(20));
    assert_eq!(h.guard.sessions().validate_session(&session), Ok(true));
    h.clock.advance(Duration::seconds(20));
    assert_eq!(h.guard.sessions().validate_session(&session), Ok(true));
    h.clock.advance(Duration::seconds(31));
    assert!(matches!(
        h.guard.sessions().validate_session(&session),
        Err(SessionError::Timeout { timeout_seconds: 30, .. })
    ));
}

#[test]
fn default_timeout_comes_from_config() {
    let h = harness();
    let session = h.guard.begin_decision_session(&kuwait_default(), None).unwrap();
    let stored = h.guard.sessions().get(&session).unwrap();
    assert_eq!(stored.timeout_seconds, 300);
}

#[test]
fn audit_retention_purges_old_records() {
    let h = harness();
    h.guard.record_commit(&kuwait_default()).unwrap();
    let session = h.guard.begin_decision_session(&kuwait_default(), None).unwrap();
    h.guard.resolve_duplicate_decision(&session, Decision::Cancel, "u");

    h.clock.advance(Duration::days(100));
    assert_eq!(h.guard.purge_decision_log(None).unwrap(), 0);
    assert_eq!(h.guard.purge_decision_log(Some(90)).unwrap(), 1);
    assert!(h.audit.records().unwrap().is_empty());
}

#[test]
fn unknown_session_reports_user_safe_message() {
    let h = harness();
    let outcome = h.guard.resolve_duplicate_decision("missing", Decision::Cancel, "u");
    assert!(!outcome.success);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(!outcome.warnings[0].contains("missing"));

    let err: GuardError = SessionError::NotFound("missing".into()).into();
    assert!(err.to_string().contains("missing"));
}
