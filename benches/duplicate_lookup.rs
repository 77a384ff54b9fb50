use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use guard_config::Config;
use guard_core::{
    CleanupSettings, FileCleanupManager, InMemoryAuditStore, InMemoryLedgerStore, LedgerStore,
    ManualClock,
};
use guard_domain::IncomingTransaction;
use invoice_guard::DuplicateGuard;
use rust_decimal::Decimal;

fn build_guard(rows: usize) -> DuplicateGuard {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for idx in 0..rows {
        let incoming = IncomingTransaction::new(
            format!("INV-{}", idx % 500),
            start + Duration::days((idx % 120) as i64),
            Decimal::new(10_000 + (idx % 1_000) as i64, 2),
        );
        ledger.insert("ledger", &incoming).expect("seed ledger");
    }
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let cleanup = FileCleanupManager::new(CleanupSettings::new(std::env::temp_dir()));
    DuplicateGuard::new(
        &Config::default(),
        ledger,
        Arc::new(InMemoryAuditStore::new()),
        clock,
        cleanup,
    )
}

fn bench_lookups(c: &mut Criterion) {
    let guard = build_guard(black_box(20_000));
    let candidate = IncomingTransaction::new(
        "INV-42",
        NaiveDate::from_ymd_opt(2024, 2, 12).unwrap(),
        Decimal::new(10_042, 2),
    );

    c.bench_function("duplicate_check_cache_hit", |b| {
        guard.check_for_duplicates(&candidate).expect("warm cache");
        b.iter(|| guard.check_for_duplicates(black_box(&candidate)).expect("check"))
    });

    c.bench_function("duplicate_check_cache_miss", |b| {
        b.iter(|| {
            // Committing invalidates the key, forcing the next lookup to search.
            guard.record_commit(black_box(&candidate)).expect("commit");
            guard.check_for_duplicates(black_box(&candidate)).expect("check")
        })
    });
}

criterion_group!(benches, bench_lookups);
criterion_main!(benches);
