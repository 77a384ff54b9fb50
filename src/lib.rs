#![doc(test(attr(deny(warnings))))]

//! Invoice Guard detects duplicate invoices before they are booked, asks the
//! user to decide on conflicts, and rolls back rejected uploads.

pub mod artifact;
pub mod classification;
pub mod cli;
pub mod errors;
pub mod guard;
pub mod utils;

pub use classification::{ClassifiedError, ErrorCategory, ErrorClassifier, Severity};
pub use errors::{GuardError, Result};
pub use guard::{DuplicateGuard, PerformanceSummary, ResolutionOutcome};

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Invoice Guard tracing initialized.");
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_does_not_panic() {
        super::init();
        super::init();
    }
}
