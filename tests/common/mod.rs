#![allow(dead_code)]

pub use runguard_test_utils::builders;
pub use runguard_test_utils::fake_executor;
pub use runguard_test_utils::{init_tracing, with_timeout};

use std::path::Path;

use runguard::orchestrator::{RunReport, TriggerResult};

/// Unwrap a trigger that must have been admitted.
pub fn completed(result: TriggerResult) -> RunReport {
    match result {
        TriggerResult::Completed(report) => *report,
        TriggerResult::Skipped => panic!("expected the trigger to be admitted, got Skipped"),
    }
}

/// Number of entries left in a directory (0 if it does not exist).
pub fn entries_in(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd.count(),
        Err(_) => 0,
    }
}
