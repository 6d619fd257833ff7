// src/orchestrator/run.rs

//! Run bookkeeping: outcome, phases, and the final report.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::diagnostics::{ArtifactBundle, RunRecord};
use crate::exec::ExecutionResult;
use crate::types::TriggerKind;

/// States a Run passes through after admission.
///
/// Every admitted Run ends with `CredentialsTornDown` followed (on failure)
/// by `DiagnosticsCollected`, then `SlotReleased`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Admitted,
    CredentialsProvisioned,
    ProvisionFailed,
    Executing,
    Completed,
    TimedOut,
    Cancelled,
    CredentialsTornDown,
    DiagnosticsCollected,
    SlotReleased,
}

/// Final result of a Run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Non-zero exit, death by signal (`exit_code = None`) or a task that
    /// could not be spawned.
    Failed { exit_code: Option<i32> },
    TimedOut,
    /// Terminated because the harness was told to stop.
    Cancelled,
    /// Credentials could not be provisioned; the task never ran.
    ProvisionFailed { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::ProvisionFailed { .. } => "provision_failed",
        }
    }

    pub(crate) fn from_execution(result: &ExecutionResult) -> Self {
        if result.cancelled {
            RunOutcome::Cancelled
        } else if result.timed_out {
            RunOutcome::TimedOut
        } else if result.success() {
            RunOutcome::Success
        } else {
            RunOutcome::Failed {
                exit_code: result.exit_code,
            }
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Failed {
                exit_code: Some(code),
            } => write!(f, "failed (exit code {code})"),
            RunOutcome::ProvisionFailed { reason } => write!(f, "provision failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Everything known about a finished Run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub job: String,
    pub trigger: TriggerKind,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub outcome: RunOutcome,
    /// `None` when the task never started.
    pub execution: Option<ExecutionResult>,
    /// Present only for failed Runs whose diagnostics were saved.
    pub bundle: Option<ArtifactBundle>,
    pub phases: Vec<RunPhase>,
    /// Set when credential cleanup failed. Does not affect `outcome`.
    pub teardown_error: Option<String>,
}

impl RunReport {
    pub fn duration(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or(Duration::ZERO)
    }

    /// Process exit code for the harness: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.outcome.is_success() { 0 } else { 1 }
    }

    pub(crate) fn record(&self, finished_at: SystemTime) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            job: self.job.clone(),
            trigger: self.trigger,
            outcome: self.outcome.label().to_string(),
            exit_code: self.execution.and_then(|e| e.exit_code),
            timed_out: matches!(self.outcome, RunOutcome::TimedOut),
            started_at_unix: unix_secs(self.started_at),
            finished_at_unix: unix_secs(finished_at),
        }
    }
}

pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(exit_code: Option<i32>, timed_out: bool) -> ExecutionResult {
        ExecutionResult {
            exit_code,
            duration: Duration::from_millis(5),
            timed_out,
            cancelled: false,
        }
    }

    #[test]
    fn outcome_from_execution() {
        assert_eq!(RunOutcome::from_execution(&exec(Some(0), false)), RunOutcome::Success);
        assert_eq!(
            RunOutcome::from_execution(&exec(Some(2), false)),
            RunOutcome::Failed { exit_code: Some(2) }
        );
        assert_eq!(
            RunOutcome::from_execution(&exec(None, false)),
            RunOutcome::Failed { exit_code: None }
        );
        // A timeout wins even if an exit code was somehow observed.
        assert_eq!(RunOutcome::from_execution(&exec(Some(0), true)), RunOutcome::TimedOut);

        let cancelled = ExecutionResult {
            cancelled: true,
            ..exec(None, false)
        };
        assert_eq!(RunOutcome::from_execution(&cancelled), RunOutcome::Cancelled);
        assert!(!RunOutcome::Cancelled.is_success());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(
            RunOutcome::Failed { exit_code: Some(1) }.to_string(),
            "failed (exit code 1)"
        );
        assert_eq!(RunOutcome::TimedOut.to_string(), "timed_out");
    }
}
