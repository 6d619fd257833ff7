// src/orchestrator/mod.rs

//! Single-flight Run orchestration.
//!
//! [`Orchestrator::trigger`] is the one admission entry point for both
//! scheduled and manual triggers. An admitted Run goes through:
//!
//! 1. credential provisioning
//! 2. task execution under the timeout, or until [`Orchestrator::cancel_runs`]
//! 3. credential teardown (always)
//! 4. diagnostics collection (failures only)
//! 5. slot release (always)
//!
//! The slot permit and the credential handle both clean up on drop, so the
//! ordering guarantees hold for early returns and panics as well.

pub mod run;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ConfigFile, JobSettings};
use crate::credentials::{self, CredentialHandle, SecretSpec};
use crate::diagnostics::{ArtifactBundle, DiagnosticsCollector, prune_expired};
use crate::errors::Result;
use crate::exec::{CancelSignal, ExecutionRequest, TaskExecutor};
use crate::guard::{Admission, ConcurrencyGuard};
use crate::types::{TriggerKind, TriggeredWhileBusy};

pub use run::{RunOutcome, RunPhase, RunReport};

/// What happened to a trigger.
#[derive(Debug)]
pub enum TriggerResult {
    /// Not admitted: another Run held the slot.
    Skipped,
    Completed(Box<RunReport>),
}

type SecretLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Drives Runs of one job.
pub struct Orchestrator<E: TaskExecutor> {
    job: JobSettings,
    env: BTreeMap<String, String>,
    secrets: Vec<SecretSpec>,
    output_log: Option<PathBuf>,
    collector: DiagnosticsCollector,
    retention: Duration,
    guard: Arc<ConcurrencyGuard>,
    executor: E,
    secret_lookup: SecretLookup,
    next_seq: AtomicU64,
    cancel: watch::Sender<bool>,
}

impl<E: TaskExecutor> std::fmt::Debug for Orchestrator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("job", &self.job.name)
            .field("cmd", &self.job.cmd)
            .finish_non_exhaustive()
    }
}

impl<E: TaskExecutor> Orchestrator<E> {
    /// Build an orchestrator for `cfg`'s job. Secrets are read from the
    /// process environment unless [`with_secret_lookup`](Self::with_secret_lookup)
    /// replaces the source.
    pub fn new(cfg: &ConfigFile, executor: E) -> Result<Self> {
        let collector = DiagnosticsCollector::new(
            cfg.job.working_dir.clone(),
            cfg.artifact_dir(),
            &cfg.diagnostics.patterns,
        )?;

        Ok(Self {
            job: cfg.job.clone(),
            env: cfg.env.clone(),
            secrets: cfg.secrets.clone(),
            output_log: cfg.output_log_path(),
            collector,
            retention: cfg.diagnostics.retention,
            guard: Arc::new(ConcurrencyGuard::new()),
            executor,
            secret_lookup: Box::new(|name| std::env::var(name).ok()),
            next_seq: AtomicU64::new(1),
            cancel: watch::Sender::new(false),
        })
    }

    pub fn with_secret_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.secret_lookup = Box::new(lookup);
        self
    }

    /// Share a guard with other orchestrators (same job name means same
    /// slot).
    pub fn with_guard(mut self, guard: Arc<ConcurrencyGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn guard(&self) -> &Arc<ConcurrencyGuard> {
        &self.guard
    }

    pub fn job_name(&self) -> &str {
        &self.job.name
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Stop for good: terminate a running task and refuse further Runs.
    ///
    /// A cancelled Run still tears down its credentials, collects
    /// diagnostics and releases the slot before `trigger` returns.
    pub fn cancel_runs(&self) {
        if !self.cancel.send_replace(true) {
            warn!(job = %self.job.name, "cancelling runs");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Apply the artifact retention window.
    pub fn prune_artifacts(&self, now: SystemTime) -> Result<Vec<PathBuf>> {
        prune_expired(self.collector.artifact_dir(), self.retention, now)
    }

    /// Request a Run. Returns `Skipped` if admission is refused.
    pub async fn trigger(&self, kind: TriggerKind) -> TriggerResult {
        let job = self.job.name.as_str();

        let admission = match self.job.triggered_while_busy {
            TriggeredWhileBusy::Skip => self.guard.acquire(job),
            TriggeredWhileBusy::Queue => {
                self.guard
                    .acquire_queued(job, self.job.queue_length)
                    .await
            }
        };
        let permit = match admission {
            Admission::Admitted(permit) => permit,
            Admission::Rejected => {
                info!(job, trigger = %kind, "run already in progress; trigger skipped");
                return TriggerResult::Skipped;
            }
        };
        if self.is_cancelled() {
            info!(job, trigger = %kind, "runs are cancelled; trigger skipped");
            return TriggerResult::Skipped;
        }

        let started_at = SystemTime::now();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut report = RunReport {
            run_id: format!("run-{}-{}", run::unix_secs(started_at), seq),
            job: job.to_string(),
            trigger: kind,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Success,
            execution: None,
            bundle: None,
            phases: vec![RunPhase::Admitted],
            teardown_error: None,
        };
        info!(job, run_id = %report.run_id, trigger = %kind, "run admitted");

        self.provision_execute_teardown(&mut report).await;

        if !report.outcome.is_success() {
            report.bundle = self.collect_diagnostics(&report);
            if report.bundle.is_some() {
                report.phases.push(RunPhase::DiagnosticsCollected);
            }
        }

        permit.release();
        report.phases.push(RunPhase::SlotReleased);
        report.finished_at = SystemTime::now();

        if report.outcome.is_success() {
            info!(job, run_id = %report.run_id, elapsed = ?report.duration(), "run succeeded");
        } else {
            warn!(
                job,
                run_id = %report.run_id,
                outcome = %report.outcome,
                elapsed = ?report.duration(),
                bundle = ?report.bundle.as_ref().map(|b| &b.dir),
                "run failed"
            );
        }

        TriggerResult::Completed(Box::new(report))
    }

    /// Phases 1-3. Teardown runs whatever happens in between.
    async fn provision_execute_teardown(&self, report: &mut RunReport) {
        let handle = match self.provision() {
            Ok(handle) => {
                report.phases.push(RunPhase::CredentialsProvisioned);
                handle
            }
            Err(err) => {
                error!(run_id = %report.run_id, error = %err, "credential provisioning failed; task not started");
                report.phases.push(RunPhase::ProvisionFailed);
                report.outcome = RunOutcome::ProvisionFailed {
                    reason: err.to_string(),
                };
                // Partial material was removed when the failed provision
                // dropped its handle.
                report.phases.push(RunPhase::CredentialsTornDown);
                return;
            }
        };

        if self.is_cancelled() {
            info!(run_id = %report.run_id, "runs cancelled before the task started");
            report.outcome = RunOutcome::Cancelled;
            report.phases.push(RunPhase::Cancelled);
        } else {
            self.execute(&handle, report).await;
        }

        if let Err(err) = handle.teardown() {
            // Reported loudly, but the task's own result stands.
            error!(run_id = %report.run_id, error = %err, "credential teardown failed");
            report.teardown_error = Some(err.to_string());
        }
        report.phases.push(RunPhase::CredentialsTornDown);
    }

    async fn execute(&self, handle: &CredentialHandle, report: &mut RunReport) {
        let request = self.execution_request(handle);
        report.phases.push(RunPhase::Executing);
        match self.executor.run(&request).await {
            Ok(result) => {
                report.outcome = RunOutcome::from_execution(&result);
                report.execution = Some(result);
                report.phases.push(if result.cancelled {
                    RunPhase::Cancelled
                } else if result.timed_out {
                    RunPhase::TimedOut
                } else {
                    RunPhase::Completed
                });
            }
            Err(err) => {
                error!(run_id = %report.run_id, error = %err, "task could not be executed");
                report.outcome = RunOutcome::Failed { exit_code: None };
                report.phases.push(RunPhase::Completed);
            }
        }
    }

    fn provision(&self) -> Result<CredentialHandle> {
        let resolved = credentials::resolve_secrets(&self.secrets, &self.secret_lookup)?;
        credentials::provision(&resolved, &self.job.credential_dir)
    }

    fn execution_request(&self, handle: &CredentialHandle) -> ExecutionRequest {
        let mut env: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(handle.env().iter().cloned());

        // Secret values reach the task only through their handles.
        let mut env_remove = Vec::with_capacity(self.secrets.len() * 2);
        for spec in &self.secrets {
            env_remove.push(spec.name.clone());
            if spec.from_env != spec.name {
                env_remove.push(spec.from_env.clone());
            }
        }

        ExecutionRequest {
            cmd: self.job.cmd.clone(),
            working_dir: self.job.working_dir.clone(),
            env,
            env_remove,
            inherit_env: self.job.inherit_env,
            timeout: self.job.timeout,
            kill_grace: self.job.kill_grace,
            output_log: self.output_log.clone(),
            cancel: CancelSignal::new(self.cancel.subscribe()),
        }
    }

    fn collect_diagnostics(&self, report: &RunReport) -> Option<ArtifactBundle> {
        match self.collector.collect(&report.record(SystemTime::now())) {
            Ok(bundle) => Some(bundle),
            Err(err) => {
                error!(run_id = %report.run_id, error = %err, "collecting diagnostics failed");
                None
            }
        }
    }
}
