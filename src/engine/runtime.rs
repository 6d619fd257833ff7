// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::exec::TaskExecutor;
use crate::orchestrator::{Orchestrator, TriggerResult};

use super::RuntimeEvent;

/// Counters reported when the runtime stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSummary {
    pub triggers: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RuntimeSummary {
    fn record(&mut self, result: &TriggerResult) {
        match result {
            TriggerResult::Skipped => self.skipped += 1,
            TriggerResult::Completed(report) if report.outcome.is_success() => self.succeeded += 1,
            TriggerResult::Completed(_) => self.failed += 1,
        }
    }
}

/// Feeds trigger events to the orchestrator.
///
/// This is a thin IO shell: admission, ordering and cleanup all live in
/// [`Orchestrator::trigger`].
pub struct Runtime<E: TaskExecutor + 'static> {
    orchestrator: Arc<Orchestrator<E>>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    in_flight: JoinSet<TriggerResult>,
    summary: RuntimeSummary,
    prune_artifacts: bool,
}

impl<E: TaskExecutor + 'static> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .field("in_flight", &self.in_flight.len())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl<E: TaskExecutor + 'static> Runtime<E> {
    pub fn new(orchestrator: Arc<Orchestrator<E>>, event_rx: mpsc::Receiver<RuntimeEvent>) -> Self {
        Self {
            orchestrator,
            event_rx,
            in_flight: JoinSet::new(),
            summary: RuntimeSummary::default(),
            prune_artifacts: true,
        }
    }

    /// Disable retention pruning before each trigger.
    pub fn without_pruning(mut self) -> Self {
        self.prune_artifacts = false;
        self
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Spawns one orchestrator call per trigger.
    /// - On shutdown (or when every sender is gone) stops accepting
    ///   triggers and waits for in-flight Runs to finish.
    pub async fn run(mut self) -> RuntimeSummary {
        info!(job = %self.orchestrator.job_name(), "runguard runtime started");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(RuntimeEvent::Triggered { kind }) => self.dispatch(kind),
                        Some(RuntimeEvent::ShutdownRequested) => {
                            info!("shutdown requested; no new runs will be admitted");
                            break;
                        }
                        None => {
                            info!("runtime event channel closed; exiting");
                            break;
                        }
                    }
                }

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        if !self.in_flight.is_empty() {
            info!(in_flight = self.in_flight.len(), "waiting for running tasks to finish");
        }
        while let Some(joined) = self.in_flight.join_next().await {
            self.reap(joined);
        }

        info!(summary = ?self.summary, "runtime exiting");
        self.summary
    }

    fn dispatch(&mut self, kind: crate::types::TriggerKind) {
        self.summary.triggers += 1;
        debug!(trigger = %kind, "trigger received");

        if self.prune_artifacts {
            if let Err(e) = self.orchestrator.prune_artifacts(SystemTime::now()) {
                warn!(error = %e, "pruning expired diagnostics failed");
            }
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        self.in_flight
            .spawn(async move { orchestrator.trigger(kind).await });
    }

    fn reap(&mut self, joined: Result<TriggerResult, tokio::task::JoinError>) {
        match joined {
            Ok(result) => self.summary.record(&result),
            Err(e) => {
                // The slot permit and credential handle were dropped during
                // unwinding, so the job is free again.
                warn!(error = %e, "run task panicked or was cancelled");
                self.summary.failed += 1;
            }
        }
    }
}
