// src/exec/mod.rs

//! Process execution layer.
//!
//! This module runs the task command as a child process with an injected
//! environment, bounded by a wall-clock timeout.
//!
//! - [`backend`] defines the [`TaskExecutor`] trait the orchestrator talks
//!   to, and [`ProcessExecutor`], the production implementation. Tests swap
//!   in a fake.
//! - [`task_runner`] spawns, waits for, and (on timeout or cancellation)
//!   terminates the child.
//! - [`output`] drains stdout/stderr into the log and an optional file.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;

pub mod backend;
pub mod output;
pub mod task_runner;

pub use backend::{ProcessExecutor, TaskExecutor};

/// Everything needed to run the task once.
#[derive(Clone)]
pub struct ExecutionRequest {
    /// Shell command line.
    pub cmd: String,
    pub working_dir: PathBuf,
    /// Variables set on the child (non-secret config plus credential
    /// handles).
    pub env: Vec<(String, String)>,
    /// Inherited variables that must not reach the child.
    pub env_remove: Vec<String>,
    pub inherit_env: bool,
    pub timeout: Duration,
    /// Time between the polite termination signal and the hard kill.
    pub kill_grace: Duration,
    pub output_log: Option<PathBuf>,
    /// Stops the task early when the harness is asked to shut down.
    pub cancel: CancelSignal,
}

impl std::fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may be secrets; only names are shown.
        let vars: Vec<_> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ExecutionRequest")
            .field("cmd", &self.cmd)
            .field("working_dir", &self.working_dir)
            .field("env", &vars)
            .field("env_remove", &self.env_remove)
            .field("inherit_env", &self.inherit_env)
            .field("timeout", &self.timeout)
            .field("output_log", &self.output_log)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// What the sandbox observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// `None` when the process died from a signal or was killed.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
    /// Terminated because of a [`CancelSignal`].
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

/// Receiving side of a cancellation flag. Once set, it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested. Never resolves if the sender
    /// is gone without cancelling.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
