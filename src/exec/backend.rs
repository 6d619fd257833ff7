// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The orchestrator talks to a `TaskExecutor` instead of spawning processes
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation in [`super::task_runner`].

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;

use super::task_runner::run_process;
use super::{ExecutionRequest, ExecutionResult};

/// Trait abstracting how the task is executed.
///
/// Production code uses [`ProcessExecutor`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait TaskExecutor: Send + Sync {
    /// Run the task to completion or timeout.
    ///
    /// `Err` means the task could not be started at all; a task that ran and
    /// failed is an `Ok` result with a non-zero exit code.
    fn run<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + 'a>>;
}

/// Real executor backend used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl TaskExecutor for ProcessExecutor {
    fn run<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + 'a>> {
        Box::pin(run_process(request))
    }
}
