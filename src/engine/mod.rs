// src/engine/mod.rs

//! Trigger runtime for runguard.
//!
//! This module ties together:
//! - the trigger sources (schedule ticks, SIGUSR1, [`TriggerHandle`])
//! - the orchestrator that admits and executes Runs
//! - shutdown signals
//!
//! Every trigger is handed to the orchestrator on its own Tokio task, so
//! overlapping triggers really do compete for the job's slot. The event loop
//! itself never serializes Runs.

use tokio::sync::mpsc;

use crate::errors::{Result, RunguardError};
use crate::types::TriggerKind;

pub mod runtime;

pub use runtime::{Runtime, RuntimeSummary};

/// Events flowing into the runtime from trigger sources.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A Run should be requested.
    Triggered { kind: TriggerKind },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Cloneable handle for requesting Runs from outside the runtime.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl TriggerHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    /// On-demand trigger.
    pub async fn trigger_now(&self) -> Result<()> {
        self.send(RuntimeEvent::Triggered {
            kind: TriggerKind::Manual,
        })
        .await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RunguardError::Other(anyhow::anyhow!("runtime is no longer running")))
    }
}
