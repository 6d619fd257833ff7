// src/lib.rs

pub mod cli;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod guard;
pub mod logging;
pub mod orchestrator;
pub mod schedule;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::engine::{Runtime, RuntimeEvent, TriggerHandle};
use crate::exec::{ProcessExecutor, TaskExecutor};
use crate::orchestrator::{Orchestrator, TriggerResult};
use crate::types::{SecretDelivery, TriggerKind};

/// How the harness should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Task succeeded, nothing to do, or a clean shutdown.
    Success,
    /// The task failed, timed out, or never got its credentials.
    TaskFailed,
    /// A stop signal cut a running task short.
    Interrupted,
}

impl RunExit {
    pub fn code(self) -> i32 {
        match self {
            RunExit::Success => 0,
            RunExit::TaskFailed => 1,
            RunExit::Interrupted => 130,
        }
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - orchestrator (guard, credentials, executor, diagnostics)
/// - the schedule and signal trigger sources
/// - stop signals (Ctrl-C, and SIGTERM on unix)
pub async fn run(args: CliArgs) -> Result<RunExit> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(RunExit::Success);
    }

    let orchestrator = Orchestrator::new(&cfg, ProcessExecutor::new())?;

    if args.prune {
        let removed = orchestrator.prune_artifacts(SystemTime::now())?;
        info!(count = removed.len(), "retention pruning complete");
        return Ok(RunExit::Success);
    }

    // Installed before any task starts, so a stop signal never kills the
    // harness while credential material is on disk.
    let signals = StopSignals::install().context("installing stop signal handlers")?;

    if args.once {
        return Ok(run_once(&orchestrator, signals).await);
    }

    run_daemon(&cfg, Arc::new(orchestrator), signals).await
}

/// A single manual Run, for `--once`.
///
/// Any stop signal cancels the Run; it still tears down and releases
/// before this returns.
async fn run_once<E: TaskExecutor>(orchestrator: &Orchestrator<E>, mut signals: StopSignals) -> RunExit {
    let run = orchestrator.trigger(TriggerKind::Manual);
    tokio::pin!(run);

    let mut interrupted = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            signal = signals.recv(), if !interrupted => {
                warn!(?signal, "stop requested; terminating the running task");
                orchestrator.cancel_runs();
                interrupted = true;
            }
        }
    };

    match result {
        _ if interrupted => RunExit::Interrupted,
        TriggerResult::Skipped => RunExit::Success,
        TriggerResult::Completed(report) if report.outcome.is_success() => RunExit::Success,
        TriggerResult::Completed(_) => RunExit::TaskFailed,
    }
}

/// Long-running mode: scheduled ticks plus on-demand triggers until stopped.
///
/// The first Ctrl-C stops admitting Runs and waits for the one in flight.
/// SIGTERM, or a second Ctrl-C, also cancels the in-flight Run.
async fn run_daemon<E: TaskExecutor + 'static>(
    cfg: &ConfigFile,
    orchestrator: Arc<Orchestrator<E>>,
    mut signals: StopSignals,
) -> Result<RunExit> {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let _schedule = crate::schedule::spawn_schedule(cfg.schedule, rt_tx.clone());
    let handle = TriggerHandle::new(rt_tx.clone());

    // SIGUSR1 → manual trigger.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let handle = handle.clone();
        match signal(SignalKind::user_defined1()) {
            Ok(mut sigusr1) => {
                tokio::spawn(async move {
                    while sigusr1.recv().await.is_some() {
                        info!("SIGUSR1 received; requesting manual run");
                        if handle.trigger_now().await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGUSR1; manual triggers disabled"),
        }
    }

    drop(rt_tx);

    let mut runtime = tokio::spawn(Runtime::new(Arc::clone(&orchestrator), rt_rx).run());
    let mut stopping = false;
    let mut interrupted = false;

    let summary = loop {
        tokio::select! {
            joined = &mut runtime => break joined.context("runtime task failed")?,
            signal = signals.recv(), if !interrupted => {
                if signal == StopSignal::Interrupt && !stopping {
                    info!("Ctrl-C received; finishing the in-flight run before exiting");
                } else {
                    warn!(?signal, "stop requested; terminating the in-flight run");
                    orchestrator.cancel_runs();
                    interrupted = true;
                }
                stopping = true;
                // Fails only if the runtime already stopped.
                let _ = handle.shutdown().await;
            }
        }
    };
    debug!(?summary, "daemon finished");

    Ok(if interrupted {
        RunExit::Interrupted
    } else {
        RunExit::Success
    })
}

/// Which stop signal arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// SIGTERM, as sent by service managers and CI cancellation.
    Terminate,
}

/// Listeners for the signals that stop the harness.
///
/// Creating it replaces the default "terminate the process" action, which
/// would otherwise skip credential teardown and orphan the task.
#[derive(Debug)]
pub struct StopSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl StopSignals {
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next stop signal.
    pub async fn recv(&mut self) -> StopSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => StopSignal::Interrupt,
                _ = self.terminate.recv() => StopSignal::Terminate,
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            StopSignal::Interrupt
        }
    }
}

/// Simple dry-run output: print the effective settings.
fn print_dry_run(cfg: &ConfigFile) {
    println!("runguard dry-run");
    println!("  job.name = {}", cfg.job.name);
    println!("  job.cmd = {}", cfg.job.cmd);
    println!("  job.working_dir = {}", cfg.job.working_dir.display());
    println!("  job.timeout = {:?}", cfg.job.timeout);
    println!("  job.triggered_while_busy = {:?}", cfg.job.triggered_while_busy);
    if let Some(ref log) = cfg.job.output_log {
        println!("  job.output_log = {}", log.display());
    }
    println!(
        "  schedule = every {:?}{}{}",
        cfg.schedule.every,
        if cfg.schedule.align { ", aligned" } else { "" },
        if cfg.schedule.run_on_start { ", run on start" } else { "" },
    );
    println!();

    println!("env ({}):", cfg.env.len());
    for (name, value) in cfg.env.iter() {
        println!("  - {name} = {value}");
    }

    println!("secrets ({}):", cfg.secrets.len());
    for secret in cfg.secrets.iter() {
        let delivery = match secret.delivery {
            SecretDelivery::Env => "env".to_string(),
            SecretDelivery::File => format!(
                "file {}",
                secret.file_name.as_deref().unwrap_or(&secret.name)
            ),
        };
        let required = if secret.required { "" } else { " (optional)" };
        println!("  - {} <- ${} via {delivery}{required}", secret.name, secret.from_env);
    }

    println!("diagnostics:");
    println!("  dir = {}", cfg.artifact_dir().display());
    println!("  patterns = {:?}", cfg.diagnostics.patterns);
    println!("  retention = {:?}", cfg.diagnostics.retention);

    debug!("dry-run complete (no execution)");
}
