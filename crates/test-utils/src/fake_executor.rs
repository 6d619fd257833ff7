use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use runguard::errors::{Result, RunguardError};
use runguard::exec::{ExecutionRequest, ExecutionResult, TaskExecutor};

/// How one fake run ends.
#[derive(Debug, Clone)]
pub enum FakeBehaviour {
    /// Return immediately with this exit code.
    Exit(i32),
    /// Wait for `release` to be notified, then exit with the code. Ends
    /// early if the run is cancelled.
    Hold(Arc<Notify>, i32),
    /// Never finish on its own; report a timeout once the request's timeout
    /// elapses, or a cancellation if that comes first.
    Hang,
    /// Fail to start.
    SpawnError,
    /// Panic inside the executor.
    Panic,
}

/// What the fake saw for one run.
#[derive(Debug, Clone)]
pub struct ObservedRun {
    pub env: BTreeMap<String, String>,
    pub env_remove: Vec<String>,
    /// Env values that were absolute paths, and whether they existed while
    /// the task "ran".
    pub paths: Vec<(PathBuf, bool)>,
}

/// A fake executor that:
/// - plays back scripted behaviours (then falls back to a default)
/// - records the environment of every run
/// - tracks how many runs are executing at once
/// - optionally writes output files into the working dir, like a task would
pub struct FakeExecutor {
    script: Mutex<VecDeque<FakeBehaviour>>,
    default: FakeBehaviour,
    files: Vec<(String, String)>,
    observed: Arc<Mutex<Vec<ObservedRun>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    started: Arc<Notify>,
}

impl FakeExecutor {
    pub fn new(default: FakeBehaviour) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            files: Vec::new(),
            observed: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(Notify::new()),
        }
    }

    /// Queue a behaviour for the next run.
    pub fn then(self, behaviour: FakeBehaviour) -> Self {
        self.script.lock().unwrap().push_back(behaviour);
        self
    }

    /// Write `contents` to `name` in the working dir on every run.
    pub fn writes_file(mut self, name: &str, contents: &str) -> Self {
        self.files.push((name.to_string(), contents.to_string()));
        self
    }

    pub fn observed(&self) -> Vec<ObservedRun> {
        self.observed.lock().unwrap().clone()
    }

    pub fn runs(&self) -> usize {
        self.observed.lock().unwrap().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once the next run has started.
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }

    fn next_behaviour(&self) -> FakeBehaviour {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }

    fn observe(&self, request: &ExecutionRequest) {
        let env: BTreeMap<String, String> = request.env.iter().cloned().collect();
        let paths = env
            .values()
            .map(Path::new)
            .filter(|p| p.is_absolute())
            .map(|p| (p.to_path_buf(), p.exists()))
            .collect();
        self.observed.lock().unwrap().push(ObservedRun {
            env,
            env_remove: request.env_remove.clone(),
            paths,
        });
    }
}

/// Decrements the active counter when a run ends, even by panic.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskExecutor for FakeExecutor {
    fn run<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionResult>> + Send + 'a>> {
        Box::pin(async move {
            let behaviour = self.next_behaviour();
            if matches!(behaviour, FakeBehaviour::SpawnError) {
                return Err(RunguardError::Spawn("fake spawn failure".to_string()));
            }

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _active = ActiveGuard(Arc::clone(&self.active));

            self.observe(request);
            for (name, contents) in &self.files {
                std::fs::write(request.working_dir.join(name), contents)?;
            }
            self.started.notify_one();

            let started = tokio::time::Instant::now();
            let mut cancel = request.cancel.clone();
            let (exit_code, timed_out, cancelled) = match behaviour {
                FakeBehaviour::Exit(code) => (Some(code), false, false),
                FakeBehaviour::Hold(release, code) => tokio::select! {
                    _ = release.notified() => (Some(code), false, false),
                    _ = cancel.cancelled() => (None, false, true),
                },
                FakeBehaviour::Hang => tokio::select! {
                    _ = tokio::time::sleep(request.timeout) => (None, true, false),
                    _ = cancel.cancelled() => (None, false, true),
                },
                FakeBehaviour::Panic => panic!("fake executor panic"),
                FakeBehaviour::SpawnError => unreachable!("handled above"),
            };

            // Give overlapping triggers a chance to observe the busy slot.
            tokio::task::yield_now().await;

            Ok(ExecutionResult {
                exit_code,
                duration: started.elapsed().max(Duration::from_millis(1)),
                timed_out,
                cancelled,
            })
        })
    }
}
