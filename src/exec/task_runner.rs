// src/exec/task_runner.rs

//! Single task process runner.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{Result, RunguardError};
use crate::exec::output::OutputCapture;
use crate::exec::{ExecutionRequest, ExecutionResult};

/// How long to keep reading output after the child is gone.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Run the task once.
///
/// Either the process exits on its own, or the timeout (or the request's
/// cancel signal) fires first and the process, with everything it spawned
/// on unix, is terminated and reaped before this returns.
pub async fn run_process(request: &ExecutionRequest) -> Result<ExecutionResult> {
    info!(
        cmd = %request.cmd,
        working_dir = ?request.working_dir,
        timeout = ?request.timeout,
        "starting task process"
    );

    let mut cmd = build_command(request);
    let started = Instant::now();

    let mut child = cmd
        .spawn()
        .map_err(|e| RunguardError::Spawn(format!("'{}': {}", request.cmd, e)))?;

    let pid = child.id();
    debug!(?pid, "task process spawned");

    let output = OutputCapture::attach(&mut child, request.output_log.as_deref());
    let mut cancel = request.cancel.clone();

    let result = tokio::select! {
        status_res = child.wait() => {
            let status = status_res?;
            let result = ExecutionResult {
                exit_code: status.code(),
                duration: started.elapsed(),
                timed_out: false,
                cancelled: false,
            };
            info!(
                exit_code = ?result.exit_code,
                success = status.success(),
                elapsed = ?result.duration,
                "task process exited"
            );
            result
        }

        _ = tokio::time::sleep(request.timeout) => {
            warn!(
                ?pid,
                timeout = ?request.timeout,
                "task exceeded its time limit; terminating"
            );
            terminate(&mut child, request.kill_grace).await;
            ExecutionResult {
                exit_code: None,
                duration: started.elapsed(),
                timed_out: true,
                cancelled: false,
            }
        }

        _ = cancel.cancelled() => {
            warn!(?pid, "shutdown requested; terminating task");
            terminate(&mut child, request.kill_grace).await;
            ExecutionResult {
                exit_code: None,
                duration: started.elapsed(),
                timed_out: false,
                cancelled: true,
            }
        }
    };

    output.finish(OUTPUT_DRAIN).await;
    Ok(result)
}

fn build_command(request: &ExecutionRequest) -> Command {
    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&request.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&request.cmd);
        c
    };

    cmd.current_dir(&request.working_dir);

    if !request.inherit_env {
        cmd.env_clear();
        // Keep a usable PATH so the shell can find the task.
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
    }
    for name in &request.env_remove {
        cmd.env_remove(name);
    }
    cmd.envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so termination reaches anything the task spawned.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Terminate the child: SIGTERM to its process group, then SIGKILL after
/// `grace`. The child is reaped before returning.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => debug!(pid, "task exited after SIGTERM"),
            Err(_) => debug!(pid, "task ignored SIGTERM; sending SIGKILL"),
        }
        // Leftover group members are killed either way.
        signal_group(pid, libc::SIGKILL);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after termination reported an error");
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill task process");
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    // SAFETY: kill(2) with a negative pid only sends a signal to the process
    // group; no memory is shared.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "signalling task process group failed"
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::CancelSignal;
    use std::path::PathBuf;
    use tokio::sync::watch;

    fn request(cmd: &str, dir: PathBuf, timeout: Duration) -> ExecutionRequest {
        ExecutionRequest {
            cmd: cmd.to_string(),
            working_dir: dir,
            env: Vec::new(),
            env_remove: Vec::new(),
            inherit_env: true,
            timeout,
            kill_grace: Duration::from_millis(200),
            output_log: None,
            cancel: CancelSignal::never(),
        }
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_process(&request("exit 0", dir.path().into(), Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(res.success());
        assert_eq!(res.exit_code, Some(0));
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_process(&request("exit 3", dir.path().into(), Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!res.success());
        assert_eq!(res.exit_code, Some(3));
        assert!(!res.timed_out);
    }

    #[tokio::test]
    async fn timeout_kills_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        // The background sleep records its pid so we can check it died too.
        let cmd = "sleep 30 & echo $! > bg.pid; wait";
        let res = run_process(&request(cmd, dir.path().into(), Duration::from_millis(300)))
            .await
            .unwrap();

        assert!(res.timed_out);
        assert!(!res.success());
        assert!(res.duration < Duration::from_secs(10));

        let pid: i32 = std::fs::read_to_string(dir.path().join("bg.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // Give the kernel a moment to reap the orphaned sleep via init.
        let mut alive = true;
        for _ in 0..50 {
            alive = PathBuf::from(format!("/proc/{pid}")).exists()
                && !std::fs::read_to_string(format!("/proc/{pid}/stat"))
                    .map(|s| s.contains(") Z "))
                    .unwrap_or(true);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background process {pid} survived the timeout");
    }

    #[tokio::test]
    async fn env_is_injected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(
            r#"test "$INJECTED" = "yes" && test -z "$HOME_SHOULD_GO""#,
            dir.path().into(),
            Duration::from_secs(5),
        );
        req.env.push(("INJECTED".into(), "yes".into()));
        req.env_remove.push("HOME_SHOULD_GO".into());
        let res = run_process(&req).await.unwrap();
        assert!(res.success());
    }

    #[tokio::test]
    async fn output_is_appended_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(
            "echo to-stdout; echo to-stderr >&2",
            dir.path().into(),
            Duration::from_secs(5),
        );
        req.output_log = Some(dir.path().join("task-output.log"));
        run_process(&req).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("task-output.log")).unwrap();
        assert!(log.contains("to-stdout"));
        assert!(log.contains("to-stderr"));
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_break_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = r#"printf '\377\376 raw\n'; sleep 0.3
            i=0
            while [ $i -lt 2000 ]; do echo "line $i"; i=$((i+1)); done
            exit 0"#;
        let mut req = request(cmd, dir.path().into(), Duration::from_secs(10));
        req.output_log = Some(dir.path().join("task-output.log"));

        let res = run_process(&req).await.unwrap();
        assert_eq!(res.exit_code, Some(0));
        assert!(res.success());

        let log = std::fs::read(dir.path().join("task-output.log")).unwrap();
        assert!(log.starts_with(b"\xff\xfe raw\n"));
        assert!(String::from_utf8_lossy(&log).contains("line 1999\n"));
    }

    #[tokio::test]
    async fn cancel_signal_terminates_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let mut req = request(
            "echo $$ > task.pid; sleep 30",
            dir.path().into(),
            Duration::from_secs(30),
        );
        req.cancel = CancelSignal::new(rx);

        let pid_file = dir.path().join("task.pid");
        let canceller = tokio::spawn(async move {
            while !pid_file.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tx.send_replace(true);
            tx
        });

        let res = run_process(&req).await.unwrap();
        let _tx = canceller.await.unwrap();

        assert!(res.cancelled);
        assert!(!res.timed_out);
        assert!(!res.success());
        assert!(res.duration < Duration::from_secs(10));

        let pid = std::fs::read_to_string(dir.path().join("task.pid")).unwrap();
        assert!(!PathBuf::from(format!("/proc/{}", pid.trim())).exists());
    }

    #[tokio::test]
    async fn missing_working_dir_is_a_spawn_error() {
        let res = run_process(&request(
            "true",
            PathBuf::from("/definitely/not/here"),
            Duration::from_secs(5),
        ))
        .await;
        assert!(matches!(res, Err(RunguardError::Spawn(_))));
    }
}
