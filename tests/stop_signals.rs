// tests/stop_signals.rs
//
// Stop signals sent to the runguard binary while a task is running.
#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

const SECRET_ENV: &str = "RUNGUARD_STOP_TEST_SA";

fn write_config(root: &Path, cmd: &str) -> std::io::Result<()> {
    fs::write(
        root.join("Runguard.toml"),
        format!(
            r#"
[job]
name = "stop-test"
cmd = "{cmd}"
credential_dir = "creds"
kill_grace = "200ms"

[schedule]
every = "1h"
run_on_start = true

[secret.SA_FILE]
from_env = "{SECRET_ENV}"
delivery = "file"
file_name = "sa.json"
"#
        ),
    )
}

fn spawn_runguard(root: &Path, extra_args: &[&str]) -> std::io::Result<Child> {
    Command::new(env!("CARGO_BIN_EXE_runguard"))
        .arg("--config")
        .arg(root.join("Runguard.toml"))
        .args(extra_args)
        .env(SECRET_ENV, r#"{"k":"secret"}"#)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

fn wait_for_file(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(contents) = fs::read_to_string(path) {
            if contents.ends_with('\n') {
                return contents;
            }
        }
        sleep(Duration::from_millis(20));
    }
    panic!("{} never appeared", path.display());
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    panic!("runguard did not exit after the stop signal");
}

fn send_signal(child: &Child, signal: libc::c_int) {
    // SAFETY: plain kill(2) on a child we spawned.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, signal) };
    assert_eq!(rc, 0, "kill failed: {}", std::io::Error::last_os_error());
}

fn credential_entries(root: &Path) -> usize {
    fs::read_dir(root.join("creds")).map(|rd| rd.count()).unwrap_or(0)
}

fn process_alive(pid: &str) -> bool {
    Path::new("/proc").join(pid.trim()).exists()
}

#[test]
fn sigterm_during_once_tears_down_and_kills_the_task() -> TestResult {
    let tmp = TempDir::new()?;
    write_config(tmp.path(), "echo $$ > task.pid; exec sleep 30")?;

    let mut runguard = spawn_runguard(tmp.path(), &["--once"])?;
    let pid = wait_for_file(&tmp.path().join("task.pid"));
    assert_eq!(credential_entries(tmp.path()), 1, "credentials provisioned for the run");

    send_signal(&runguard, libc::SIGTERM);
    let status = wait_for_exit(&mut runguard);

    assert_eq!(status.code(), Some(130));
    assert_eq!(credential_entries(tmp.path()), 0, "credential material left on disk");
    assert!(!process_alive(&pid), "task {} outlived the harness", pid.trim());
    Ok(())
}

#[test]
fn sigterm_during_daemon_run_tears_down_and_kills_the_task() -> TestResult {
    let tmp = TempDir::new()?;
    write_config(tmp.path(), "echo $$ > task.pid; exec sleep 30")?;

    let mut runguard = spawn_runguard(tmp.path(), &[])?;
    let pid = wait_for_file(&tmp.path().join("task.pid"));

    send_signal(&runguard, libc::SIGTERM);
    let status = wait_for_exit(&mut runguard);

    assert_eq!(status.code(), Some(130));
    assert_eq!(credential_entries(tmp.path()), 0);
    assert!(!process_alive(&pid));
    Ok(())
}

#[test]
fn ctrl_c_in_daemon_mode_lets_the_running_task_finish() -> TestResult {
    let tmp = TempDir::new()?;
    write_config(
        tmp.path(),
        "echo $$ > task.pid; sleep 1; echo done > finished.txt",
    )?;

    let mut runguard = spawn_runguard(tmp.path(), &[])?;
    wait_for_file(&tmp.path().join("task.pid"));

    send_signal(&runguard, libc::SIGINT);
    let status = wait_for_exit(&mut runguard);

    assert_eq!(status.code(), Some(0));
    assert_eq!(fs::read_to_string(tmp.path().join("finished.txt"))?, "done\n");
    assert_eq!(credential_entries(tmp.path()), 0);
    Ok(())
}
