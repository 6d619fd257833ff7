// src/exec/output.rs

//! Draining of the child's stdout/stderr.
//!
//! Both pipes are always consumed until EOF so the child never blocks on a
//! full buffer or dies from a closed pipe. Lines are logged at debug level
//! (lossily decoded) and, when an output log is configured, appended to that
//! file byte for byte. Content is never interpreted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Background tasks reading one child's output.
#[derive(Debug)]
pub struct OutputCapture {
    pumps: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl OutputCapture {
    /// Take the child's pipes and start draining them.
    pub fn attach(child: &mut Child, output_log: Option<&Path>) -> Self {
        let (line_tx, writer) = match output_log {
            Some(path) => {
                let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
                (Some(tx), Some(tokio::spawn(write_lines(path.to_path_buf(), rx))))
            }
            None => (None, None),
        };

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump("stdout", stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump("stderr", stderr, line_tx.clone())));
        }

        Self { pumps, writer }
    }

    /// Wait up to `drain` for the remaining output, then abandon it.
    ///
    /// A grandchild that escaped termination can keep a pipe open forever;
    /// the bound keeps that from stalling the Run.
    pub async fn finish(self, drain: Duration) {
        let deadline = tokio::time::Instant::now() + drain;

        for pump in self.pumps {
            let abort = pump.abort_handle();
            if tokio::time::timeout_at(deadline, pump).await.is_err() {
                debug!("output pump still open after drain window; aborting");
                abort.abort();
            }
        }

        // The writer finishes once every pump has dropped its sender.
        if let Some(writer) = self.writer {
            let abort = writer.abort_handle();
            if tokio::time::timeout_at(deadline, writer).await.is_err() {
                abort.abort();
            }
        }
    }
}

async fn pump<R>(stream: &'static str, reader: R, mut line_tx: Option<mpsc::Sender<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = Vec::with_capacity(128);
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                debug!(
                    target: "runguard::task",
                    stream,
                    "{}",
                    String::from_utf8_lossy(trim_line_end(&line))
                );
                if let Some(ref tx) = line_tx {
                    if tx.send(line).await.is_err() {
                        // Writer gave up; keep reading so the pipe stays open.
                        line_tx = None;
                    }
                }
            }
            Err(e) => {
                debug!(stream, error = %e, "reading task output failed; discarding the rest");
                let _ = io::copy(&mut reader, &mut io::sink()).await;
                break;
            }
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

async fn write_lines(path: PathBuf, mut rx: mpsc::Receiver<Vec<u8>>) {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await;

    let mut file = match file {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(path = ?path, error = %e, "cannot open task output log; output will only be traced");
            None
        }
    };

    while let Some(line) = rx.recv().await {
        let Some(ref mut f) = file else { continue };
        let written = f.write_all(&line).await;
        if let Err(e) = written {
            warn!(path = ?path, error = %e, "writing task output log failed");
            file = None;
        }
    }

    if let Some(mut f) = file {
        let _ = f.flush().await;
    }
}
