// src/diagnostics/bundle.rs

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use blake3::Hasher;
use serde::Serialize;
use tracing::{debug, info};

use crate::diagnostics::MANIFEST_FILE;
use crate::diagnostics::patterns::ArtifactPatterns;
use crate::errors::Result;
use crate::types::TriggerKind;

/// Facts about the failed Run, written into the bundle manifest.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub job: String,
    pub trigger: TriggerKind,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub started_at_unix: u64,
    pub finished_at_unix: u64,
}

/// One collected file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BundleFile {
    /// Path relative to both the working dir and the bundle dir.
    pub path: PathBuf,
    pub size: u64,
    pub blake3: String,
}

#[derive(Serialize)]
struct Manifest<'a> {
    run: &'a RunRecord,
    files: &'a [BundleFile],
}

/// Diagnostics saved for one failed Run.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub run_id: String,
    pub dir: PathBuf,
    pub files: Vec<BundleFile>,
}

impl ArtifactBundle {
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Copies matching task output into per-run bundles.
#[derive(Debug, Clone)]
pub struct DiagnosticsCollector {
    working_dir: PathBuf,
    artifact_dir: PathBuf,
    patterns: ArtifactPatterns,
}

impl DiagnosticsCollector {
    pub fn new(working_dir: PathBuf, artifact_dir: PathBuf, patterns: &[String]) -> Result<Self> {
        let patterns = ArtifactPatterns::new(patterns, Some(artifact_dir.clone()))?;
        Ok(Self {
            working_dir,
            artifact_dir,
            patterns,
        })
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Gather this Run's artifacts into `<artifact_dir>/<run_id>/`.
    ///
    /// A bundle is written even when nothing matched; its manifest alone
    /// records that the Run failed.
    pub fn collect(&self, run: &RunRecord) -> Result<ArtifactBundle> {
        let bundle_dir = self.artifact_dir.join(&run.run_id);
        fs::create_dir_all(&bundle_dir)
            .with_context(|| format!("creating bundle dir {:?}", bundle_dir))?;

        let matches = self.patterns.collect_matching_files(&self.working_dir)?;
        let mut files = Vec::with_capacity(matches.len());

        for rel in matches {
            let src = self.working_dir.join(&rel);
            let dst = bundle_dir.join(&rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating dir {:?}", parent))?;
            }
            let size = fs::copy(&src, &dst)
                .with_context(|| format!("copying artifact {:?} to {:?}", src, dst))?;
            let digest = compute_file_hash(&dst)?;
            debug!(run_id = %run.run_id, file = ?rel, size, "artifact collected");

            files.push(BundleFile {
                path: rel,
                size,
                blake3: digest,
            });
        }

        let manifest = toml::to_string(&Manifest {
            run,
            files: &files,
        })
        .context("serializing bundle manifest")?;
        fs::write(bundle_dir.join(MANIFEST_FILE), manifest)?;

        info!(
            run_id = %run.run_id,
            dir = ?bundle_dir,
            files = files.len(),
            "diagnostics bundle written"
        );

        Ok(ArtifactBundle {
            run_id: run.run_id.clone(),
            dir: bundle_dir,
            files,
        })
    }
}

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: &str) -> RunRecord {
        RunRecord {
            run_id: run_id.to_string(),
            job: "report".to_string(),
            trigger: TriggerKind::Scheduled,
            outcome: "failed".to_string(),
            exit_code: Some(1),
            timed_out: false,
            started_at_unix: 1_700_000_000,
            finished_at_unix: 1_700_000_042,
        }
    }

    #[test]
    fn bundle_contains_matches_and_manifest() {
        let wd = tempfile::tempdir().unwrap();
        fs::write(wd.path().join("task.log"), "hello world").unwrap();
        fs::write(wd.path().join("summary.txt"), "oops").unwrap();
        fs::write(wd.path().join("service-account.json"), "{}").unwrap();

        let store = wd.path().join(".runguard/artifacts");
        let collector = DiagnosticsCollector::new(
            wd.path().to_path_buf(),
            store.clone(),
            &["*.log".to_string(), "*.txt".to_string()],
        )
        .unwrap();

        let bundle = collector.collect(&record("run-1-1")).unwrap();
        assert_eq!(bundle.dir, store.join("run-1-1"));

        let names: Vec<_> = bundle.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            names,
            vec![PathBuf::from("summary.txt"), PathBuf::from("task.log")]
        );
        assert_eq!(
            fs::read_to_string(bundle.dir.join("task.log")).unwrap(),
            "hello world"
        );
        // blake3 of "hello world"
        let log = bundle.files.iter().find(|f| f.path == PathBuf::from("task.log")).unwrap();
        assert_eq!(
            log.blake3,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
        assert!(!bundle.dir.join("service-account.json").exists());

        let manifest = fs::read_to_string(bundle.manifest_path()).unwrap();
        assert!(manifest.contains("run_id = \"run-1-1\""));
        assert!(manifest.contains("exit_code = 1"));
        assert!(manifest.contains("trigger = \"scheduled\""));
    }

    #[test]
    fn empty_match_set_still_writes_manifest() {
        let wd = tempfile::tempdir().unwrap();
        let store = wd.path().join("bundles");
        let collector =
            DiagnosticsCollector::new(wd.path().to_path_buf(), store, &["*.log".to_string()])
                .unwrap();

        let bundle = collector.collect(&record("run-2-1")).unwrap();
        assert!(bundle.is_empty());
        assert!(bundle.manifest_path().exists());
    }
}
