// src/diagnostics/patterns.rs

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::errors::Result;

/// Build a GlobSet from simple string patterns.
///
/// `*` does not cross directory separators, so `*.log` only matches files
/// at the top of the working dir; use `**/*.log` to search deeper.
pub fn build_pattern_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = GlobBuilder::new(pat).literal_separator(true).build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Compiled artifact patterns rooted at the task's working directory.
#[derive(Clone)]
pub struct ArtifactPatterns {
    set: GlobSet,
    /// Directory never descended into (the artifact store itself).
    skip_dir: Option<PathBuf>,
}

impl fmt::Debug for ArtifactPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactPatterns")
            .field("patterns", &self.set.len())
            .field("skip_dir", &self.skip_dir)
            .finish()
    }
}

impl ArtifactPatterns {
    pub fn new(patterns: &[String], skip_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            set: build_pattern_set(patterns)?,
            skip_dir,
        })
    }

    /// Whether `rel_path` (forward slashes, relative to the root) matches.
    pub fn matches(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }

    /// Collect all regular files under `root` whose relative path matches.
    ///
    /// Symlinks are neither followed nor collected. Results are relative to
    /// `root` and sorted.
    pub fn collect_matching_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let skip = self.skip_dir.as_ref().map(|d| normalize(d));
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;

                if file_type.is_dir() {
                    if skip.as_ref().is_some_and(|s| normalize(&path) == *s) {
                        continue;
                    }
                    stack.push(path);
                } else if file_type.is_file() {
                    if let Ok(rel) = path.strip_prefix(root) {
                        let rel_str = rel.to_string_lossy().replace('\\', "/");
                        if self.matches(&rel_str) {
                            files.push(rel.to_path_buf());
                        }
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_does_not_cross_directories() {
        let set = ArtifactPatterns::new(&patterns(&["*.log", "*.txt"]), None).unwrap();
        assert!(set.matches("run.log"));
        assert!(set.matches("notes.txt"));
        assert!(!set.matches("logs/run.log"));
        assert!(!set.matches("report.json"));

        let deep = ArtifactPatterns::new(&patterns(&["**/*.log"]), None).unwrap();
        assert!(deep.matches("logs/run.log"));
        assert!(deep.matches("run.log"));
    }

    #[test]
    fn collects_matches_and_skips_artifact_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = root.path().join(".runguard/artifacts");
        fs::create_dir_all(store.join("run-1")).unwrap();
        fs::create_dir_all(root.path().join("logs")).unwrap();
        fs::write(root.path().join("task.log"), "a").unwrap();
        fs::write(root.path().join("errors.txt"), "b").unwrap();
        fs::write(root.path().join("data.csv"), "c").unwrap();
        fs::write(root.path().join("logs/deep.log"), "d").unwrap();
        fs::write(store.join("run-1/old.log"), "e").unwrap();

        let set =
            ArtifactPatterns::new(&patterns(&["**/*.log", "*.txt"]), Some(store.clone())).unwrap();
        let files = set.collect_matching_files(root.path()).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("errors.txt"),
                PathBuf::from("logs/deep.log"),
                PathBuf::from("task.log"),
            ]
        );
    }
}
