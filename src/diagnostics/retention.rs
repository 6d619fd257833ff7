// src/diagnostics/retention.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::diagnostics::MANIFEST_FILE;
use crate::errors::Result;

/// Delete bundles under `artifact_dir` older than `retention` at `now`.
///
/// Only directories containing a manifest are considered bundles; anything
/// else in the store is left alone. A missing store is not an error.
/// Returns the removed bundle directories.
pub fn prune_expired(
    artifact_dir: &Path,
    retention: Duration,
    now: SystemTime,
) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(artifact_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("reading artifact dir {:?}", artifact_dir))
                .into());
        }
    };

    let mut removed = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let manifest = path.join(MANIFEST_FILE);
        if !manifest.is_file() {
            continue;
        }

        let modified = fs::metadata(&manifest)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading mtime of {:?}", manifest))?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

        if age > retention {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(bundle = ?path, ?age, "expired bundle removed");
                    removed.push(path);
                }
                Err(e) => warn!(bundle = ?path, error = %e, "failed to remove expired bundle"),
            }
        }
    }

    if !removed.is_empty() {
        info!(count = removed.len(), dir = ?artifact_dir, "pruned expired diagnostics bundles");
    }
    Ok(removed)
}
