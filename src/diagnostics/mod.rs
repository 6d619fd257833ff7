// src/diagnostics/mod.rs

//! Failure diagnostics.
//!
//! After a failed Run, the task's working directory is scanned for files
//! matching the declared patterns (`*.log`, `*.txt` by default). Matches are
//! copied into a bundle directory named after the run id, next to a
//! `manifest.toml` describing the Run and each file's blake3 digest.
//!
//! Successful Runs produce nothing. Old bundles are removed by
//! [`retention::prune_expired`], which the scheduler calls between ticks.

pub mod bundle;
pub mod patterns;
pub mod retention;

pub use bundle::{ArtifactBundle, BundleFile, DiagnosticsCollector, RunRecord};
pub use patterns::{ArtifactPatterns, build_pattern_set};
pub use retention::prune_expired;

/// Name of the manifest file written into every bundle.
pub const MANIFEST_FILE: &str = "manifest.toml";
