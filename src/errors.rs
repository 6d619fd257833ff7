// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunguardError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    GlobError(#[from] globset::Error),

    /// A secret could not be resolved or written to its delivery form.
    #[error("Failed to provision credential '{name}': {reason}")]
    CredentialProvision { name: String, reason: String },

    /// Removing provisioned credential material failed.
    #[error("Failed to tear down credential material at {path:?}: {source}")]
    Teardown {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn task process: {0}")]
    Spawn(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunguardError>;
