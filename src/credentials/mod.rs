// src/credentials/mod.rs

//! Credential lifecycle: resolve secrets, materialize them for exactly one
//! Run, and destroy them afterwards.
//!
//! - [`resolve_secrets`] reads secret values from the harness environment
//!   (or any lookup function, for tests).
//! - [`provision`] turns the resolved values into a [`CredentialHandle`]:
//!   environment bindings for the child plus owner-only files inside a
//!   private per-run directory.
//! - [`CredentialHandle::teardown`] removes the material. If a handle is
//!   dropped without an explicit teardown (early return, panic), `Drop`
//!   performs it instead.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, error, info};

use crate::errors::{Result, RunguardError};
use crate::types::SecretDelivery;

/// Declared secret: where its value comes from and how the task gets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    /// Variable name the task reads.
    pub name: String,
    /// Harness environment variable holding the value.
    pub from_env: String,
    pub delivery: SecretDelivery,
    /// Set for file delivery only.
    pub file_name: Option<String>,
    pub required: bool,
}

/// Secret value. Never printed.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// A secret whose value has been looked up.
#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub spec: SecretSpec,
    pub value: SecretValue,
}

/// Look up every declared secret with `lookup`.
///
/// Missing optional secrets are skipped; a missing required secret is a
/// `CredentialProvision` error.
pub fn resolve_secrets<F>(specs: &[SecretSpec], lookup: F) -> Result<Vec<ResolvedSecret>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in specs {
        match lookup(&spec.from_env) {
            Some(value) if !value.is_empty() => resolved.push(ResolvedSecret {
                spec: spec.clone(),
                value: SecretValue::new(value),
            }),
            _ if spec.required => {
                return Err(RunguardError::CredentialProvision {
                    name: spec.name.clone(),
                    reason: format!("environment variable {} is not set", spec.from_env),
                });
            }
            _ => debug!(secret = %spec.name, "optional secret not set; skipping"),
        }
    }
    Ok(resolved)
}

/// Ephemeral credential material for one Run.
pub struct CredentialHandle {
    dir: Option<TempDir>,
    files: Vec<PathBuf>,
    env: Vec<(String, String)>,
    torn_down: bool,
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CredentialHandle")
            .field("dir", &self.dir.as_ref().map(|d| d.path()))
            .field("vars", &names)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl CredentialHandle {
    /// Variables to inject into the child: secret values for env delivery,
    /// file paths for file delivery.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Files written for this Run.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Private directory holding file-backed secrets, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    /// Remove all material. Consumes the handle so it runs at most once.
    pub fn teardown(mut self) -> Result<()> {
        self.teardown_inner()
    }

    fn teardown_inner(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        self.env.clear();

        let mut first_error = None;

        for path in self.files.drain(..) {
            if let Err(err) = remove_if_present(&path) {
                error!(path = ?path, error = %err, "failed to remove credential file");
                first_error.get_or_insert(RunguardError::Teardown { path, source: err });
            }
        }

        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    error!(path = ?path, error = %err, "failed to remove credential directory");
                    first_error.get_or_insert(RunguardError::Teardown { path, source: err });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("credentials torn down");
                Ok(())
            }
        }
    }
}

impl Drop for CredentialHandle {
    fn drop(&mut self) {
        if !self.torn_down {
            debug!("credential handle dropped without teardown; cleaning up");
            // Errors are already logged inside teardown_inner.
            let _ = self.teardown_inner();
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Materialize `secrets`, creating the private directory under `base_dir`.
///
/// On error, anything already written is removed before returning.
pub fn provision(secrets: &[ResolvedSecret], base_dir: &Path) -> Result<CredentialHandle> {
    let mut handle = CredentialHandle {
        dir: None,
        files: Vec::new(),
        env: Vec::with_capacity(secrets.len()),
        torn_down: false,
    };

    for secret in secrets {
        let spec = &secret.spec;
        match spec.delivery {
            SecretDelivery::Env => {
                handle
                    .env
                    .push((spec.name.clone(), secret.value.expose().to_string()));
            }
            SecretDelivery::File => {
                if handle.dir.is_none() {
                    handle.dir = Some(create_private_dir(base_dir).map_err(|e| {
                        RunguardError::CredentialProvision {
                            name: spec.name.clone(),
                            reason: format!("creating credential directory: {e}"),
                        }
                    })?);
                }
                let dir = handle.dir.as_ref().map(|d| d.path().to_path_buf()).unwrap_or_default();
                let file_name = spec.file_name.as_deref().unwrap_or(&spec.name);
                let path = dir.join(file_name);

                // Record before writing so a half-written file is still removed.
                handle.files.push(path.clone());
                write_owner_only(&path, secret.value.expose().as_bytes()).map_err(|e| {
                    RunguardError::CredentialProvision {
                        name: spec.name.clone(),
                        reason: format!("writing {:?}: {e}", path),
                    }
                })?;

                handle
                    .env
                    .push((spec.name.clone(), path.to_string_lossy().into_owned()));
            }
        }
        debug!(secret = %spec.name, delivery = ?spec.delivery, "secret provisioned");
    }

    info!(
        count = secrets.len(),
        dir = ?handle.dir(),
        "credentials provisioned"
    );
    Ok(handle)
}

fn create_private_dir(base_dir: &Path) -> io::Result<TempDir> {
    fs::create_dir_all(base_dir)?;
    let dir = tempfile::Builder::new()
        .prefix("runguard-cred-")
        .tempdir_in(base_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))?;
    }

    Ok(dir)
}

fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spec(name: &str, delivery: SecretDelivery, required: bool) -> SecretSpec {
        SecretSpec {
            name: name.to_string(),
            from_env: format!("SRC_{name}"),
            delivery,
            file_name: match delivery {
                SecretDelivery::File => Some(format!("{}.json", name.to_lowercase())),
                SecretDelivery::Env => None,
            },
            required,
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_required_secret_fails() {
        let specs = vec![spec("TOKEN", SecretDelivery::Env, true)];
        let err = resolve_secrets(&specs, lookup(&[])).unwrap_err();
        assert!(matches!(err, RunguardError::CredentialProvision { name, .. } if name == "TOKEN"));
    }

    #[test]
    fn missing_optional_secret_is_skipped() {
        let specs = vec![
            spec("TOKEN", SecretDelivery::Env, false),
            spec("SHEET", SecretDelivery::Env, true),
        ];
        let resolved = resolve_secrets(&specs, lookup(&[("SRC_SHEET", "abc")])).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].spec.name, "SHEET");
    }

    #[test]
    fn secret_value_debug_is_redacted() {
        let v = SecretValue::new("hunter2");
        assert!(!format!("{v:?}").contains("hunter2"));
    }

    #[test]
    fn file_secret_is_owner_only_and_removed_on_teardown() {
        let base = tempfile::tempdir().unwrap();
        let specs = vec![
            spec("SA", SecretDelivery::File, true),
            spec("TOKEN", SecretDelivery::Env, true),
        ];
        let resolved = resolve_secrets(
            &specs,
            lookup(&[("SRC_SA", r#"{"type":"service_account"}"#), ("SRC_TOKEN", "t0k")]),
        )
        .unwrap();

        let handle = provision(&resolved, base.path()).unwrap();
        let file = handle.files()[0].clone();
        let dir = handle.dir().unwrap().to_path_buf();

        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            r#"{"type":"service_account"}"#
        );
        let env: HashMap<_, _> = handle.env().iter().cloned().collect();
        assert_eq!(env["SA"], file.to_string_lossy());
        assert_eq!(env["TOKEN"], "t0k");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
            let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(dir_mode, 0o700);
        }

        handle.teardown().unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn dropping_handle_tears_down() {
        let base = tempfile::tempdir().unwrap();
        let specs = vec![spec("SA", SecretDelivery::File, true)];
        let resolved = resolve_secrets(&specs, lookup(&[("SRC_SA", "{}")])).unwrap();

        let handle = provision(&resolved, base.path()).unwrap();
        let dir = handle.dir().unwrap().to_path_buf();
        drop(handle);

        assert!(!dir.exists());
    }

    #[test]
    fn teardown_tolerates_material_already_gone() {
        let base = tempfile::tempdir().unwrap();
        let specs = vec![spec("SA", SecretDelivery::File, true)];
        let resolved = resolve_secrets(&specs, lookup(&[("SRC_SA", "{}")])).unwrap();

        let handle = provision(&resolved, base.path()).unwrap();
        fs::remove_dir_all(handle.dir().unwrap()).unwrap();
        assert!(handle.teardown().is_ok());
    }

    #[test]
    fn partial_provision_failure_leaves_nothing_behind() {
        let base = tempfile::tempdir().unwrap();
        // Two file secrets sharing a file name: the second create_new fails.
        let mut second = spec("SB", SecretDelivery::File, true);
        second.file_name = Some("sa.json".to_string());
        let specs = vec![spec("SA", SecretDelivery::File, true), second];
        let resolved =
            resolve_secrets(&specs, lookup(&[("SRC_SA", "a"), ("SRC_SB", "b")])).unwrap();

        let err = provision(&resolved, base.path()).unwrap_err();
        assert!(matches!(err, RunguardError::CredentialProvision { name, .. } if name == "SB"));
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }
}
