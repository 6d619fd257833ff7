// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::SecretSpec;
use crate::schedule::Schedule;
use crate::types::{SecretDelivery, TriggeredWhileBusy};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [job]
/// name = "meta-ads-report"
/// cmd = "python meta_ads_reporter.py"
/// timeout = "10m"
///
/// [schedule]
/// every = "1h"
///
/// [secret.GOOGLE_APPLICATION_CREDENTIALS]
/// from_env = "GCP_SA_KEY"
/// delivery = "file"
/// file_name = "service-account.json"
///
/// [diagnostics]
/// patterns = ["*.log", "*.txt"]
/// retention = "7d"
/// ```
///
/// Only `job.cmd` is mandatory; everything else has a default. This is the
/// unvalidated form; convert it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub schedule: ScheduleSection,

    /// Non-secret variables passed to the task verbatim.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Secrets keyed by the variable name the task reads.
    ///
    /// When the table is absent, the reporting task's three secrets are
    /// used (see [`default_secrets`]).
    #[serde(default = "default_secrets")]
    pub secret: BTreeMap<String, SecretSection>,

    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
}

impl Default for RawConfigFile {
    fn default() -> Self {
        Self {
            job: JobSection::default(),
            schedule: ScheduleSection::default(),
            env: BTreeMap::new(),
            secret: default_secrets(),
            diagnostics: DiagnosticsSection::default(),
        }
    }
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    /// Name of the concurrency domain.
    #[serde(default = "default_job_name")]
    pub name: String,

    /// Shell command that runs the task.
    #[serde(default)]
    pub cmd: String,

    /// Directory the task runs in. Relative paths resolve against the
    /// directory containing the config file.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Wall-clock bound, e.g. `"10m"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Time between SIGTERM and SIGKILL when the timeout fires.
    #[serde(default = "default_kill_grace")]
    pub kill_grace: String,

    /// Parent directory for the per-run credential directory. Defaults to
    /// the system temp dir.
    #[serde(default)]
    pub credential_dir: Option<PathBuf>,

    /// `"skip"` (default) or `"queue"`.
    #[serde(default)]
    pub triggered_while_busy: TriggeredWhileBusy,

    /// Maximum number of triggers waiting for the slot under `"queue"`.
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// File (relative to the working dir) that receives the task's
    /// stdout/stderr.
    #[serde(default)]
    pub output_log: Option<PathBuf>,

    /// Whether the child inherits the harness environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            cmd: String::new(),
            working_dir: None,
            timeout: default_timeout(),
            kill_grace: default_kill_grace(),
            credential_dir: None,
            triggered_while_busy: TriggeredWhileBusy::default(),
            queue_length: default_queue_length(),
            output_log: None,
            inherit_env: true,
        }
    }
}

/// `[schedule]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    /// Interval between scheduled triggers, e.g. `"1h"`.
    #[serde(default = "default_every")]
    pub every: String,

    /// Fire on multiples of `every` since the unix epoch ("on the hour").
    #[serde(default = "default_true")]
    pub align: bool,

    /// Fire one scheduled trigger immediately at startup.
    #[serde(default)]
    pub run_on_start: bool,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            every: default_every(),
            align: true,
            run_on_start: false,
        }
    }
}

/// `[secret.<NAME>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecretSection {
    /// Harness environment variable holding the value. Defaults to the
    /// secret's own name.
    #[serde(default)]
    pub from_env: Option<String>,

    #[serde(default)]
    pub delivery: SecretDelivery,

    /// File name inside the private credential directory (`delivery =
    /// "file"` only). Defaults to `<NAME>`.
    #[serde(default)]
    pub file_name: Option<String>,

    /// When false, an unset source variable is skipped instead of failing
    /// the Run.
    #[serde(default = "default_true")]
    pub required: bool,
}

/// `[diagnostics]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsSection {
    /// Where bundles are written. Relative paths resolve against the
    /// working dir.
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    #[serde(default = "default_retention")]
    pub retention: String,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            patterns: default_patterns(),
            retention: default_retention(),
        }
    }
}

fn default_job_name() -> String {
    "report".to_string()
}

fn default_timeout() -> String {
    "10m".to_string()
}

fn default_kill_grace() -> String {
    "5s".to_string()
}

fn default_queue_length() -> usize {
    1
}

fn default_every() -> String {
    "1h".to_string()
}

fn default_true() -> bool {
    true
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".runguard/artifacts")
}

fn default_patterns() -> Vec<String> {
    vec!["*.log".to_string(), "*.txt".to_string()]
}

fn default_retention() -> String {
    "7d".to_string()
}

/// Secrets consumed by the hourly ads reporting task.
pub fn default_secrets() -> BTreeMap<String, SecretSection> {
    let mut secrets = BTreeMap::new();
    secrets.insert(
        "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        SecretSection {
            from_env: Some("GCP_SA_KEY".to_string()),
            delivery: SecretDelivery::File,
            file_name: Some("service-account.json".to_string()),
            required: true,
        },
    );
    secrets.insert(
        "META_ACCESS_TOKEN".to_string(),
        SecretSection {
            from_env: None,
            delivery: SecretDelivery::Env,
            file_name: None,
            required: true,
        },
    );
    secrets.insert(
        "SPREADSHEET_ID".to_string(),
        SecretSection {
            from_env: None,
            delivery: SecretDelivery::Env,
            file_name: None,
            required: true,
        },
    );
    secrets
}

/// Validated job settings.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub name: String,
    pub cmd: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub credential_dir: PathBuf,
    pub triggered_while_busy: TriggeredWhileBusy,
    pub queue_length: usize,
    pub output_log: Option<PathBuf>,
    pub inherit_env: bool,
}

/// Validated diagnostics settings.
#[derive(Debug, Clone)]
pub struct DiagnosticsSettings {
    pub dir: PathBuf,
    pub patterns: Vec<String>,
    pub retention: Duration,
}

/// Validated configuration. Build it from a [`RawConfigFile`] with
/// `ConfigFile::try_from`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub job: JobSettings,
    pub schedule: Schedule,
    pub env: BTreeMap<String, String>,
    pub secrets: Vec<SecretSpec>,
    pub diagnostics: DiagnosticsSettings,
}

impl ConfigFile {
    /// Resolve relative working and credential dirs against `base` (usually
    /// the config file's directory).
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        if self.job.working_dir.is_relative() {
            self.job.working_dir = base.join(&self.job.working_dir);
        }
        if self.job.credential_dir.is_relative() {
            self.job.credential_dir = base.join(&self.job.credential_dir);
        }
        self
    }

    /// Effective artifact root: `diagnostics.dir`, relative to the working
    /// dir unless absolute.
    pub fn artifact_dir(&self) -> PathBuf {
        if self.diagnostics.dir.is_absolute() {
            self.diagnostics.dir.clone()
        } else {
            self.job.working_dir.join(&self.diagnostics.dir)
        }
    }

    /// Effective task output file, if configured.
    pub fn output_log_path(&self) -> Option<PathBuf> {
        self.job
            .output_log
            .as_ref()
            .map(|p| self.job.working_dir.join(p))
    }
}
