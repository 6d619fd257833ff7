// src/config/validate.rs

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::config::model::{ConfigFile, DiagnosticsSettings, JobSettings, RawConfigFile};
use crate::credentials::SecretSpec;
use crate::diagnostics::build_pattern_set;
use crate::errors::{Result, RunguardError};
use crate::schedule::Schedule;
use crate::types::{SecretDelivery, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RunguardError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_job(&raw)?;
        validate_env(&raw)?;

        let job = JobSettings {
            name: raw.job.name.trim().to_string(),
            cmd: raw.job.cmd.clone(),
            working_dir: raw.job.working_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            timeout: positive_duration("[job].timeout", &raw.job.timeout)?,
            kill_grace: parse_duration(&raw.job.kill_grace)
                .map_err(|e| RunguardError::ConfigError(format!("[job].kill_grace: {e}")))?,
            credential_dir: raw
                .job
                .credential_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            triggered_while_busy: raw.job.triggered_while_busy,
            queue_length: raw.job.queue_length,
            output_log: raw.job.output_log.clone(),
            inherit_env: raw.job.inherit_env,
        };

        let schedule = Schedule {
            every: positive_duration("[schedule].every", &raw.schedule.every)?,
            align: raw.schedule.align,
            run_on_start: raw.schedule.run_on_start,
        };

        let secrets = build_secret_specs(&raw)?;

        // Compile once here so a bad pattern fails at load time, not on the
        // first failed run.
        build_pattern_set(&raw.diagnostics.patterns)?;
        let diagnostics = DiagnosticsSettings {
            dir: raw.diagnostics.dir.clone(),
            patterns: raw.diagnostics.patterns.clone(),
            retention: positive_duration("[diagnostics].retention", &raw.diagnostics.retention)?,
        };

        Ok(ConfigFile {
            job,
            schedule,
            env: raw.env,
            secrets,
            diagnostics,
        })
    }
}

fn var_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn validate_job(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.cmd.trim().is_empty() {
        return Err(RunguardError::ConfigError(
            "[job].cmd must be set to the task command".to_string(),
        ));
    }
    if cfg.job.name.trim().is_empty() {
        return Err(RunguardError::ConfigError(
            "[job].name must not be empty".to_string(),
        ));
    }
    if cfg.job.queue_length == 0 {
        return Err(RunguardError::ConfigError(
            "[job].queue_length must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(ref log) = cfg.job.output_log {
        if !is_plain_relative(log) {
            return Err(RunguardError::ConfigError(format!(
                "[job].output_log must be a relative path inside the working dir (got {:?})",
                log
            )));
        }
    }
    Ok(())
}

fn validate_env(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.env.keys() {
        if !var_name_regex().is_match(name) {
            return Err(RunguardError::ConfigError(format!(
                "[env] has invalid variable name '{}'",
                name
            )));
        }
        if cfg.secret.contains_key(name) {
            return Err(RunguardError::ConfigError(format!(
                "variable '{}' is declared both in [env] and as a secret",
                name
            )));
        }
    }
    Ok(())
}

fn build_secret_specs(cfg: &RawConfigFile) -> Result<Vec<SecretSpec>> {
    let mut specs = Vec::with_capacity(cfg.secret.len());
    let mut file_names: BTreeMap<String, &str> = BTreeMap::new();

    for (name, section) in cfg.secret.iter() {
        if !var_name_regex().is_match(name) {
            return Err(RunguardError::ConfigError(format!(
                "secret '{}' is not a valid variable name",
                name
            )));
        }

        let from_env = section.from_env.clone().unwrap_or_else(|| name.clone());
        if !var_name_regex().is_match(&from_env) {
            return Err(RunguardError::ConfigError(format!(
                "secret '{}' has invalid from_env '{}'",
                name, from_env
            )));
        }

        let file_name = match section.delivery {
            SecretDelivery::Env => {
                if section.file_name.is_some() {
                    return Err(RunguardError::ConfigError(format!(
                        "secret '{}' sets file_name but uses env delivery",
                        name
                    )));
                }
                None
            }
            SecretDelivery::File => {
                let file_name = section.file_name.clone().unwrap_or_else(|| name.clone());
                if !is_single_file_name(&file_name) {
                    return Err(RunguardError::ConfigError(format!(
                        "secret '{}' file_name must be a plain file name (got '{}')",
                        name, file_name
                    )));
                }
                // All file secrets of a Run share one directory.
                if let Some(other) = file_names.insert(file_name.clone(), name.as_str()) {
                    return Err(RunguardError::ConfigError(format!(
                        "secrets '{}' and '{}' both use file_name '{}'",
                        other, name, file_name
                    )));
                }
                Some(file_name)
            }
        };

        specs.push(SecretSpec {
            name: name.clone(),
            from_env,
            delivery: section.delivery,
            file_name,
            required: section.required,
        });
    }

    Ok(specs)
}

fn positive_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = parse_duration(value)
        .map_err(|e| RunguardError::ConfigError(format!("{field}: {e}")))?;
    if duration.is_zero() {
        return Err(RunguardError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(duration)
}

fn is_single_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}
