use std::collections::BTreeMap;
use std::path::Path;

use runguard::config::{ConfigFile, RawConfigFile, SecretSection};
use runguard::types::{SecretDelivery, TriggeredWhileBusy};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts with no secrets and everything rooted in `root`: the task runs
/// there, bundles go to `<root>/.runguard/artifacts`, credential
/// directories are created under `<root>/.creds`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(cmd: &str, root: &Path) -> Self {
        let mut config = RawConfigFile::default();
        config.job.cmd = cmd.to_string();
        config.job.working_dir = Some(root.to_path_buf());
        config.job.credential_dir = Some(root.join(".creds"));
        config.job.kill_grace = "100ms".to_string();
        config.secret = BTreeMap::new();
        Self { config }
    }

    pub fn job_name(mut self, name: &str) -> Self {
        self.config.job.name = name.to_string();
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.config.job.timeout = timeout.to_string();
        self
    }

    pub fn queue(mut self, queue_length: usize) -> Self {
        self.config.job.triggered_while_busy = TriggeredWhileBusy::Queue;
        self.config.job.queue_length = queue_length;
        self
    }

    pub fn output_log(mut self, file: &str) -> Self {
        self.config.job.output_log = Some(file.into());
        self
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.config.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn env_secret(mut self, name: &str, from_env: &str) -> Self {
        self.config.secret.insert(
            name.to_string(),
            SecretSection {
                from_env: Some(from_env.to_string()),
                delivery: SecretDelivery::Env,
                file_name: None,
                required: true,
            },
        );
        self
    }

    pub fn file_secret(mut self, name: &str, from_env: &str, file_name: &str) -> Self {
        self.config.secret.insert(
            name.to_string(),
            SecretSection {
                from_env: Some(from_env.to_string()),
                delivery: SecretDelivery::File,
                file_name: Some(file_name.to_string()),
                required: true,
            },
        );
        self
    }

    pub fn patterns(mut self, patterns: &[&str]) -> Self {
        self.config.diagnostics.patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn retention(mut self, retention: &str) -> Self {
        self.config.diagnostics.retention = retention.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Lookup function over a fixed set of variables, for
/// `Orchestrator::with_secret_lookup`.
pub fn secret_lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
    let map: BTreeMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}
