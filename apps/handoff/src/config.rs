//! Configuration layering: command-line flags (and their `HANDOFF_*`
//! environment variables) over an optional TOML file over built-in defaults.

use crate::provision::inventory::DeploymentParams;
use crate::provision::provider::{ProviderReport, TerraformKeys};
use crate::provision::readiness::PollPolicy;
use crate::provision::runner::AnsibleRunnerConfig;
use crate::transport::ssh::SshProbeConfig;
use directories::ProjectDirs;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DEPLOY_USER: &str = "deploy";
pub const DEFAULT_ADMIN_USER: &str = "ubuntu";
pub const DEFAULT_TERRAFORM_PROGRAM: &str = "terraform";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// On-disk configuration. Every field is optional; flags fill or replace it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub work_dir: Option<PathBuf>,
    pub deploy: DeployTable,
    pub target: TargetTable,
    pub readiness: ReadinessTable,
    pub ssh: SshTable,
    pub runner: RunnerTable,
    pub terraform: TerraformTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployTable {
    pub deploy_user: Option<String>,
    pub domain: Option<String>,
    pub repository_url: Option<String>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetTable {
    pub admin_user: Option<String>,
    pub ssh_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessTable {
    pub max_attempts: Option<u32>,
    pub attempt_timeout_secs: Option<u64>,
    pub backoff_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshTable {
    pub binary: Option<String>,
    pub flags: Vec<String>,
    pub no_batch: Option<bool>,
    pub known_hosts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerTable {
    pub program: Option<String>,
    pub playbook: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub host_key_checking: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerraformTable {
    pub program: Option<String>,
    pub dir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub keys: Option<TerraformKeys>,
}

impl FileConfig {
    pub fn from_toml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.anchor_paths(base);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Relative paths in the file are relative to the file, not the cwd.
    fn anchor_paths(&mut self, base: &Path) {
        let anchor = |path: &mut Option<PathBuf>| {
            if let Some(inner) = path.as_mut() {
                if inner.is_relative() {
                    *inner = base.join(&*inner);
                }
            }
        };
        anchor(&mut self.work_dir);
        anchor(&mut self.target.ssh_key);
        anchor(&mut self.ssh.known_hosts);
        anchor(&mut self.runner.playbook);
        anchor(&mut self.terraform.dir);
        anchor(&mut self.terraform.output_file);
    }
}

/// Where `run` and `status` keep inventories, triggers and locks when nothing
/// else is configured.
pub fn default_work_dir() -> PathBuf {
    ProjectDirs::from("", "", "handoff")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".handoff"))
}

/// Where the resource descriptor comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerraformSource {
    None,
    OutputFile(PathBuf),
    Directory { program: String, dir: PathBuf },
}

/// Everything needed to describe the target resource.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub admin_user: String,
    pub ssh_key: Option<PathBuf>,
    pub terraform: TerraformSource,
    pub terraform_keys: TerraformKeys,
    /// Values given directly on the command line; they win over Terraform.
    pub overrides: ProviderReport,
}

impl TargetSettings {
    pub fn require_ssh_key(&self) -> Result<PathBuf, ConfigError> {
        self.ssh_key.clone().ok_or(ConfigError::Missing("ssh key"))
    }
}

/// Fully resolved settings for one `run`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub work_dir: PathBuf,
    pub target: TargetSettings,
    pub params: DeploymentParams,
    pub policy: PollPolicy,
    pub ssh: SshProbeConfig,
    pub runner: AnsibleRunnerConfig,
}

pub fn poll_policy(
    max_attempts: Option<u32>,
    attempt_timeout_secs: Option<u64>,
    backoff_secs: Option<u64>,
) -> Result<PollPolicy, ConfigError> {
    let defaults = PollPolicy::default();
    let policy = PollPolicy {
        max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
        per_attempt_timeout: attempt_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.per_attempt_timeout),
        backoff_interval: backoff_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.backoff_interval),
    };
    if policy.max_attempts == 0 {
        return Err(ConfigError::Invalid("max attempts must be at least 1".into()));
    }
    if policy.per_attempt_timeout.is_zero() {
        return Err(ConfigError::Invalid(
            "attempt timeout must be at least 1 second".into(),
        ));
    }
    Ok(policy)
}
