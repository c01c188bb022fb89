use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use std::path::PathBuf;

use crate::config::{
    ConfigError, DEFAULT_ADMIN_USER, DEFAULT_DEPLOY_USER, DEFAULT_TERRAFORM_PROGRAM, FileConfig,
    RunSettings, TargetSettings, TerraformSource, default_work_dir, poll_policy,
};
use crate::provision::inventory::DeploymentParams;
use crate::provision::provider::ProviderReport;
use crate::provision::runner::AnsibleRunnerConfig;
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::transport::ssh::SshProbeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "handoff",
    about = "Wait for a freshly provisioned host and hand it to Ansible",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "HANDOFF_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "HANDOFF_LOG_FILE",
        help = "Also write logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render the inventory, wait for SSH, then run the playbook unless it
    /// already ran for this generation and inventory
    Run(RunArgs),
    /// Print the inventory that `run` would hand off, without contacting the host
    Render(RenderArgs),
    /// Show the last applied trigger for a resource
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    #[arg(
        long,
        env = "HANDOFF_CONFIG",
        value_name = "PATH",
        help = "TOML config file; flags and environment override its values"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "work-dir",
        env = "HANDOFF_WORK_DIR",
        value_name = "DIR",
        help = "Directory holding inventories, trigger records and locks"
    )]
    pub work_dir: Option<PathBuf>,
}

impl SourceArgs {
    pub fn load_file(&self) -> Result<FileConfig, ConfigError> {
        FileConfig::load_optional(self.config.as_deref())
    }

    pub fn work_dir(&self, file: &FileConfig) -> PathBuf {
        self.work_dir
            .clone()
            .or_else(|| file.work_dir.clone())
            .unwrap_or_else(default_work_dir)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    #[arg(long = "resource-id", env = "HANDOFF_RESOURCE_ID", value_name = "ID")]
    pub resource_id: Option<String>,

    #[arg(
        long = "address",
        env = "HANDOFF_ADDRESS",
        value_name = "HOST",
        help = "Public address used for SSH and the inventory"
    )]
    pub public_address: Option<String>,

    #[arg(long = "private-address", env = "HANDOFF_PRIVATE_ADDRESS", value_name = "HOST")]
    pub private_address: Option<String>,

    #[arg(
        long,
        env = "HANDOFF_GENERATION",
        value_name = "TOKEN",
        help = "Replacement token for the resource; defaults to the resource id"
    )]
    pub generation: Option<String>,

    #[arg(long = "admin-user", env = "HANDOFF_ADMIN_USER", value_name = "USER")]
    pub admin_user: Option<String>,

    #[arg(long = "ssh-key", env = "HANDOFF_SSH_KEY", value_name = "PATH")]
    pub ssh_key: Option<PathBuf>,

    #[arg(
        long = "terraform-output",
        env = "HANDOFF_TERRAFORM_OUTPUT",
        value_name = "PATH",
        conflicts_with = "terraform_dir",
        help = "Saved `terraform output -json` document"
    )]
    pub terraform_output: Option<PathBuf>,

    #[arg(
        long = "terraform-dir",
        env = "HANDOFF_TERRAFORM_DIR",
        value_name = "DIR",
        help = "Terraform working directory to read outputs from"
    )]
    pub terraform_dir: Option<PathBuf>,

    #[arg(long = "terraform-bin", env = "HANDOFF_TERRAFORM_BIN", value_name = "PATH")]
    pub terraform_bin: Option<String>,
}

impl TargetArgs {
    pub fn resolve(&self, file: &FileConfig) -> TargetSettings {
        let program = self
            .terraform_bin
            .clone()
            .or_else(|| file.terraform.program.clone())
            .unwrap_or_else(|| DEFAULT_TERRAFORM_PROGRAM.to_string());
        // A flag of either kind replaces both file settings.
        let terraform = match (&self.terraform_output, &self.terraform_dir) {
            (Some(path), _) => TerraformSource::OutputFile(path.clone()),
            (None, Some(dir)) => TerraformSource::Directory {
                program,
                dir: dir.clone(),
            },
            (None, None) => match (&file.terraform.output_file, &file.terraform.dir) {
                (Some(path), _) => TerraformSource::OutputFile(path.clone()),
                (None, Some(dir)) => TerraformSource::Directory {
                    program,
                    dir: dir.clone(),
                },
                (None, None) => TerraformSource::None,
            },
        };

        TargetSettings {
            admin_user: self
                .admin_user
                .clone()
                .or_else(|| file.target.admin_user.clone())
                .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string()),
            ssh_key: self.ssh_key.clone().or_else(|| file.target.ssh_key.clone()),
            terraform,
            terraform_keys: file.terraform.keys.clone().unwrap_or_default(),
            overrides: ProviderReport {
                resource_id: self.resource_id.clone(),
                public_address: self.public_address.clone(),
                private_address: self.private_address.clone(),
                generation: self.generation.clone(),
            },
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    #[arg(long = "deploy-user", env = "HANDOFF_DEPLOY_USER", value_name = "USER")]
    pub deploy_user: Option<String>,

    #[arg(long, env = "HANDOFF_DOMAIN", value_name = "DOMAIN")]
    pub domain: Option<String>,

    #[arg(long = "repository-url", env = "HANDOFF_REPOSITORY_URL", value_name = "URL")]
    pub repository_url: Option<String>,

    #[arg(
        long = "working-directory",
        env = "HANDOFF_WORKING_DIRECTORY",
        value_name = "PATH",
        help = "Application directory on the host; defaults to /home/<deploy-user>/app"
    )]
    pub working_directory: Option<String>,
}

impl DeployArgs {
    pub fn resolve(&self, file: &FileConfig) -> DeploymentParams {
        let deploy = &file.deploy;
        DeploymentParams {
            deploy_user: Some(
                self.deploy_user
                    .clone()
                    .or_else(|| deploy.deploy_user.clone())
                    .unwrap_or_else(|| DEFAULT_DEPLOY_USER.to_string()),
            ),
            domain: self.domain.clone().or_else(|| deploy.domain.clone()),
            repository_url: self
                .repository_url
                .clone()
                .or_else(|| deploy.repository_url.clone()),
            working_directory: self
                .working_directory
                .clone()
                .or_else(|| deploy.working_directory.clone()),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PollArgs {
    #[arg(long = "max-attempts", env = "HANDOFF_MAX_ATTEMPTS", value_name = "N")]
    pub max_attempts: Option<u32>,

    #[arg(long = "attempt-timeout", env = "HANDOFF_ATTEMPT_TIMEOUT", value_name = "SECS")]
    pub attempt_timeout: Option<u64>,

    #[arg(long, env = "HANDOFF_BACKOFF", value_name = "SECS")]
    pub backoff: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SshArgs {
    #[arg(long = "ssh-bin", env = "HANDOFF_SSH_BIN", value_name = "PATH")]
    pub ssh_binary: Option<String>,

    #[arg(
        long = "ssh-flag",
        env = "HANDOFF_SSH_FLAG",
        value_name = "FLAG",
        allow_hyphen_values = true,
        help = "Extra argument for ssh (repeatable)"
    )]
    pub ssh_flags: Vec<String>,

    #[arg(
        long = "no-batch",
        env = "HANDOFF_SSH_NO_BATCH",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Allow ssh to prompt instead of forcing BatchMode"
    )]
    pub no_batch: Option<bool>,

    #[arg(long = "known-hosts", env = "HANDOFF_KNOWN_HOSTS", value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,
}

impl SshArgs {
    pub fn resolve(&self, file: &FileConfig) -> SshProbeConfig {
        let defaults = SshProbeConfig::default();
        SshProbeConfig {
            ssh_binary: self
                .ssh_binary
                .clone()
                .or_else(|| file.ssh.binary.clone())
                .unwrap_or(defaults.ssh_binary),
            ssh_flags: if self.ssh_flags.is_empty() {
                file.ssh.flags.clone()
            } else {
                self.ssh_flags.clone()
            },
            no_batch: self.no_batch.or(file.ssh.no_batch).unwrap_or(defaults.no_batch),
            known_hosts: self
                .known_hosts
                .clone()
                .or_else(|| file.ssh.known_hosts.clone()),
            remote_command: defaults.remote_command,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunnerArgs {
    #[arg(long = "runner-bin", env = "HANDOFF_RUNNER_BIN", value_name = "PATH")]
    pub program: Option<String>,

    #[arg(long, env = "HANDOFF_PLAYBOOK", value_name = "PATH")]
    pub playbook: Option<PathBuf>,

    #[arg(
        long = "runner-arg",
        env = "HANDOFF_RUNNER_ARG",
        value_name = "ARG",
        allow_hyphen_values = true,
        help = "Extra argument for the playbook run (repeatable)"
    )]
    pub extra_args: Vec<String>,

    #[arg(
        long = "host-key-checking",
        env = "HANDOFF_HOST_KEY_CHECKING",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL"
    )]
    pub host_key_checking: Option<bool>,
}

impl RunnerArgs {
    pub fn resolve(&self, file: &FileConfig) -> AnsibleRunnerConfig {
        let defaults = AnsibleRunnerConfig::default();
        AnsibleRunnerConfig {
            program: self
                .program
                .clone()
                .or_else(|| file.runner.program.clone())
                .unwrap_or(defaults.program),
            playbook: self
                .playbook
                .clone()
                .or_else(|| file.runner.playbook.clone())
                .unwrap_or(defaults.playbook),
            extra_args: if self.extra_args.is_empty() {
                file.runner.extra_args.clone()
            } else {
                self.extra_args.clone()
            },
            host_key_checking: self
                .host_key_checking
                .or(file.runner.host_key_checking)
                .unwrap_or(defaults.host_key_checking),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub target: TargetArgs,
    #[command(flatten)]
    pub deploy: DeployArgs,
    #[command(flatten)]
    pub poll: PollArgs,
    #[command(flatten)]
    pub ssh: SshArgs,
    #[command(flatten)]
    pub runner: RunnerArgs,
}

impl RunArgs {
    pub fn resolve(&self, file: &FileConfig) -> Result<RunSettings, ConfigError> {
        let policy = poll_policy(
            self.poll.max_attempts.or(file.readiness.max_attempts),
            self.poll
                .attempt_timeout
                .or(file.readiness.attempt_timeout_secs),
            self.poll.backoff.or(file.readiness.backoff_secs),
        )?;
        Ok(RunSettings {
            work_dir: self.source.work_dir(file),
            target: self.target.resolve(file),
            params: self.deploy.resolve(file),
            policy,
            ssh: self.ssh.resolve(file),
            runner: self.runner.resolve(file),
        })
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RenderArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub target: TargetArgs,
    #[command(flatten)]
    pub deploy: DeployArgs,

    #[arg(
        long,
        short = 'o',
        value_name = "PATH",
        help = "Write the inventory here instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, help = "Print the trigger record as JSON")]
    pub json: bool,
}
