use crate::provision::readiness::{Probe, ProbeError, ProbeTarget};
use crate::transport::process::{describe_exit_status, last_line};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshProbeConfig {
    pub ssh_binary: String,
    pub ssh_flags: Vec<String>,
    pub no_batch: bool,
    pub known_hosts: Option<PathBuf>,
    pub remote_command: String,
}

impl Default for SshProbeConfig {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            ssh_flags: Vec::new(),
            no_batch: false,
            known_hosts: None,
            remote_command: "true".to_string(),
        }
    }
}

/// Readiness probe that runs a trivial command over the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshProbe {
    config: SshProbeConfig,
}

impl SshProbe {
    pub fn new(config: SshProbeConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the ssh binary, excluding the binary itself.
    pub fn ssh_args(&self, target: &ProbeTarget, timeout: Duration) -> Vec<String> {
        let mut args = Vec::new();
        if !self.config.no_batch {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        let connect_secs = timeout.as_secs().max(1);
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={connect_secs}"),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]);
        if let Some(known_hosts) = &self.config.known_hosts {
            args.extend([
                "-o".to_string(),
                format!("UserKnownHostsFile={}", known_hosts.display()),
            ]);
        }
        args.extend([
            "-i".to_string(),
            target.credential.display().to_string(),
            "-T".to_string(),
        ]);
        args.extend(self.config.ssh_flags.iter().cloned());
        args.push(format!("{}@{}", target.principal, target.address));
        args.push(self.config.remote_command.clone());
        args
    }
}

#[async_trait]
impl Probe for SshProbe {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> Result<(), ProbeError> {
        let mut command = TokioCommand::new(&self.config.ssh_binary);
        command.args(self.ssh_args(target, timeout));
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        // The poller drops this future on timeout; take the ssh child with it.
        command.kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|err| ProbeError::Launch(format!("{}: {err}", self.config.ssh_binary)))?;

        if output.status.success() {
            return Ok(());
        }

        let status = describe_exit_status(output.status);
        let detail = last_line(&output.stderr);
        debug!(
            target: "handoff::ssh",
            address = %target.address,
            status = %status,
            stderr = %detail,
            "ssh probe rejected"
        );
        Err(ProbeError::Rejected { status, detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ProbeTarget {
        ProbeTarget {
            address: "203.0.113.5".into(),
            principal: "ubuntu".into(),
            credential: PathBuf::from("/keys/todo.pem"),
        }
    }

    #[test]
    fn args_force_batch_mode_and_key() {
        let probe = SshProbe::new(SshProbeConfig {
            ssh_flags: vec!["-p".into(), "2222".into()],
            known_hosts: Some(PathBuf::from("/work/known_hosts")),
            ..SshProbeConfig::default()
        });
        assert_eq!(
            probe.ssh_args(&target(), Duration::from_secs(5)),
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-o",
                "UserKnownHostsFile=/work/known_hosts",
                "-i",
                "/keys/todo.pem",
                "-T",
                "-p",
                "2222",
                "ubuntu@203.0.113.5",
                "true",
            ]
        );
    }

    #[test]
    fn sub_second_timeout_still_gives_ssh_one_second() {
        let probe = SshProbe::new(SshProbeConfig {
            no_batch: true,
            ..SshProbeConfig::default()
        });
        let args = probe.ssh_args(&target(), Duration::from_millis(200));
        assert_eq!(args[0..2], ["-o".to_string(), "ConnectTimeout=1".to_string()]);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_ssh(dir: &std::path::Path, body: &str) -> String {
            let path = dir.join("ssh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path.display().to_string()
        }

        #[tokio::test]
        async fn zero_exit_is_ready() {
            let dir = tempfile::tempdir().unwrap();
            let probe = SshProbe::new(SshProbeConfig {
                ssh_binary: fake_ssh(dir.path(), "exit 0"),
                ..SshProbeConfig::default()
            });
            probe.probe(&target(), Duration::from_secs(5)).await.unwrap();
        }

        #[tokio::test]
        async fn auth_failure_is_rejected_with_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let probe = SshProbe::new(SshProbeConfig {
                ssh_binary: fake_ssh(
                    dir.path(),
                    "echo 'ubuntu@203.0.113.5: Permission denied (publickey).' >&2; exit 255",
                ),
                ..SshProbeConfig::default()
            });
            let err = probe
                .probe(&target(), Duration::from_secs(5))
                .await
                .unwrap_err();
            assert_eq!(
                err,
                ProbeError::Rejected {
                    status: "exit code 255".into(),
                    detail: "ubuntu@203.0.113.5: Permission denied (publickey).".into(),
                }
            );
        }

        #[tokio::test]
        async fn missing_binary_is_a_launch_error() {
            let probe = SshProbe::new(SshProbeConfig {
                ssh_binary: "/nonexistent/ssh".into(),
                ..SshProbeConfig::default()
            });
            let err = probe
                .probe(&target(), Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::Launch(_)));
        }
    }
}
