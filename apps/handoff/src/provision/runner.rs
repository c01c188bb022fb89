use crate::transport::process::describe_exit_status;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{info, warn};

/// Stderr lines kept for the failure report.
pub const DIAGNOSTIC_TAIL_LINES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },
    #[error("{program} failed ({status})")]
    Failed {
        program: String,
        status: String,
        /// Tail of the tool's stderr, verbatim.
        diagnostics: Vec<String>,
    },
}

impl RunnerError {
    pub fn diagnostics(&self) -> &[String] {
        match self {
            RunnerError::Failed { diagnostics, .. } => diagnostics.as_slice(),
            RunnerError::Launch { .. } => &[],
        }
    }
}

/// The external configuration-management step. Only success or failure of
/// the whole run is visible to the coordinator.
#[async_trait]
pub trait ConfigurationRunner: Send + Sync {
    async fn apply(&self, inventory: &Path) -> Result<RunReport, RunnerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsibleRunnerConfig {
    pub program: String,
    pub playbook: PathBuf,
    pub extra_args: Vec<String>,
    pub host_key_checking: bool,
}

impl Default for AnsibleRunnerConfig {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            playbook: PathBuf::from("playbook.yml"),
            extra_args: Vec::new(),
            host_key_checking: false,
        }
    }
}

/// Runs `ansible-playbook -i <inventory> <playbook>` and streams its output.
#[derive(Debug, Clone)]
pub struct AnsibleRunner {
    config: AnsibleRunnerConfig,
}

impl AnsibleRunner {
    pub fn new(config: AnsibleRunnerConfig) -> Self {
        Self { config }
    }

    pub fn command_line(&self, inventory: &Path) -> Vec<String> {
        let mut args = vec![
            self.config.program.clone(),
            "-i".to_string(),
            inventory.display().to_string(),
            self.config.playbook.display().to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl ConfigurationRunner for AnsibleRunner {
    async fn apply(&self, inventory: &Path) -> Result<RunReport, RunnerError> {
        let program = self.config.program.clone();
        let mut command = TokioCommand::new(&program);
        command.arg("-i").arg(inventory);
        command.arg(&self.config.playbook);
        command.args(&self.config.extra_args);
        command.env(
            "ANSIBLE_HOST_KEY_CHECKING",
            if self.config.host_key_checking {
                "True"
            } else {
                "False"
            },
        );
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        info!(
            target: "handoff::runner",
            command = %self.command_line(inventory).join(" "),
            "starting configuration run"
        );

        let mut child = command.spawn().map_err(|err| RunnerError::Launch {
            program: program.clone(),
            reason: err.to_string(),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, tail) = tokio::join!(
            async move {
                if let Some(stdout) = stdout {
                    forward_lines(BufReader::new(stdout), Stream::Stdout, 0).await;
                }
            },
            async move {
                match stderr {
                    Some(stderr) => {
                        forward_lines(BufReader::new(stderr), Stream::Stderr, DIAGNOSTIC_TAIL_LINES)
                            .await
                    }
                    None => VecDeque::new(),
                }
            }
        );

        let status = child.wait().await.map_err(|err| RunnerError::Launch {
            program: program.clone(),
            reason: format!("failed to wait for process: {err}"),
        })?;
        let described = describe_exit_status(status);

        if status.success() {
            info!(target: "handoff::runner", status = %described, "configuration run succeeded");
            Ok(RunReport { status: described })
        } else {
            warn!(target: "handoff::runner", status = %described, "configuration run failed");
            Err(RunnerError::Failed {
                program,
                status: described,
                diagnostics: tail.into_iter().collect(),
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Copy each line to our own stdout/stderr byte for byte, keeping the last
/// `keep` lines. Output need not be UTF-8; only the kept tail is decoded.
async fn forward_lines<R>(mut reader: BufReader<R>, stream: Stream, keep: usize) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(keep);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let written = match stream {
                    Stream::Stdout => std::io::stdout().lock().write_all(&line),
                    Stream::Stderr => std::io::stderr().lock().write_all(&line),
                };
                if let Err(err) = written {
                    warn!(target: "handoff::runner", error = %err, "failed to forward runner output");
                }
                if keep > 0 {
                    if tail.len() == keep {
                        tail.pop_front();
                    }
                    let text = String::from_utf8_lossy(&line);
                    tail.push_back(text.trim_end_matches(['\n', '\r']).to_string());
                }
            }
            Err(err) => {
                warn!(target: "handoff::runner", error = %err, "failed to read runner output");
                break;
            }
        }
    }
    tail
}
