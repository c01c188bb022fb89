use crate::config::ConfigError;
use crate::provision::coordinator::{CoordinatorError, FailureReason};
use crate::provision::inventory::RenderError;
use crate::provision::provider::ProviderError;
use crate::provision::trigger::TriggerStoreError;
use std::io;
use thiserror::Error;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_RENDER: i32 = 2;
pub const EXIT_UNREACHABLE: i32 = 3;
pub const EXIT_RUNNER: i32 = 4;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("{0}")]
    Trigger(#[from] TriggerStoreError),
    #[error("inventory could not be rendered: {0}")]
    Render(#[from] RenderError),
    #[error("{0}")]
    Outcome(FailureReason),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Render(_) => EXIT_RENDER,
            CliError::Outcome(FailureReason::Render(_)) => EXIT_RENDER,
            CliError::Outcome(FailureReason::UnreachableTarget { .. }) => EXIT_UNREACHABLE,
            CliError::Outcome(FailureReason::ConfigurationRunFailed(_)) => EXIT_RUNNER,
            _ => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::runner::RunnerError;

    #[test]
    fn exit_codes_follow_failure_kind() {
        let render = CliError::Render(RenderError::MissingParameter("domain"));
        assert_eq!(render.exit_code(), 2);

        let unreachable = CliError::Outcome(FailureReason::UnreachableTarget {
            attempts: 30,
            last_error: None,
        });
        assert_eq!(unreachable.exit_code(), 3);

        let runner = CliError::Outcome(FailureReason::ConfigurationRunFailed(
            RunnerError::Launch {
                program: "ansible-playbook".into(),
                reason: "not found".into(),
            },
        ));
        assert_eq!(runner.exit_code(), 4);
        assert_eq!(
            runner.to_string(),
            "configuration run failed: failed to launch ansible-playbook: not found"
        );

        let config = CliError::Config(ConfigError::Missing("ssh key"));
        assert_eq!(config.exit_code(), 1);
    }
}
