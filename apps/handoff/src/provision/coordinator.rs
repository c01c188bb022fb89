//! One coordinator invocation: render, wait for the host, then apply the
//! configuration unless the same trigger was already applied.
//!
//! ```text
//! Start -> Rendering -> Polling -> { Skipping | Invoking } -> { Applied | Skipped | Failed }
//! ```
//!
//! Nothing is retried across invocations. The trigger is persisted only after
//! the runner reports success, so an invocation killed at any point leaves the
//! next one to redo the configuration run in full.

use crate::provision::descriptor::{ResourceDescriptor, file_stem_for};
use crate::provision::inventory::{DeploymentParams, RenderError, render};
use crate::provision::lock::{DEFAULT_LOCK_TTL, LockError, ResourceLock};
use crate::provision::readiness::{
    PollPolicy, Probe, ProbeError, ProbeTarget, ReadinessOutcome, await_ready,
};
use crate::provision::runner::{ConfigurationRunner, RunnerError};
use crate::provision::trigger::{RunTrigger, TriggerRecord, TriggerStore, TriggerStoreError};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Rendering,
    Polling,
    Skipping,
    Invoking,
    Applied,
    Skipped,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Rendering => "rendering",
            Stage::Polling => "polling",
            Stage::Skipping => "skipping",
            Stage::Invoking => "invoking",
            Stage::Applied => "applied",
            Stage::Skipped => "skipped",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Render(RenderError),
    UnreachableTarget {
        attempts: u32,
        last_error: Option<ProbeError>,
    },
    ConfigurationRunFailed(RunnerError),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Render(_) => "RenderError",
            FailureReason::UnreachableTarget { .. } => "UnreachableTarget",
            FailureReason::ConfigurationRunFailed(_) => "ConfigurationRunFailed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Render(err) => write!(f, "inventory could not be rendered: {err}"),
            FailureReason::UnreachableTarget {
                attempts,
                last_error,
            } => {
                write!(f, "target unreachable after {attempts} attempt(s)")?;
                if let Some(err) = last_error {
                    write!(f, "; last error: {err}")?;
                }
                Ok(())
            }
            FailureReason::ConfigurationRunFailed(err) => {
                write!(f, "configuration run failed: {err}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Applied {
        trigger: RunTrigger,
        inventory: PathBuf,
    },
    Skipped {
        trigger: RunTrigger,
        inventory: PathBuf,
    },
    Failed(FailureReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed(_))
    }

    fn stage(&self) -> Stage {
        match self {
            RunOutcome::Applied { .. } => Stage::Applied,
            RunOutcome::Skipped { .. } => Stage::Skipped,
            RunOutcome::Failed(_) => Stage::Failed,
        }
    }
}

/// Local faults that stop a run before it reaches a terminal outcome.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to write inventory {path}: {source}")]
    Handoff {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Trigger(#[from] TriggerStoreError),
}

/// File layout for one resource inside the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPaths {
    pub inventory: PathBuf,
    pub trigger: PathBuf,
    pub lock: PathBuf,
}

impl HandoffPaths {
    pub fn new(work_dir: &Path, resource_id: &str) -> Self {
        let stem = file_stem_for(resource_id);
        Self {
            inventory: work_dir.join(format!("{stem}.inventory.yml")),
            trigger: work_dir.join(format!("{stem}.trigger.json")),
            lock: work_dir.join(format!("{stem}.lock")),
        }
    }
}

pub struct Coordinator {
    probe: Arc<dyn Probe>,
    runner: Arc<dyn ConfigurationRunner>,
    work_dir: PathBuf,
    lock_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        probe: Arc<dyn Probe>,
        runner: Arc<dyn ConfigurationRunner>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            probe,
            runner,
            work_dir: work_dir.into(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn paths_for(&self, resource_id: &str) -> HandoffPaths {
        HandoffPaths::new(&self.work_dir, resource_id)
    }

    pub async fn run(
        &self,
        descriptor: &ResourceDescriptor,
        params: &DeploymentParams,
        policy: &PollPolicy,
    ) -> Result<RunOutcome, CoordinatorError> {
        let resource = descriptor.resource_id.as_str();
        let paths = self.paths_for(resource);
        transition(resource, Stage::Start);
        let _lock = ResourceLock::acquire(&paths.lock, resource, self.lock_ttl)?;

        let outcome = self.drive(descriptor, params, policy, &paths).await?;
        match &outcome {
            RunOutcome::Failed(reason) => warn!(
                target: "handoff::coordinator",
                resource_id = %resource,
                stage = Stage::Failed.as_str(),
                reason = reason.kind(),
                error = %reason,
                "coordinator run failed"
            ),
            _ => transition(resource, outcome.stage()),
        }
        Ok(outcome)
    }

    async fn drive(
        &self,
        descriptor: &ResourceDescriptor,
        params: &DeploymentParams,
        policy: &PollPolicy,
        paths: &HandoffPaths,
    ) -> Result<RunOutcome, CoordinatorError> {
        let resource = descriptor.resource_id.as_str();

        transition(resource, Stage::Rendering);
        let record = match render(descriptor, params) {
            Ok(record) => record,
            Err(err) => return Ok(RunOutcome::Failed(FailureReason::Render(err))),
        };
        record
            .write_to(&paths.inventory)
            .await
            .map_err(|source| CoordinatorError::Handoff {
                path: paths.inventory.clone(),
                source,
            })?;
        info!(
            target: "handoff::coordinator",
            resource_id = %resource,
            inventory = %paths.inventory.display(),
            sha256 = %record.sha256(),
            "inventory written"
        );

        transition(resource, Stage::Polling);
        let target = ProbeTarget {
            address: descriptor.public_address.clone(),
            principal: descriptor.admin_principal.clone(),
            credential: descriptor.credential_reference.clone(),
        };
        if let ReadinessOutcome::Failed {
            attempts,
            last_error,
        } = await_ready(self.probe.as_ref(), &target, policy).await
        {
            return Ok(RunOutcome::Failed(FailureReason::UnreachableTarget {
                attempts,
                last_error,
            }));
        }

        let trigger = RunTrigger::compute(&descriptor.generation, &record);
        let store = TriggerStore::new(&paths.trigger);
        if store.matches(&trigger).await? {
            transition(resource, Stage::Skipping);
            info!(
                target: "handoff::coordinator",
                resource_id = %resource,
                trigger = %trigger.short(),
                "configuration already applied for this trigger"
            );
            return Ok(RunOutcome::Skipped {
                trigger,
                inventory: paths.inventory.clone(),
            });
        }

        transition(resource, Stage::Invoking);
        if let Err(err) = self.runner.apply(&paths.inventory).await {
            return Ok(RunOutcome::Failed(FailureReason::ConfigurationRunFailed(err)));
        }

        let applied = TriggerRecord::new(resource, &descriptor.generation, &trigger, &record);
        store.persist(&applied).await?;
        Ok(RunOutcome::Applied {
            trigger,
            inventory: paths.inventory.clone(),
        })
    }
}

fn transition(resource: &str, stage: Stage) {
    info!(
        target: "handoff::coordinator",
        resource_id = %resource,
        stage = stage.as_str(),
        "stage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_keyed_by_sanitized_resource_id() {
        let paths = HandoffPaths::new(Path::new("/work"), "arn:aws/i-1");
        assert_eq!(paths.inventory, Path::new("/work/arn_aws_i-1-1b8ed7a4.inventory.yml"));
        assert_eq!(paths.trigger, Path::new("/work/arn_aws_i-1-1b8ed7a4.trigger.json"));
        assert_eq!(paths.lock, Path::new("/work/arn_aws_i-1-1b8ed7a4.lock"));
    }

    #[test]
    fn failure_reasons_read_as_sentences() {
        let unreachable = FailureReason::UnreachableTarget {
            attempts: 30,
            last_error: Some(ProbeError::Timeout(Duration::from_secs(5))),
        };
        assert_eq!(unreachable.kind(), "UnreachableTarget");
        assert_eq!(
            unreachable.to_string(),
            "target unreachable after 30 attempt(s); last error: probe timed out after 5s"
        );

        let render = FailureReason::Render(RenderError::MissingParameter("domain"));
        assert_eq!(
            render.to_string(),
            "inventory could not be rendered: missing required parameter 'domain'"
        );
    }
}
