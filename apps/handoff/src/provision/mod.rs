pub mod coordinator;
pub mod descriptor;
pub mod fsutil;
pub mod inventory;
pub mod lock;
pub mod provider;
pub mod readiness;
pub mod runner;
pub mod trigger;

pub use coordinator::{Coordinator, CoordinatorError, FailureReason, HandoffPaths, RunOutcome};
pub use descriptor::{Generation, ResourceDescriptor};
pub use inventory::{DeploymentParams, InventoryRecord, RenderError, render};
pub use readiness::{PollPolicy, Probe, ProbeError, ProbeTarget, ReadinessOutcome, await_ready};
pub use runner::{ConfigurationRunner, RunReport, RunnerError};
pub use trigger::{RunTrigger, TriggerRecord, TriggerStore};
