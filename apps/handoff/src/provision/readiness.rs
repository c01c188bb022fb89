//! Readiness gate: poll a freshly provisioned host until it accepts an
//! authenticated command, with a fixed backoff between attempts.
//!
//! The loop is strictly sequential. One probe is in flight at a time and the
//! only way out before success is running out of attempts.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub backoff_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            per_attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff_interval: DEFAULT_BACKOFF,
        }
    }
}

impl PollPolicy {
    /// Upper bound on how long [`await_ready`] can block. Saturates at
    /// `Duration::MAX`.
    pub fn worst_case(&self) -> Duration {
        self.per_attempt_timeout
            .checked_add(self.backoff_interval)
            .and_then(|per_attempt| per_attempt.checked_mul(self.max_attempts))
            .unwrap_or(Duration::MAX)
    }
}

/// Where and as whom to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub address: String,
    pub principal: String,
    pub credential: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote command failed ({status}): {detail}")]
    Rejected { status: String, detail: String },
    #[error("failed to launch probe: {0}")]
    Launch(String),
}

/// One authenticated command execution against the target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> Result<(), ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed,
}

/// Bookkeeping for a single polling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub outcome: Readiness,
}

impl ReadinessState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            outcome: Readiness::Pending,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        last_error: Option<ProbeError>,
    },
}

impl ReadinessOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            ReadinessOutcome::Ready { attempts } | ReadinessOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessOutcome::Ready { .. })
    }
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessOutcome::Ready { attempts } => write!(f, "ready after {attempts} attempt(s)"),
            ReadinessOutcome::Failed {
                attempts,
                last_error: Some(err),
            } => write!(f, "unreachable after {attempts} attempt(s); last error: {err}"),
            ReadinessOutcome::Failed {
                attempts,
                last_error: None,
            } => write!(f, "unreachable after {attempts} attempt(s)"),
        }
    }
}

/// Poll `target` until a probe succeeds or `policy.max_attempts` probes have
/// failed. No sleep follows the final attempt.
pub async fn await_ready<P>(probe: &P, target: &ProbeTarget, policy: &PollPolicy) -> ReadinessOutcome
where
    P: Probe + ?Sized,
{
    let mut state = ReadinessState::new(policy.max_attempts);
    let mut last_error = None;

    info!(
        target: "handoff::readiness",
        address = %target.address,
        principal = %target.principal,
        max_attempts = policy.max_attempts,
        timeout_ms = policy.per_attempt_timeout.as_millis() as u64,
        backoff_ms = policy.backoff_interval.as_millis() as u64,
        "waiting for target to accept remote commands"
    );

    while !state.exhausted() {
        state.attempts += 1;
        let attempt = tokio::time::timeout(
            policy.per_attempt_timeout,
            probe.probe(target, policy.per_attempt_timeout),
        )
        .await
        .unwrap_or(Err(ProbeError::Timeout(policy.per_attempt_timeout)));

        match attempt {
            Ok(()) => {
                state.outcome = Readiness::Ready;
                info!(
                    target: "handoff::readiness",
                    address = %target.address,
                    attempts = state.attempts,
                    "target is ready"
                );
                return ReadinessOutcome::Ready {
                    attempts: state.attempts,
                };
            }
            Err(err) => {
                debug!(
                    target: "handoff::readiness",
                    address = %target.address,
                    attempt = state.attempts,
                    max_attempts = state.max_attempts,
                    error = %err,
                    "probe failed"
                );
                last_error = Some(err);
            }
        }

        if !state.exhausted() {
            tokio::time::sleep(policy.backoff_interval).await;
        }
    }

    state.outcome = Readiness::Failed;
    let last = last_error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    warn!(
        target: "handoff::readiness",
        address = %target.address,
        attempts = state.attempts,
        error = %last,
        "target never became ready"
    );
    ReadinessOutcome::Failed {
        attempts: state.attempts,
        last_error,
    }
}
