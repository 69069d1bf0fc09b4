use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use quorum_core::error::{ErrorKind, QuorumError};
use quorum_core::types::{RunId, TokenUsage};

use super::step::StepKind;

/// Overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Completed,
    Failed,
    /// Not executed: an upstream step failed or was skipped, or the run was cancelled.
    Skipped,
}

/// Per-step result.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step_id: String,
    pub kind: StepKind,
    pub state: StepState,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
    /// Tool rounds used, for agent_call steps.
    pub depth: usize,
    pub usage: TokenUsage,
    pub cost: f64,
}

impl StepRecord {
    pub(crate) fn pending(step_id: &str, kind: StepKind) -> Self {
        Self {
            step_id: step_id.to_string(),
            kind,
            state: StepState::Pending,
            error_kind: None,
            elapsed_ms: 0,
            depth: 0,
            usage: TokenUsage::default(),
            cost: 0.0,
        }
    }
}

/// A failure recorded against the run. `step_id` is `None` for run-level
/// failures such as cancellation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(step_id: Option<String>, error: &QuorumError) -> Self {
        Self {
            step_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Everything a finished run exposes for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub run_id: RunId,
    pub status: RunStatus,
    /// The run's cancellation token fired before it finished.
    pub cancelled: bool,
    /// Output of every completed step, by step id.
    pub outputs: HashMap<String, String>,
    /// One record per step, in declaration order.
    pub steps: Vec<StepRecord>,
    pub failures: Vec<StepFailure>,
    /// Value of the first completed terminal step.
    pub final_output: Option<String>,
    pub usage: TokenUsage,
    pub cost: f64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl WorkflowRun {
    pub(crate) fn new(workflow_id: &str, run_id: RunId, steps: Vec<StepRecord>) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            run_id,
            status: RunStatus::Running,
            cancelled: false,
            outputs: HashMap::new(),
            steps,
            failures: Vec::new(),
            final_output: None,
            usage: TokenUsage::default(),
            cost: 0.0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn output(&self, step_id: &str) -> Option<&str> {
        self.outputs.get(step_id).map(String::as_str)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_state(&self, step_id: &str) -> Option<StepState> {
        self.step(step_id).map(|s| s.state)
    }

    /// Step ids in the given state, in declaration order.
    pub fn steps_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.step_id.as_str())
            .collect()
    }

    /// `Cancelled` for a cancelled run, otherwise the kind of the first recorded failure.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.cancelled {
            return Some(ErrorKind::Cancelled);
        }
        self.failures.first().map(|f| f.kind)
    }

    /// Kinds of all recorded failures.
    pub fn failure_kinds(&self) -> Vec<ErrorKind> {
        self.failures.iter().map(|f| f.kind).collect()
    }

    /// One-line user-facing summary: status plus failing step and error kind.
    pub fn summary(&self) -> String {
        match (self.status, self.failures.first()) {
            (RunStatus::Succeeded, _) => format!("run {} succeeded", self.run_id),
            (status, Some(failure)) => format!(
                "run {} {}: step {} failed with {}",
                self.run_id,
                status,
                failure.step_id.as_deref().unwrap_or("-"),
                failure.kind
            ),
            (status, None) => format!("run {} {}", self.run_id, status),
        }
    }
}
