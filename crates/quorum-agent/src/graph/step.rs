use std::path::Path;

use serde::{Deserialize, Serialize};

use quorum_core::error::{QuorumError, Result};

/// What a step does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// One agent turn through the continuation loop.
    AgentCall,
    /// Fans its input out to the agent_call steps it routes to.
    Branch,
    /// Collapses its dependencies' outputs with a consensus strategy.
    Merge,
    /// Marks run completion and exposes the final value.
    Terminal,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AgentCall => "agent_call",
            Self::Branch => "branch",
            Self::Merge => "merge",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// One node of a workflow. Immutable once the workflow is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    pub kind: StepKind,
    /// Input template with `{{input}}` / `{{<step_id>}}` placeholders.
    #[serde(default)]
    pub inputs: Option<String>,
    /// Downstream step ids.
    #[serde(default)]
    pub routes_to: Vec<String>,
    /// Agent name, for agent_call steps.
    #[serde(default)]
    pub agent: Option<String>,
    /// Consensus strategy name, for merge steps.
    #[serde(default)]
    pub strategy: Option<String>,
    /// On a branch: the first failing child cancels its siblings.
    #[serde(default)]
    pub all_or_nothing: bool,
}

impl StepSpec {
    fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: None,
            routes_to: vec![],
            agent: None,
            strategy: None,
            all_or_nothing: false,
        }
    }

    pub fn agent_call(id: impl Into<String>, agent: impl Into<String>) -> Self {
        let mut step = Self::new(id, StepKind::AgentCall);
        step.agent = Some(agent.into());
        step
    }

    pub fn branch(id: impl Into<String>) -> Self {
        Self::new(id, StepKind::Branch)
    }

    pub fn merge(id: impl Into<String>, strategy: impl Into<String>) -> Self {
        let mut step = Self::new(id, StepKind::Merge);
        step.strategy = Some(strategy.into());
        step
    }

    pub fn terminal(id: impl Into<String>) -> Self {
        Self::new(id, StepKind::Terminal)
    }

    pub fn routes_to<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes_to = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs(mut self, template: impl Into<String>) -> Self {
        self.inputs = Some(template.into());
        self
    }

    pub fn all_or_nothing(mut self) -> Self {
        self.all_or_nothing = true;
        self
    }
}

/// A named set of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            id: id.into(),
            description: None,
            steps,
        }
    }

    /// Load a workflow from a TOML file with `[[steps]]` tables.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => QuorumError::ConfigNotFound(path.display().to_string()),
            _ => QuorumError::Io(e),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| QuorumError::Config(format!("workflow: {}", e)))
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }
}
