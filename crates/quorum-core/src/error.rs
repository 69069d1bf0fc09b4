use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuorumError {
    // Workflow errors
    #[error("Workflow graph error: {0}")]
    Graph(#[from] GraphError),

    // Continuation errors
    #[error("Continuation exceeded max depth ({0})")]
    ContinuationLimitExceeded(usize),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Provider errors
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timed out after {timeout_secs}s: {operation}")]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Policy errors
    #[error("Budget exceeded: {resource} would reach {attempted} of {limit}")]
    BudgetExceeded {
        resource: String,
        attempted: u64,
        limit: u64,
    },

    #[error("Context window exceeded: {tokens} tokens (limit {limit})")]
    ContextWindowExceeded { tokens: usize, limit: usize },

    // Consensus errors
    #[error("Consensus strategy received no candidates")]
    EmptyInput,

    #[error("Run cancelled")]
    Cancelled,

    // Interceptor internals (logged, never surfaced to the agent call)
    #[error("Interceptor {name} failed: {message}")]
    Interceptor { name: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems found while validating a workflow definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow has no steps")]
    Empty,

    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("step id '{0}' is reserved")]
    ReservedStepId(String),

    #[error("step '{from}' routes to unknown step '{to}'")]
    DanglingRoute { from: String, to: String },

    #[error("cycle detected at step '{step}'")]
    Cycle { step: String },

    #[error("workflow has no terminal step")]
    NoTerminal,

    #[error("terminal step '{0}' must not route anywhere")]
    TerminalRoutes(String),

    #[error("branch '{branch}' routes to '{child}', which is not an agent_call step")]
    InvalidBranchChild { branch: String, child: String },

    #[error("step '{step}' is missing its {field} reference")]
    MissingReference { step: String, field: &'static str },

    #[error("step '{step}' references unknown agent '{agent}'")]
    UnknownAgent { step: String, agent: String },

    #[error("step '{step}' references unknown consensus strategy '{strategy}'")]
    UnknownStrategy { step: String, strategy: String },

    #[error("step '{step}' has an invalid input binding: {reason}")]
    InvalidBinding { step: String, reason: String },

    #[error("step '{step}' binds '{reference}', which is not one of its ancestors")]
    UnboundReference { step: String, reference: String },
}

/// Stable, user-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Graph,
    ContinuationLimitExceeded,
    ToolExecution,
    Provider,
    Timeout,
    RateLimited,
    BudgetExceeded,
    ContextWindowExceeded,
    EmptyInput,
    Cancelled,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Graph => "GraphError",
            Self::ContinuationLimitExceeded => "ContinuationLimitExceeded",
            Self::ToolExecution => "ToolExecutionError",
            Self::Provider => "ProviderError",
            Self::Timeout => "TimeoutError",
            Self::RateLimited => "RateLimited",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::ContextWindowExceeded => "ContextWindowExceeded",
            Self::EmptyInput => "EmptyInput",
            Self::Cancelled => "Cancelled",
            Self::Config => "ConfigError",
            Self::Internal => "InternalError",
        };
        f.write_str(s)
    }
}

impl QuorumError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Graph(_) => ErrorKind::Graph,
            Self::ContinuationLimitExceeded(_) => ErrorKind::ContinuationLimitExceeded,
            Self::ToolNotFound(_) | Self::ToolExecution { .. } => ErrorKind::ToolExecution,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::ContextWindowExceeded { .. } => ErrorKind::ContextWindowExceeded,
            Self::EmptyInput => ErrorKind::EmptyInput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) | Self::ConfigNotFound(_) => ErrorKind::Config,
            Self::Interceptor { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Provider-side failures that a bounded retry may recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::Timeout { .. } | Self::RateLimited(_)
        )
    }

    pub fn interceptor(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Interceptor {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QuorumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(QuorumError::Provider("502".into()).is_retryable());
        assert!(QuorumError::RateLimited("slow down".into()).is_retryable());
        assert!(QuorumError::Timeout {
            operation: "invoke".into(),
            timeout_secs: 5
        }
        .is_retryable());
        assert!(!QuorumError::Cancelled.is_retryable());
        assert!(!QuorumError::BudgetExceeded {
            resource: "tokens".into(),
            attempted: 10,
            limit: 5
        }
        .is_retryable());
    }

    #[test]
    fn graph_error_converts_and_keeps_kind() {
        let err: QuorumError = GraphError::Cycle { step: "a".into() }.into();
        assert_eq!(err.kind(), ErrorKind::Graph);
        assert!(err.to_string().contains("cycle detected at step 'a'"));
    }

    #[test]
    fn kind_display_uses_taxonomy_names() {
        assert_eq!(ErrorKind::Cancelled.to_string(), "Cancelled");
        assert_eq!(ErrorKind::Provider.to_string(), "ProviderError");
        assert_eq!(ErrorKind::ToolExecution.to_string(), "ToolExecutionError");
    }
}
