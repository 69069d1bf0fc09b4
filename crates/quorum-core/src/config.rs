use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuorumError, Result};

/// Top-level Quorum configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    /// Pricing overrides keyed by model name or model-name prefix.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    /// Named agents that workflow steps reference.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// JSONL run logging.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Execution limits for continuations and collaborator calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tool rounds in one continuation.
    #[serde(default = "default_max_continuation_depth")]
    pub max_continuation_depth: usize,
    /// Per-call timeout for the agent invoker.
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    /// Per-call timeout for the tool executor.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Retries for recoverable invoker failures (provider, timeout, rate limit).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Execute a batch of tool calls concurrently.
    #[serde(default = "default_parallel_tools")]
    pub parallel_tools: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_continuation_depth: default_max_continuation_depth(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_retries: default_max_retries(),
            parallel_tools: default_parallel_tools(),
        }
    }
}

impl EngineConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

fn default_max_continuation_depth() -> usize { 10 }
fn default_invoke_timeout_secs() -> u64 { 120 }
fn default_tool_timeout_secs() -> u64 { 30 }
fn default_max_retries() -> u32 { 1 }
fn default_parallel_tools() -> bool { true }

/// Backoff between retries of recoverable invoker failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5_000 }

/// Run-scoped spending ceilings. Unset means unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl BudgetConfig {
    pub fn is_unlimited(&self) -> bool {
        self.max_cost_usd.is_none() && self.max_tokens.is_none()
    }
}

/// Prompt size limit checked before each invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub max_context_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Similarity at or above which two candidates join the same group.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 { 0.5 }

/// Per-1k-token rates in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// A named agent: model settings plus an optional system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub model: ModelConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            dir: default_log_dir(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "~/.quorum/runs".to_string() }

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn dir_path(&self) -> PathBuf {
        if let Some(rest) = self.dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.dir)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => QuorumError::ConfigNotFound(path.display().to_string()),
            _ => QuorumError::Io(e),
        })?;
        Self::parse(&content)
    }

    /// Parse config from a TOML string, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| QuorumError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.consensus.threshold) {
            return Err(QuorumError::Config(format!(
                "consensus.threshold must be within [0, 1], got {}",
                self.consensus.threshold
            )));
        }
        if let Some(cost) = self.budget.max_cost_usd {
            if cost < 0.0 {
                return Err(QuorumError::Config(
                    "budget.max_cost_usd must not be negative".into(),
                ));
            }
        }
        for (model, rates) in &self.pricing {
            if rates.input_per_1k < 0.0 || rates.output_per_1k < 0.0 {
                return Err(QuorumError::Config(format!(
                    "pricing for '{}' must not be negative",
                    model
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Leave the placeholder if the var is unset
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
