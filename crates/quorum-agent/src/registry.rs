use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use quorum_core::config::{AgentConfig, AppConfig, ModelConfig};
use quorum_core::traits::{AgentInvoker, NoTools, ToolExecutor};

use crate::consensus::{AggregationStrategy, ConsensusStrategy, VotingStrategy};

/// Describes a named agent that workflow steps can reference.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: String,
    pub model: ModelConfig,
    pub system_prompt: Option<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            name: name.into(),
            model,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn from_config(name: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            name: name.into(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// An agent profile together with the invoker that serves it.
#[derive(Clone)]
pub struct RegisteredAgent {
    pub profile: AgentProfile,
    pub invoker: Arc<dyn AgentInvoker>,
}

/// Agents, consensus strategies and the tool executor available to a run.
///
/// Passed to the executor explicitly; workflow steps reference entries by name
/// and every reference is resolved before the first step starts.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, RegisteredAgent>,
    strategies: HashMap<String, Arc<dyn ConsensusStrategy>>,
    tools: Arc<dyn ToolExecutor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            strategies: HashMap::new(),
            tools: Arc::new(NoTools),
        }
    }

    /// Registry with `voting` and `aggregation` pre-registered at `threshold`.
    pub fn with_default_strategies(threshold: f64) -> Self {
        let mut registry = Self::new();
        registry.register_strategy("voting", Arc::new(VotingStrategy::lexical(threshold)));
        registry.register_strategy(
            "aggregation",
            Arc::new(AggregationStrategy::lexical(threshold)),
        );
        registry
    }

    /// Register every `[agents.*]` entry, building invokers with `factory`.
    pub fn register_from_config(
        &mut self,
        config: &AppConfig,
        factory: impl Fn(&AgentProfile) -> Arc<dyn AgentInvoker>,
    ) -> &mut Self {
        for (name, agent) in &config.agents {
            let profile = AgentProfile::from_config(name, agent);
            let invoker = factory(&profile);
            self.register_agent(profile, invoker);
        }
        self
    }

    pub fn register_agent(
        &mut self,
        profile: AgentProfile,
        invoker: Arc<dyn AgentInvoker>,
    ) -> &mut Self {
        debug!(agent = %profile.name, model = %profile.model.model_id, "Registered agent");
        self.agents
            .insert(profile.name.clone(), RegisteredAgent { profile, invoker });
        self
    }

    pub fn register_strategy(
        &mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ConsensusStrategy>,
    ) -> &mut Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    pub fn set_tools(&mut self, tools: Arc<dyn ToolExecutor>) -> &mut Self {
        self.tools = tools;
        self
    }

    pub fn unregister_agent(&mut self, name: &str) -> Option<RegisteredAgent> {
        self.agents.remove(name)
    }

    pub fn agent(&self, name: &str) -> Option<&RegisteredAgent> {
        self.agents.get(name)
    }

    pub fn strategy(&self, name: &str) -> Option<Arc<dyn ConsensusStrategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn tools(&self) -> Arc<dyn ToolExecutor> {
        Arc::clone(&self.tools)
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Agent names, sorted.
    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Strategy names, sorted.
    pub fn strategy_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
