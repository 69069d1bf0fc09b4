use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quorum_core::config::{AppConfig, ModelConfig};
use quorum_core::error::Result as QuorumResult;
use quorum_core::traits::AgentInvoker;
use quorum_core::types::{ChatMessage, ModelResponse, Role, TokenUsage};

use quorum_agent::graph::{StepKind, WorkflowDefinition, WorkflowGraph};
use quorum_agent::{AgentRegistry, RunLogger, WorkflowExecutor};
use quorum_llm::PricingTable;

#[derive(Parser)]
#[command(name = "quorum", version, about = "Multi-agent workflow orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "quorum.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file against the configured agents
    Validate {
        /// Workflow TOML file
        workflow: PathBuf,
    },
    /// Print the execution plan (concurrent waves) of a workflow
    Plan {
        /// Workflow TOML file
        workflow: PathBuf,
    },
    /// Price a token count for a model
    Price {
        /// Model name; unknown models cost 0
        model: String,
        /// Input tokens
        #[arg(long, default_value = "1000")]
        input: u64,
        /// Output tokens
        #[arg(long, default_value = "1000")]
        output: u64,
    },
    /// Show the effective configuration
    Config,
    /// Run a workflow offline: every agent echoes its prompt
    Simulate {
        /// Workflow TOML file
        workflow: PathBuf,
        /// Workflow input
        #[arg(trailing_var_arg = true)]
        input: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quorum=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
        AppConfig::default()
    };

    match cli.command {
        Commands::Validate { workflow } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            let graph = WorkflowGraph::build(&definition)?;
            let registry = AgentRegistry::with_default_strategies(config.consensus.threshold);
            graph.check_references(
                |agent| config.agents.contains_key(agent),
                |strategy| registry.has_strategy(strategy),
            )?;
            println!(
                "workflow '{}' is valid: {} steps, {} waves",
                graph.workflow_id(),
                graph.len(),
                graph.waves().len()
            );
        }
        Commands::Plan { workflow } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            let graph = WorkflowGraph::build(&definition)?;
            print_plan(&graph);
        }
        Commands::Price {
            model,
            input,
            output,
        } => {
            let pricing = PricingTable::with_overrides(&config.pricing);
            let cost = pricing.cost(&model, TokenUsage::new(input, output));
            match pricing.lookup(&model) {
                Some(rates) => println!(
                    "{}: {} in / {} out = ${:.6} (rates {}/{} per 1k)",
                    model, input, output, cost, rates.input_per_1k, rates.output_per_1k
                ),
                None => println!("{}: no pricing entry, cost ${:.6}", model, cost),
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Simulate { workflow, input } => {
            let definition = WorkflowDefinition::load(&workflow)?;
            simulate(&config, &definition, &input.join(" ")).await?;
        }
    }

    Ok(())
}

fn print_plan(graph: &WorkflowGraph) {
    println!("workflow '{}'", graph.workflow_id());
    for (wave, members) in graph.waves().iter().enumerate() {
        println!("wave {}:", wave);
        for &i in members {
            let step = graph.step(i);
            let detail = match step.kind {
                StepKind::AgentCall => step.agent.clone().unwrap_or_default(),
                StepKind::Merge => step.strategy.clone().unwrap_or_default(),
                StepKind::Branch if step.all_or_nothing => "all-or-nothing".to_string(),
                StepKind::Branch | StepKind::Terminal => String::new(),
            };
            let deps: Vec<&str> = graph
                .dependencies(i)
                .iter()
                .map(|&d| graph.step(d).id.as_str())
                .collect();
            println!(
                "  {:<16} {:<10} {:<16} <- [{}]",
                step.id,
                step.kind,
                detail,
                deps.join(", ")
            );
        }
    }
}

async fn simulate(config: &AppConfig, definition: &WorkflowDefinition, input: &str) -> anyhow::Result<()> {
    let mut registry = AgentRegistry::with_default_strategies(config.consensus.threshold);
    registry.register_from_config(config, |_| Arc::new(EchoInvoker));
    let executor = WorkflowExecutor::from_config(config, registry);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Cancelling run...");
        cancel_clone.cancel();
    });

    let logger = match &config.log {
        Some(log) if log.enabled => {
            Some(RunLogger::new(log.dir_path(), 3).spawn(&executor.events(), cancel.clone()))
        }
        _ => None,
    };

    let run = executor.run_with_cancel(definition, input, cancel).await?;

    if let Some(handle) = logger {
        if let Ok(Some(path)) = handle.await {
            info!(path = %path.display(), "Run log written");
        }
    }

    println!("{}", serde_json::to_string_pretty(&run)?);
    println!("{}", run.summary());
    Ok(())
}

/// Offline invoker: answers with the last user message, prefixed by the model id.
struct EchoInvoker;

impl AgentInvoker for EchoInvoker {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        model: &ModelConfig,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, QuorumResult<ModelResponse>> {
        let model_id = model.model_id.clone();
        Box::pin(async move {
            let prompt = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ModelResponse::final_answer(format!("[{}] {}", model_id, prompt)))
        })
    }
}
