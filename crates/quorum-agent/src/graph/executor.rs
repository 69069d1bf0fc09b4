use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quorum_core::config::{AppConfig, BudgetConfig};
use quorum_core::error::{GraphError, QuorumError, Result};
use quorum_core::event::EventBus;
use quorum_core::types::{ConversationState, RunEvent, RunId, TokenUsage};
use quorum_llm::PricingTable;

use super::binding::default_input;
use super::run::{RunStatus, StepFailure, StepRecord, StepState, WorkflowRun};
use super::step::{StepKind, WorkflowDefinition};
use super::validate::WorkflowGraph;
use crate::budget::BudgetTracker;
use crate::consensus::{Candidate, ConsensusInput, ConsensusStrategy};
use crate::continuation::{Continuation, ContinuationOptions};
use crate::interceptor::InterceptorPipeline;
use crate::registry::{AgentRegistry, RegisteredAgent};
use crate::run_context::RunContext;

/// Per-step handler, resolved once before the run starts.
enum Handler {
    Agent(RegisteredAgent),
    Branch,
    Merge(Arc<dyn ConsensusStrategy>),
    Terminal,
}

/// What a step needs to run.
enum StepInput {
    Text(String),
    Candidates(ConsensusInput),
}

struct StepOutcome {
    result: Result<String>,
    elapsed_ms: u64,
    depth: usize,
    usage: TokenUsage,
    cost: f64,
}

impl StepOutcome {
    fn plain(result: Result<String>) -> Self {
        Self {
            result,
            elapsed_ms: 0,
            depth: 0,
            usage: TokenUsage::default(),
            cost: 0.0,
        }
    }
}

/// Runs workflows against a registry of agents and consensus strategies.
///
/// Each `run` validates the definition, resolves every step handler, then
/// schedules steps as soon as all their dependencies have finished. Steps
/// with no ordering between them run concurrently.
pub struct WorkflowExecutor {
    registry: AgentRegistry,
    pipeline: InterceptorPipeline,
    options: ContinuationOptions,
    budget: BudgetConfig,
    events: Arc<EventBus>,
    retain: usize,
    recent: Mutex<VecDeque<WorkflowRun>>,
}

impl WorkflowExecutor {
    /// Executor with the standard interceptors, default limits and no budget.
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            pipeline: InterceptorPipeline::standard(Arc::new(PricingTable::default()), None),
            options: ContinuationOptions::default(),
            budget: BudgetConfig::default(),
            events: Arc::new(EventBus::default()),
            retain: 0,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Executor configured from `[engine]`, `[retry]`, `[budget]`, `[context]` and `[pricing]`.
    pub fn from_config(config: &AppConfig, registry: AgentRegistry) -> Self {
        let pricing = Arc::new(PricingTable::with_overrides(&config.pricing));
        Self::new(registry)
            .with_pipeline(InterceptorPipeline::standard(
                pricing,
                config.context.max_context_tokens,
            ))
            .with_options(ContinuationOptions::from_config(&config.engine, &config.retry))
            .with_budget(config.budget.clone())
    }

    pub fn with_pipeline(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_options(mut self, options: ContinuationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Keep the last `count` finished runs for inspection.
    pub fn retain_runs(mut self, count: usize) -> Self {
        self.retain = count;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Retained runs, oldest first.
    pub fn recent_runs(&self) -> Vec<WorkflowRun> {
        match self.recent.lock() {
            Ok(recent) => recent.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Validate `definition` and run it to completion with a fresh run id.
    ///
    /// `Err` means the workflow was rejected before any step executed. Step
    /// failures do not produce `Err`; they are recorded in the returned run.
    pub async fn run(&self, definition: &WorkflowDefinition, input: &str) -> Result<WorkflowRun> {
        self.run_with_cancel(definition, input, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        definition: &WorkflowDefinition,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun> {
        let graph = WorkflowGraph::build(definition)?;
        let handlers = self.resolve(&graph)?;

        let ctx = RunContext::new(
            RunId::new(),
            cancel,
            Arc::new(BudgetTracker::from_config(&self.budget)),
            Arc::clone(&self.events),
        );
        let run = self.drive(&graph, &handlers, input, ctx).await;

        if self.retain > 0 {
            if let Ok(mut recent) = self.recent.lock() {
                recent.push_back(run.clone());
                while recent.len() > self.retain {
                    recent.pop_front();
                }
            }
        }
        Ok(run)
    }

    fn resolve(&self, graph: &WorkflowGraph) -> Result<Vec<Handler>> {
        graph.check_references(
            |agent| self.registry.has_agent(agent),
            |strategy| self.registry.has_strategy(strategy),
        )?;

        let mut handlers = Vec::with_capacity(graph.len());
        for step in graph.steps() {
            let handler = match step.kind {
                StepKind::AgentCall => {
                    let name = step.agent.as_deref().unwrap_or_default();
                    let agent = self.registry.agent(name).ok_or_else(|| {
                        GraphError::UnknownAgent {
                            step: step.id.clone(),
                            agent: name.to_string(),
                        }
                    })?;
                    Handler::Agent(agent.clone())
                }
                StepKind::Merge => {
                    let name = step.strategy.as_deref().unwrap_or_default();
                    let strategy = self.registry.strategy(name).ok_or_else(|| {
                        GraphError::UnknownStrategy {
                            step: step.id.clone(),
                            strategy: name.to_string(),
                        }
                    })?;
                    Handler::Merge(strategy)
                }
                StepKind::Branch => Handler::Branch,
                StepKind::Terminal => Handler::Terminal,
            };
            handlers.push(handler);
        }
        Ok(handlers)
    }

    async fn drive(
        &self,
        graph: &WorkflowGraph,
        handlers: &[Handler],
        input: &str,
        ctx: RunContext,
    ) -> WorkflowRun {
        let started = Instant::now();
        let n = graph.len();
        let records = graph
            .steps()
            .iter()
            .map(|s| StepRecord::pending(&s.id, s.kind))
            .collect();
        let mut run = WorkflowRun::new(graph.workflow_id(), ctx.run_id.clone(), records);

        info!(run_id = %ctx.run_id, workflow = %graph.workflow_id(), steps = n, "Workflow run started");
        ctx.publish(RunEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            workflow_id: graph.workflow_id().to_string(),
        });

        // One cancellation scope per all-or-nothing branch group.
        let groups: HashMap<usize, CancellationToken> = (0..n)
            .filter(|&i| {
                let step = graph.step(i);
                step.kind == StepKind::Branch && step.all_or_nothing
            })
            .map(|i| (i, ctx.cancel.child_token()))
            .collect();

        let mut waiting: Vec<usize> = (0..n).map(|i| graph.dependencies(i).len()).collect();
        let mut ready: VecDeque<usize> = graph.roots().collect();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Some(i) = ready.pop_front() {
                if ctx.is_cancelled() {
                    self.skip(graph, &mut run, &ctx, i, &mut waiting, &mut ready);
                    continue;
                }
                match self.prepare(graph, handlers, &run, input, i) {
                    None => self.skip(graph, &mut run, &ctx, i, &mut waiting, &mut ready),
                    Some(step_input) => {
                        let step_ctx = match graph.all_or_nothing_group(i) {
                            Some(branch) => match groups.get(&branch) {
                                Some(token) => ctx.with_cancel(token.clone()),
                                None => ctx.clone(),
                            },
                            None => ctx.clone(),
                        };
                        debug!(run_id = %ctx.run_id, step = %graph.step(i).id, kind = %graph.step(i).kind, "Starting step");
                        ctx.publish(RunEvent::StepStarted {
                            run_id: ctx.run_id.clone(),
                            step_id: graph.step(i).id.clone(),
                        });
                        in_flight.push(self.execute_step(graph, handlers, i, step_input, step_ctx));
                    }
                }
            }

            let Some((i, outcome)) = in_flight.next().await else {
                break;
            };
            self.complete(graph, &mut run, &ctx, &groups, i, outcome);
            for &j in graph.dependents(i) {
                waiting[j] -= 1;
                if waiting[j] == 0 {
                    ready.push_back(j);
                }
            }
        }

        self.finalize(graph, &mut run, &ctx, started);
        run
    }

    /// Decide whether step `i` runs, and with what input. `None` means skip.
    fn prepare(
        &self,
        graph: &WorkflowGraph,
        handlers: &[Handler],
        run: &WorkflowRun,
        input: &str,
        i: usize,
    ) -> Option<StepInput> {
        let deps = graph.dependencies(i);
        if deps
            .iter()
            .any(|&d| run.steps[d].state != StepState::Completed)
        {
            return None;
        }

        if matches!(handlers[i], Handler::Merge(_)) {
            let candidates = deps
                .iter()
                .filter_map(|&d| {
                    let id = &graph.step(d).id;
                    run.outputs
                        .get(id)
                        .map(|text| Candidate::from_source(id.clone(), text.clone()))
                })
                .collect();
            return Some(StepInput::Candidates(ConsensusInput::new(candidates)));
        }

        let text = match graph.binding(i) {
            Some(binding) => match binding.render(input, &run.outputs) {
                Ok(text) => text,
                Err(missing) => {
                    warn!(step = %graph.step(i).id, reference = %missing, "Bound step produced no output");
                    return None;
                }
            },
            None => {
                let outputs: Vec<&str> = deps
                    .iter()
                    .filter_map(|&d| run.outputs.get(&graph.step(d).id).map(String::as_str))
                    .collect();
                default_input(input, &outputs)
            }
        };
        Some(StepInput::Text(text))
    }

    fn execute_step<'a>(
        &'a self,
        graph: &'a WorkflowGraph,
        handlers: &'a [Handler],
        i: usize,
        input: StepInput,
        ctx: RunContext,
    ) -> BoxFuture<'a, (usize, StepOutcome)> {
        Box::pin(async move {
            let started = Instant::now();
            let step_id = graph.step(i).id.as_str();
            let mut outcome = match (&handlers[i], input) {
                (Handler::Agent(agent), StepInput::Text(text)) => {
                    self.agent_step(agent, step_id, text, ctx).await
                }
                (Handler::Merge(strategy), StepInput::Candidates(candidates)) => {
                    let result = tokio::select! {
                        result = strategy.run(&candidates) => result.map(|r| {
                            debug!(step = step_id, strategy = strategy.name(), group_size = r.group_size, score = r.score, "Consensus reached");
                            r.text
                        }),
                        _ = ctx.cancel.cancelled() => Err(QuorumError::Cancelled),
                    };
                    StepOutcome::plain(result)
                }
                (Handler::Branch | Handler::Terminal, StepInput::Text(text)) => {
                    StepOutcome::plain(Ok(text))
                }
                (_, _) => StepOutcome::plain(Err(QuorumError::Config(format!(
                    "step '{}' received input of the wrong shape",
                    step_id
                )))),
            };
            outcome.elapsed_ms = started.elapsed().as_millis() as u64;
            (i, outcome)
        })
    }

    async fn agent_step(
        &self,
        agent: &RegisteredAgent,
        step_id: &str,
        input: String,
        ctx: RunContext,
    ) -> StepOutcome {
        let tools = self.registry.tools();
        let conversation =
            ConversationState::start(agent.profile.system_prompt.as_deref(), input);
        let mut turn = Continuation::new(
            agent.invoker.as_ref(),
            tools.as_ref(),
            &self.pipeline,
            &self.options,
            &agent.profile.model,
            ctx,
        )
        .with_step(step_id);

        let result = turn.run(conversation).await.map(|outcome| outcome.content);
        StepOutcome {
            result,
            elapsed_ms: 0,
            depth: turn.depth(),
            usage: turn.usage(),
            cost: turn.cost(),
        }
    }

    fn complete(
        &self,
        graph: &WorkflowGraph,
        run: &mut WorkflowRun,
        ctx: &RunContext,
        groups: &HashMap<usize, CancellationToken>,
        i: usize,
        outcome: StepOutcome,
    ) {
        let step_id = graph.step(i).id.clone();
        let record = &mut run.steps[i];
        record.elapsed_ms = outcome.elapsed_ms;
        record.depth = outcome.depth;
        record.usage = outcome.usage;
        record.cost = outcome.cost;

        match outcome.result {
            Ok(output) => {
                record.state = StepState::Completed;
                debug!(run_id = %ctx.run_id, step = %step_id, elapsed_ms = outcome.elapsed_ms, "Step completed");
                ctx.publish(RunEvent::StepCompleted {
                    run_id: ctx.run_id.clone(),
                    step_id: step_id.clone(),
                    elapsed_ms: outcome.elapsed_ms,
                });
                run.outputs.insert(step_id, output);
            }
            Err(error) => {
                record.state = StepState::Failed;
                record.error_kind = Some(error.kind());
                warn!(run_id = %ctx.run_id, step = %step_id, kind = %error.kind(), error = %error, "Step failed");
                ctx.publish(RunEvent::StepFailed {
                    run_id: ctx.run_id.clone(),
                    step_id: step_id.clone(),
                    kind: error.kind(),
                    message: error.to_string(),
                });
                run.failures.push(StepFailure::new(Some(step_id.clone()), &error));

                if let Some(branch) = graph.all_or_nothing_group(i) {
                    if let Some(token) = groups.get(&branch) {
                        if !token.is_cancelled() {
                            info!(run_id = %ctx.run_id, branch = %graph.step(branch).id, failed = %step_id, "Cancelling all-or-nothing group");
                            token.cancel();
                        }
                    }
                }
            }
        }
    }

    fn skip(
        &self,
        graph: &WorkflowGraph,
        run: &mut WorkflowRun,
        ctx: &RunContext,
        i: usize,
        waiting: &mut [usize],
        ready: &mut VecDeque<usize>,
    ) {
        let step_id = graph.step(i).id.clone();
        run.steps[i].state = StepState::Skipped;
        debug!(run_id = %ctx.run_id, step = %step_id, "Step skipped");
        ctx.publish(RunEvent::StepSkipped {
            run_id: ctx.run_id.clone(),
            step_id,
        });
        for &j in graph.dependents(i) {
            waiting[j] -= 1;
            if waiting[j] == 0 {
                ready.push_back(j);
            }
        }
    }

    fn finalize(
        &self,
        graph: &WorkflowGraph,
        run: &mut WorkflowRun,
        ctx: &RunContext,
        started: Instant,
    ) {
        let cancelled = ctx.is_cancelled();
        if cancelled {
            run.cancelled = true;
            run.failures
                .push(StepFailure::new(None, &QuorumError::Cancelled));
        }

        for record in &run.steps {
            run.usage.add(record.usage);
            run.cost += record.cost;
        }

        run.final_output = graph
            .terminals()
            .find(|&t| run.steps[t].state == StepState::Completed)
            .and_then(|t| run.outputs.get(&graph.step(t).id).cloned());

        let any_failed = run
            .steps
            .iter()
            .any(|record| record.state == StepState::Failed);

        run.status = if !cancelled && !any_failed && run.final_output.is_some() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        run.elapsed = started.elapsed();

        let elapsed_ms = run.elapsed.as_millis() as u64;
        if run.succeeded() {
            info!(run_id = %ctx.run_id, elapsed_ms, cost = run.cost, "Workflow run succeeded");
        } else {
            warn!(
                run_id = %ctx.run_id,
                elapsed_ms,
                failures = run.failures.len(),
                kind = run.failure_kind().map(|k| k.to_string()).unwrap_or_default(),
                "Workflow run failed"
            );
        }
        ctx.publish(RunEvent::RunFinished {
            run_id: ctx.run_id.clone(),
            succeeded: run.succeeded(),
            elapsed_ms,
        });
    }
}
