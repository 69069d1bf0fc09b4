//! The model ⇄ tool continuation loop for a single agent turn.

use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use quorum_core::config::{EngineConfig, ModelConfig, RetryConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::{AgentInvoker, ToolExecutor};
use quorum_core::types::{
    ChatMessage, ConversationState, ModelResponse, RunEvent, TokenUsage, ToolCallRequest,
    ToolCallResult,
};
use quorum_llm::RetryPolicy;

use crate::interceptor::{InterceptorContext, InterceptorPipeline, InvocationRequest};
use crate::run_context::RunContext;

/// Where a continuation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinuationState {
    Idle,
    AwaitingModel,
    ToolRequested,
    ToolExecuting,
    Complete,
    Failed,
}

impl ContinuationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: Self) -> bool {
        use ContinuationState::*;
        match (self, next) {
            (Idle, AwaitingModel) => true,
            (AwaitingModel, ToolRequested | Complete) => true,
            (ToolRequested, ToolExecuting) => true,
            (ToolExecuting, AwaitingModel) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ContinuationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::ToolRequested => "tool_requested",
            Self::ToolExecuting => "tool_executing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Limits and policies applied to every continuation.
#[derive(Debug, Clone)]
pub struct ContinuationOptions {
    /// Maximum tool rounds per turn. A request for one more round fails the turn.
    pub max_depth: usize,
    pub invoke_timeout: Duration,
    pub tool_timeout: Duration,
    pub parallel_tools: bool,
    pub retry: RetryPolicy,
}

impl ContinuationOptions {
    pub fn from_config(engine: &EngineConfig, retry: &RetryConfig) -> Self {
        Self {
            max_depth: engine.max_continuation_depth,
            invoke_timeout: engine.invoke_timeout(),
            tool_timeout: engine.tool_timeout(),
            parallel_tools: engine.parallel_tools,
            retry: RetryPolicy::from_config(engine, retry),
        }
    }
}

impl Default for ContinuationOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), &RetryConfig::default())
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub content: String,
    pub conversation: ConversationState,
    /// Tool rounds executed.
    pub depth: usize,
    pub invocations: u32,
    pub usage: TokenUsage,
    pub cost: f64,
    pub states: Vec<ContinuationState>,
}

/// Drives one agent turn: invoke the model through the interceptor pipeline,
/// execute requested tools, feed results back, repeat until a final answer.
///
/// Usage and the state trace stay readable after `run` fails.
pub struct Continuation<'a> {
    invoker: &'a dyn AgentInvoker,
    tools: &'a dyn ToolExecutor,
    pipeline: &'a InterceptorPipeline,
    options: &'a ContinuationOptions,
    model: &'a ModelConfig,
    run: RunContext,
    step_id: Option<String>,
    state: ContinuationState,
    trace: Vec<ContinuationState>,
    depth: usize,
    invocations: u32,
    usage: TokenUsage,
    cost: f64,
}

impl<'a> Continuation<'a> {
    pub fn new(
        invoker: &'a dyn AgentInvoker,
        tools: &'a dyn ToolExecutor,
        pipeline: &'a InterceptorPipeline,
        options: &'a ContinuationOptions,
        model: &'a ModelConfig,
        run: RunContext,
    ) -> Self {
        Self {
            invoker,
            tools,
            pipeline,
            options,
            model,
            run,
            step_id: None,
            state: ContinuationState::Idle,
            trace: vec![ContinuationState::Idle],
            depth: 0,
            invocations: 0,
            usage: TokenUsage::default(),
            cost: 0.0,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn state(&self) -> ContinuationState {
        self.state
    }

    pub fn states(&self) -> &[ContinuationState] {
        &self.trace
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Run the turn to completion. A continuation runs once; calling `run`
    /// again after it reached a terminal state fails immediately.
    pub async fn run(&mut self, mut conversation: ConversationState) -> Result<TurnOutcome> {
        if self.state != ContinuationState::Idle {
            return Err(QuorumError::Config(format!(
                "continuation already {}",
                self.state
            )));
        }
        self.transition(ContinuationState::AwaitingModel);

        loop {
            if self.run.is_cancelled() {
                return Err(self.fail(QuorumError::Cancelled));
            }

            let response = match self.invoke_with_retry(&conversation).await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };

            if !response.requests_tools() {
                conversation.push(ChatMessage::assistant(response.content.clone()));
                self.transition(ContinuationState::Complete);
                debug!(
                    step = self.step_id.as_deref().unwrap_or("-"),
                    depth = self.depth,
                    invocations = self.invocations,
                    "Continuation complete"
                );
                return Ok(TurnOutcome {
                    content: response.content,
                    conversation,
                    depth: self.depth,
                    invocations: self.invocations,
                    usage: self.usage,
                    cost: self.cost,
                    states: self.trace.clone(),
                });
            }

            self.transition(ContinuationState::ToolRequested);
            if self.depth >= self.options.max_depth {
                return Err(self.fail(QuorumError::ContinuationLimitExceeded(
                    self.options.max_depth,
                )));
            }

            let ModelResponse {
                content,
                tool_calls,
                ..
            } = response;
            conversation.push(ChatMessage::assistant_with_tools(content, tool_calls.clone()));

            self.transition(ContinuationState::ToolExecuting);
            let results = self.execute_tools(&tool_calls).await;
            if self.run.is_cancelled() {
                return Err(self.fail(QuorumError::Cancelled));
            }
            for result in &results {
                conversation.push(ChatMessage::tool_result(result));
            }

            self.depth += 1;
            self.transition(ContinuationState::AwaitingModel);
        }
    }

    fn transition(&mut self, next: ContinuationState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal continuation transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.trace.push(next);
    }

    fn fail(&mut self, error: QuorumError) -> QuorumError {
        warn!(
            step = self.step_id.as_deref().unwrap_or("-"),
            state = %self.state,
            depth = self.depth,
            error = %error,
            "Continuation failed"
        );
        self.transition(ContinuationState::Failed);
        error
    }

    async fn invoke_with_retry(&mut self, conversation: &ConversationState) -> Result<ModelResponse> {
        let mut attempt = 0u32;
        loop {
            let mut request =
                InvocationRequest::new(self.model.clone(), conversation.messages().to_vec())
                    .with_timeout(self.options.invoke_timeout)
                    .with_step(self.step_id.clone());
            request.depth = self.depth;
            request.attempt = attempt;

            let mut ctx = InterceptorContext::new(request, self.run.clone());
            self.invocations += 1;
            self.run.publish(RunEvent::ModelInvoked {
                run_id: self.run.run_id.clone(),
                step_id: self.step_id.clone(),
                depth: self.depth,
            });

            match self.pipeline.invoke(self.invoker, &mut ctx).await {
                Ok(response) => {
                    self.record_usage(&ctx, &response);
                    return Ok(response);
                }
                Err(e) if self.options.retry.should_retry(&e, attempt) => {
                    let delay = self.options.retry.backoff(attempt);
                    warn!(
                        model = %self.model.model_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Model invocation failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.run.cancel.cancelled() => return Err(QuorumError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_usage(&mut self, ctx: &InterceptorContext, response: &ModelResponse) {
        let usage = if ctx.response.usage.is_empty() {
            response.usage
        } else {
            ctx.response.usage
        };
        let cost = if ctx.response.cost_estimate > 0.0 {
            ctx.response.cost_estimate
        } else {
            response.cost_estimate.max(0.0)
        };
        self.usage.add(usage);
        self.cost += cost;
    }

    /// Execute one batch of tool calls. Results come back in request order
    /// regardless of completion order.
    async fn execute_tools(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        for call in calls {
            self.run.publish(RunEvent::ToolStart {
                run_id: self.run.run_id.clone(),
                call_id: call.id.clone(),
                name: call.name.clone(),
            });
        }

        let results = if self.options.parallel_tools && calls.len() > 1 {
            join_all(calls.iter().map(|call| self.execute_tool(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_tool(call).await);
            }
            results
        };

        for result in &results {
            self.run.publish(RunEvent::ToolEnd {
                run_id: self.run.run_id.clone(),
                call_id: result.call_id.clone(),
                name: result.name.clone(),
                is_error: result.is_error,
            });
        }
        results
    }

    /// A timed-out tool call is retried once; any other failure becomes an
    /// error result the model can react to.
    async fn execute_tool(&self, call: &ToolCallRequest) -> ToolCallResult {
        let timeout = self.options.tool_timeout;
        let mut timed_out = false;
        loop {
            let fut = self
                .tools
                .execute(&call.name, call.arguments.clone(), self.run.cancel.clone());
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(timeout, fut) => outcome,
                _ = self.run.cancel.cancelled() => {
                    return ToolCallResult::error(call, QuorumError::Cancelled.to_string());
                }
            };

            match outcome {
                Ok(Ok(content)) => return ToolCallResult::success(call, content),
                Ok(Err(e)) => {
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                    return ToolCallResult::error(call, e.to_string());
                }
                Err(_) if !timed_out => {
                    info!(tool = %call.name, call_id = %call.id, "Tool timed out, retrying once");
                    timed_out = true;
                }
                Err(_) => {
                    let error = QuorumError::Timeout {
                        operation: format!("tool {}", call.name),
                        timeout_secs: timeout.as_secs(),
                    };
                    warn!(tool = %call.name, call_id = %call.id, error = %error, "Tool timed out twice");
                    return ToolCallResult::error(call, error.to_string());
                }
            }
        }
    }
}
