//! Interceptor pipeline: cross-cutting policy around every model invocation.
//!
//! `before` hooks run in registration order and may short-circuit the call;
//! `after` hooks run in reverse order, so the last registered interceptor sees
//! the rawest response first. Interceptor errors are logged and ignored; only
//! an explicit `ShortCircuit::Reject` can stop an invocation.

pub mod budget;
pub mod context_window;
pub mod cost;
pub mod metrics;
pub mod usage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use quorum_core::config::ModelConfig;
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::AgentInvoker;
use quorum_core::types::{ChatMessage, ModelResponse, RunEvent, TokenUsage};
use quorum_llm::PricingTable;

use crate::budget::Reservation;
use crate::run_context::RunContext;
use crate::tokens::estimate_prompt_tokens;

pub use budget::BudgetInterceptor;
pub use context_window::ContextWindowGuard;
pub use cost::CostInterceptor;
pub use metrics::MetricsInterceptor;
pub use usage::UsageInterceptor;

const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Request side of an invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub model: ModelConfig,
    pub messages: Vec<ChatMessage>,
    /// Workflow step that issued the call, if any.
    pub step_id: Option<String>,
    /// Tool rounds completed so far in the calling continuation.
    pub depth: usize,
    /// Retry attempt (0 for the first try).
    pub attempt: u32,
    pub timeout: Duration,
    pub budget_remaining_tokens: Option<u64>,
    pub budget_remaining_usd: Option<f64>,
}

impl InvocationRequest {
    pub fn new(model: ModelConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            model,
            messages,
            step_id: None,
            depth: 0,
            attempt: 0,
            timeout: DEFAULT_INVOKE_TIMEOUT,
            budget_remaining_tokens: None,
            budget_remaining_usd: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_step(mut self, step_id: Option<String>) -> Self {
        self.step_id = step_id;
        self
    }
}

/// Response side of an invocation, filled in by `after` hooks.
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub usage: TokenUsage,
    /// True when usage was estimated locally because the provider reported none.
    pub usage_estimated: bool,
    pub cost_estimate: f64,
    pub latency_ms: u64,
}

/// Per-invocation state, owned by exactly one in-flight call.
#[derive(Debug)]
pub struct InterceptorContext {
    pub request: InvocationRequest,
    pub response: ResponseMetadata,
    pub run: RunContext,
    pub reservation: Option<Reservation>,
    pub annotations: HashMap<String, serde_json::Value>,
    prompt_tokens: Option<usize>,
}

impl InterceptorContext {
    pub fn new(request: InvocationRequest, run: RunContext) -> Self {
        Self {
            request,
            response: ResponseMetadata::default(),
            run,
            reservation: None,
            annotations: HashMap::new(),
            prompt_tokens: None,
        }
    }

    /// Estimated prompt tokens for the request, computed once.
    pub fn prompt_tokens(&mut self) -> usize {
        if let Some(tokens) = self.prompt_tokens {
            return tokens;
        }
        let tokens = estimate_prompt_tokens(&self.request.messages);
        self.prompt_tokens = Some(tokens);
        tokens
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.annotations.insert(key.into(), value);
    }
}

/// How a `before` hook lets the invocation proceed.
#[derive(Debug)]
pub enum Flow {
    Continue,
    ShortCircuit(ShortCircuit),
}

/// A synthetic outcome that replaces the model call.
#[derive(Debug)]
pub enum ShortCircuit {
    /// Answer without calling the model.
    Respond(ModelResponse),
    /// Refuse the call; the error is surfaced to the caller.
    Reject(QuorumError),
}

/// A cross-cutting policy unit wrapping an agent invocation.
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn before(&self, ctx: &mut InterceptorContext) -> Result<Flow> {
        let _ = ctx;
        Ok(Flow::Continue)
    }

    fn after(&self, ctx: &mut InterceptorContext, response: &mut ModelResponse) -> Result<()> {
        let _ = (ctx, response);
        Ok(())
    }

    /// Called in reverse order on interceptors whose `before` ran when the call
    /// will not reach `after` (invoker failure, or a later short-circuit).
    fn on_abort(&self, ctx: &mut InterceptorContext) {
        let _ = ctx;
    }
}

/// Ordered interceptor chain.
#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics, context-window guard (when limited), budget, cost and usage, in that order.
    pub fn standard(pricing: Arc<PricingTable>, max_context_tokens: Option<usize>) -> Self {
        let mut pipeline = Self::new();
        pipeline.push(MetricsInterceptor);
        if let Some(limit) = max_context_tokens {
            pipeline.push(ContextWindowGuard::new(limit));
        }
        pipeline.push(BudgetInterceptor::new(pricing.clone()));
        pipeline.push(CostInterceptor::new(pricing));
        pipeline.push(UsageInterceptor::default());
        pipeline
    }

    pub fn push(&mut self, interceptor: impl Interceptor) -> &mut Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push_arc(&mut self, interceptor: Arc<dyn Interceptor>) -> &mut Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Run one invocation through the chain.
    ///
    /// The invoker call is bounded by `ctx.request.timeout` and raced against
    /// the run's cancellation token.
    pub async fn invoke(
        &self,
        invoker: &dyn AgentInvoker,
        ctx: &mut InterceptorContext,
    ) -> Result<ModelResponse> {
        ctx.request.budget_remaining_tokens = ctx.run.budget.remaining_tokens();
        ctx.request.budget_remaining_usd = ctx.run.budget.remaining_usd();

        for (index, interceptor) in self.interceptors.iter().enumerate() {
            match interceptor.before(ctx) {
                Ok(Flow::Continue) => {}
                Ok(Flow::ShortCircuit(outcome)) => {
                    for earlier in self.interceptors[..index].iter().rev() {
                        earlier.on_abort(ctx);
                    }
                    return self.short_circuit(interceptor.name(), ctx, outcome);
                }
                Err(e) => {
                    warn!(interceptor = interceptor.name(), error = %e, "Interceptor before-hook failed, ignoring");
                }
            }
        }

        let cancel = ctx.run.cancel.clone();
        let timeout = ctx.request.timeout;
        let started = Instant::now();
        let call = invoker.invoke(ctx.request.messages.clone(), &ctx.request.model, cancel.clone());

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(QuorumError::Timeout {
                    operation: format!("invoke {}", ctx.request.model.model_id),
                    timeout_secs: timeout.as_secs(),
                }),
            },
            _ = cancel.cancelled() => Err(QuorumError::Cancelled),
        };
        ctx.response.latency_ms = started.elapsed().as_millis() as u64;

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                for interceptor in self.interceptors.iter().rev() {
                    interceptor.on_abort(ctx);
                }
                return Err(e);
            }
        };

        for interceptor in self.interceptors.iter().rev() {
            if let Err(e) = interceptor.after(ctx, &mut response) {
                warn!(interceptor = interceptor.name(), error = %e, "Interceptor after-hook failed, ignoring");
            }
        }

        Ok(response)
    }

    fn short_circuit(
        &self,
        name: &str,
        ctx: &mut InterceptorContext,
        outcome: ShortCircuit,
    ) -> Result<ModelResponse> {
        match outcome {
            ShortCircuit::Respond(response) => {
                debug!(interceptor = name, "Invocation answered by interceptor");
                Ok(response)
            }
            ShortCircuit::Reject(error) => {
                debug!(interceptor = name, error = %error, "Invocation rejected by interceptor");
                ctx.run.publish(RunEvent::InvocationRejected {
                    run_id: ctx.run.run_id.clone(),
                    interceptor: name.to_string(),
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }
}
