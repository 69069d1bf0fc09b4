use tracing::debug;

use quorum_core::error::Result;
use quorum_core::types::{ModelResponse, RunEvent};

use super::{Interceptor, InterceptorContext};

/// Logs each completed invocation and publishes a usage update. Registered
/// first so its `after` sees the final usage and cost.
pub struct MetricsInterceptor;

impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &str {
        "metrics"
    }

    fn after(&self, ctx: &mut InterceptorContext, response: &mut ModelResponse) -> Result<()> {
        let usage = ctx.response.usage;
        debug!(
            run_id = %ctx.run.run_id,
            step = ctx.request.step_id.as_deref().unwrap_or("-"),
            model = %ctx.request.model.model_id,
            depth = ctx.request.depth,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            estimated = ctx.response.usage_estimated,
            cost = ctx.response.cost_estimate,
            latency_ms = ctx.response.latency_ms,
            tool_calls = response.tool_calls.len(),
            "Model invocation complete"
        );
        ctx.run.publish(RunEvent::UsageUpdate {
            run_id: ctx.run.run_id.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: ctx.response.cost_estimate,
        });
        Ok(())
    }
}
