use std::sync::Arc;

use tracing::debug;

use quorum_core::error::Result;
use quorum_core::types::{ModelResponse, TokenUsage};
use quorum_llm::PricingTable;

use super::{Flow, Interceptor, InterceptorContext, ShortCircuit};

/// Reserves the worst-case spend of a call (estimated prompt plus the model's
/// `max_tokens` of output) before invoking, and settles down to the actual
/// usage afterwards. Reservation is atomic, so concurrent steps sharing one
/// run budget cannot jointly overshoot it.
pub struct BudgetInterceptor {
    pricing: Arc<PricingTable>,
}

impl BudgetInterceptor {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }
}

impl Interceptor for BudgetInterceptor {
    fn name(&self) -> &str {
        "budget"
    }

    fn before(&self, ctx: &mut InterceptorContext) -> Result<Flow> {
        let (tokens, cost) = if ctx.run.budget.is_limited() {
            let prompt = ctx.prompt_tokens() as u64;
            let model = &ctx.request.model;
            let worst_case = TokenUsage::new(prompt, u64::from(model.max_tokens));
            (worst_case.total(), self.pricing.cost(&model.model_id, worst_case))
        } else {
            (0, 0.0)
        };

        match ctx.run.budget.try_reserve(tokens, cost) {
            Ok(reservation) => {
                ctx.reservation = Some(reservation);
                Ok(Flow::Continue)
            }
            Err(e) => {
                debug!(
                    model = %ctx.request.model.model_id,
                    tokens,
                    cost,
                    "Budget reservation refused"
                );
                Ok(Flow::ShortCircuit(ShortCircuit::Reject(e)))
            }
        }
    }

    fn after(&self, ctx: &mut InterceptorContext, response: &mut ModelResponse) -> Result<()> {
        if let Some(reservation) = ctx.reservation.take() {
            let usage = if ctx.response.usage.is_empty() {
                response.usage
            } else {
                ctx.response.usage
            };
            ctx.run
                .budget
                .settle(reservation, usage.total(), ctx.response.cost_estimate);
        }
        Ok(())
    }

    fn on_abort(&self, ctx: &mut InterceptorContext) {
        if let Some(reservation) = ctx.reservation.take() {
            ctx.run.budget.release(reservation);
        }
    }
}
