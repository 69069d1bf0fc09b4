use std::sync::Arc;

use quorum_core::error::Result;
use quorum_core::types::ModelResponse;
use quorum_llm::PricingTable;

use super::{Interceptor, InterceptorContext};

/// Fills in the cost estimate from the pricing table when the invoker did not supply one.
pub struct CostInterceptor {
    pricing: Arc<PricingTable>,
}

impl CostInterceptor {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self { pricing }
    }
}

impl Interceptor for CostInterceptor {
    fn name(&self) -> &str {
        "cost"
    }

    fn after(&self, ctx: &mut InterceptorContext, response: &mut ModelResponse) -> Result<()> {
        if !(response.cost_estimate.is_finite() && response.cost_estimate > 0.0) {
            let usage = if ctx.response.usage.is_empty() {
                response.usage
            } else {
                ctx.response.usage
            };
            response.cost_estimate = self.pricing.cost(&ctx.request.model.model_id, usage);
        }
        ctx.response.cost_estimate = response.cost_estimate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::InvocationRequest;
    use crate::run_context::RunContext;
    use quorum_core::config::ModelConfig;
    use quorum_core::types::ChatMessage;

    fn ctx(model: &str) -> InterceptorContext {
        InterceptorContext::new(
            InvocationRequest::new(ModelConfig::new(model), vec![ChatMessage::user("q")]),
            RunContext::detached(),
        )
    }

    #[test]
    fn computes_cost_from_pricing() {
        let interceptor = CostInterceptor::new(Arc::new(PricingTable::default()));
        let mut ctx = ctx("gpt-4o");
        ctx.response.usage = quorum_core::types::TokenUsage::new(1_000, 1_000);
        let mut response = ModelResponse::final_answer("a");
        interceptor.after(&mut ctx, &mut response).unwrap();
        assert!((response.cost_estimate - 0.0125).abs() < 1e-9);
        assert!((ctx.response.cost_estimate - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn keeps_invoker_supplied_cost() {
        let interceptor = CostInterceptor::new(Arc::new(PricingTable::default()));
        let mut ctx = ctx("gpt-4o");
        let mut response = ModelResponse::final_answer("a")
            .with_usage(1_000, 1_000)
            .with_cost(0.5);
        interceptor.after(&mut ctx, &mut response).unwrap();
        assert_eq!(response.cost_estimate, 0.5);
        assert_eq!(ctx.response.cost_estimate, 0.5);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        let interceptor = CostInterceptor::new(Arc::new(PricingTable::default()));
        let mut ctx = ctx("homegrown-7b");
        let mut response = ModelResponse::final_answer("a").with_usage(500, 500);
        interceptor.after(&mut ctx, &mut response).unwrap();
        assert_eq!(response.cost_estimate, 0.0);
    }
}
