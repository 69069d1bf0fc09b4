use quorum_core::error::Result;
use quorum_core::types::{ModelResponse, TokenUsage};

use super::{Interceptor, InterceptorContext};
use crate::tokens::estimate_tokens;

/// Extracts token usage into the response metadata, estimating it locally
/// when the provider reports none.
pub struct UsageInterceptor {
    estimate_missing: bool,
}

impl UsageInterceptor {
    pub fn new(estimate_missing: bool) -> Self {
        Self { estimate_missing }
    }
}

impl Default for UsageInterceptor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Interceptor for UsageInterceptor {
    fn name(&self) -> &str {
        "usage"
    }

    fn after(&self, ctx: &mut InterceptorContext, response: &mut ModelResponse) -> Result<()> {
        if !response.usage.is_empty() || !self.estimate_missing {
            ctx.response.usage = response.usage;
            return Ok(());
        }

        let input = ctx.prompt_tokens() as u64;
        let mut output = estimate_tokens(&response.content) as u64;
        for call in &response.tool_calls {
            output += (estimate_tokens(&call.name) + estimate_tokens(&call.arguments.to_string())) as u64;
        }
        ctx.response.usage = TokenUsage::new(input, output);
        ctx.response.usage_estimated = true;
        Ok(())
    }
}
