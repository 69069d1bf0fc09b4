use quorum_core::error::{QuorumError, Result};

use super::{Flow, Interceptor, InterceptorContext, ShortCircuit};

/// Rejects prompts whose estimated size exceeds the model's context window.
pub struct ContextWindowGuard {
    max_tokens: usize,
}

impl ContextWindowGuard {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl Interceptor for ContextWindowGuard {
    fn name(&self) -> &str {
        "context_window"
    }

    fn before(&self, ctx: &mut InterceptorContext) -> Result<Flow> {
        let tokens = ctx.prompt_tokens();
        if tokens > self.max_tokens {
            return Ok(Flow::ShortCircuit(ShortCircuit::Reject(
                QuorumError::ContextWindowExceeded {
                    tokens,
                    limit: self.max_tokens,
                },
            )));
        }
        Ok(Flow::Continue)
    }
}
