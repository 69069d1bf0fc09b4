use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Agent invoker: one model call over a message list.
///
/// Implementations wrap a provider client. They should observe `cancel`
/// and return `QuorumError::Cancelled` promptly once it fires, and map
/// provider failures onto `Provider`, `Timeout` or `RateLimited`.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        model: &ModelConfig,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// Tool executor: runs a named tool with JSON arguments.
pub trait ToolExecutor: Send + Sync + 'static {
    /// Execute the tool. `Ok` carries the result payload, `Err` the failure
    /// that is reported back to the model.
    fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<String>>;
}

/// Similarity function used by consensus strategies.
pub trait Similarity: Send + Sync + 'static {
    /// Score two texts. Values are expected in `[0, 1]`; callers clamp.
    fn score<'a>(&'a self, a: &'a str, b: &'a str) -> BoxFuture<'a, f64>;
}

/// Tool executor used when a registry has no tools configured.
/// Every call fails with `ToolNotFound`, which the model sees as an error turn.
pub struct NoTools;

impl ToolExecutor for NoTools {
    fn execute(
        &self,
        name: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<String>> {
        let name = name.to_string();
        Box::pin(async move { Err(crate::error::QuorumError::ToolNotFound(name)) })
    }
}
