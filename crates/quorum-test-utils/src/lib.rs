//! Mocks and fixtures shared by Quorum's test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use quorum_core::config::ModelConfig;
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::{AgentInvoker, ToolExecutor};
use quorum_core::types::{ChatMessage, ModelResponse, Role, ToolCallRequest};

/// Build a tool call with empty arguments.
pub fn tool_call(id: &str, name: &str) -> ToolCallRequest {
    ToolCallRequest::new(id, name, serde_json::json!({}))
}

/// Content of the most recent user message.
pub fn last_user_message(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(QuorumError::Cancelled),
    }
}

/// Replays a fixed script of responses, then a fallback (if set).
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    fallback: Option<ModelResponse>,
    delay: Duration,
    call_delays: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedInvoker {
    pub fn new(script: Vec<Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: Duration::ZERO,
            call_delays: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: ModelResponse) -> Self {
        let mut invoker = Self::new(Vec::new());
        invoker.fallback = Some(response);
        invoker
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay the first calls individually; later calls use `with_delay`.
    /// A call abandoned mid-delay does not consume a script entry.
    pub fn with_call_delays(self, delays: Vec<Duration>) -> Self {
        *self.call_delays.lock().unwrap() = delays.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Message lists received, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self) -> Result<ModelResponse> {
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback
            .clone()
            .ok_or_else(|| QuorumError::Provider("script exhausted".into()))
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        _model: &ModelConfig,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        self.calls.lock().unwrap().push(messages);
        let delay = self
            .call_delays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.delay);
        Box::pin(async move {
            pause(delay, &cancel).await?;
            self.next()
        })
    }
}

type Responder = dyn Fn(&[ChatMessage]) -> Result<ModelResponse> + Send + Sync;

/// Computes each response from the incoming messages.
pub struct FnInvoker {
    respond: Box<Responder>,
    delay: Duration,
    calls: Mutex<usize>,
}

impl FnInvoker {
    pub fn new(
        respond: impl Fn(&[ChatMessage]) -> Result<ModelResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            calls: Mutex::new(0),
        }
    }

    /// Reply with `prefix` followed by the last user message.
    pub fn echo(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |messages| {
            Ok(ModelResponse::final_answer(format!(
                "{prefix}{}",
                last_user_message(messages)
            )))
        })
    }

    /// Reply with a fixed text regardless of input.
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(ModelResponse::final_answer(text.clone())))
    }

    /// Fail every call with a provider error.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(QuorumError::Provider(message.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl AgentInvoker for FnInvoker {
    fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        _model: &ModelConfig,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        *self.calls.lock().unwrap() += 1;
        Box::pin(async move {
            pause(self.delay, &cancel).await?;
            (self.respond)(&messages)
        })
    }
}

#[derive(Clone)]
struct MockTool {
    latency: Duration,
    result: std::result::Result<String, String>,
}

/// Tool executor with per-tool latency and canned results.
#[derive(Default)]
pub struct MockToolExecutor {
    tools: HashMap<String, MockTool>,
    calls: Mutex<HashMap<String, usize>>,
    completed: Arc<Mutex<Vec<String>>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. `Err(msg)` makes it fail with a tool execution error.
    pub fn with_tool(
        mut self,
        name: impl Into<String>,
        latency: Duration,
        result: std::result::Result<String, String>,
    ) -> Self {
        self.tools.insert(name.into(), MockTool { latency, result });
        self
    }

    /// Times a tool was started (including retries).
    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Tool names in the order their executions finished.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

impl ToolExecutor for MockToolExecutor {
    fn execute(
        &self,
        name: &str,
        _arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<String>> {
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        let tool = self.tools.get(name).cloned();
        let name = name.to_string();
        Box::pin(async move {
            let tool = tool.ok_or_else(|| QuorumError::ToolNotFound(name.clone()))?;
            pause(tool.latency, &cancel).await?;
            self.completed.lock().unwrap().push(name.clone());
            tool.result.map_err(|message| QuorumError::ToolExecution {
                tool: name,
                message,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_invoker_replays_then_errors() {
        let invoker = ScriptedInvoker::new(vec![Ok(ModelResponse::final_answer("one"))]);
        let model = ModelConfig::new("m");
        let first = invoker
            .invoke(vec![], &model, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.content, "one");
        assert!(invoker
            .invoke(vec![], &model, CancellationToken::new())
            .await
            .is_err());
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test]
    async fn echo_uses_last_user_message() {
        let invoker = FnInvoker::echo("re: ");
        let model = ModelConfig::new("m");
        let response = invoker
            .invoke(
                vec![ChatMessage::system("s"), ChatMessage::user("hello")],
                &model,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "re: hello");
    }

    #[tokio::test]
    async fn mock_tools_report_unknown_and_failures() {
        let tools = MockToolExecutor::new().with_tool("bad", Duration::ZERO, Err("boom".into()));
        let err = tools
            .execute("nope", serde_json::json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::ToolNotFound(_)));
        let err = tools
            .execute("bad", serde_json::json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(tools.call_count("bad"), 1);
    }
}
