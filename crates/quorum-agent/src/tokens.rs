use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

use quorum_core::types::ChatMessage;

/// Get or initialize the cl100k_base tokenizer. `None` if it failed to load,
/// in which case estimates fall back to a character heuristic.
fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "Failed to load cl100k_base tokenizer, using char estimate");
                None
            }
        })
        .as_ref()
}

/// Token count using BPE tokenization (cl100k_base).
pub fn estimate_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len().div_ceil(4),
    }
}

/// Estimate token count for a message, with 4 tokens overhead per message.
pub fn estimate_message_tokens(msg: &ChatMessage) -> usize {
    let mut tokens = estimate_tokens(&msg.content) + 4;
    for call in &msg.tool_calls {
        tokens += estimate_tokens(&call.name) + estimate_tokens(&call.arguments.to_string());
    }
    tokens
}

/// Estimate the prompt size of a message list.
pub fn estimate_prompt_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::types::ToolCallRequest;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        let tokens = estimate_tokens("hello");
        assert!(tokens >= 1);
    }

    #[test]
    fn test_estimate_message_includes_overhead_and_tool_calls() {
        let plain = ChatMessage::assistant("ok");
        let with_call = ChatMessage::assistant_with_tools(
            "ok",
            vec![ToolCallRequest::new("c1", "search", serde_json::json!({"q": "weather"}))],
        );
        assert!(estimate_message_tokens(&plain) >= 5);
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain));
    }

    #[test]
    fn test_prompt_tokens_sum_messages() {
        let msgs = vec![ChatMessage::system("You are terse."), ChatMessage::user("Hi")];
        let total = estimate_prompt_tokens(&msgs);
        assert_eq!(
            total,
            estimate_message_tokens(&msgs[0]) + estimate_message_tokens(&msgs[1])
        );
    }
}
