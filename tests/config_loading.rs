use std::io::Write;

use quorum_agent::graph::WorkflowDefinition;
use quorum_agent::{AgentRegistry, WorkflowExecutor};
use quorum_core::config::AppConfig;
use quorum_core::error::QuorumError;
use quorum_core::types::TokenUsage;
use quorum_llm::PricingTable;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_continuation_depth = 4
invoke_timeout_secs = 30
tool_timeout_secs = 5
max_retries = 2
parallel_tools = false

[retry]
initial_backoff_ms = 50
max_backoff_ms = 400

[budget]
max_cost_usd = 0.25
max_tokens = 20000

[context]
max_context_tokens = 8000

[consensus]
threshold = 0.6

[pricing."local-llama"]
input_per_1k = 0.0001
output_per_1k = 0.0002

[agents.writer]
provider = "openai"
model_id = "gpt-4o"
temperature = 0.2
system_prompt = "Write clearly."

[agents.critic]
provider = "anthropic"
model_id = "claude-3-5-sonnet-20241022"

[log]
dir = "/tmp/quorum-test-runs"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_continuation_depth, 4);
    assert_eq!(config.engine.invoke_timeout_secs, 30);
    assert_eq!(config.engine.tool_timeout_secs, 5);
    assert_eq!(config.engine.max_retries, 2);
    assert!(!config.engine.parallel_tools);
    assert_eq!(config.retry.initial_backoff_ms, 50);
    assert_eq!(config.retry.max_backoff_ms, 400);
    assert_eq!(config.budget.max_cost_usd, Some(0.25));
    assert_eq!(config.budget.max_tokens, Some(20000));
    assert_eq!(config.context.max_context_tokens, Some(8000));
    assert_eq!(config.consensus.threshold, 0.6);

    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents["writer"].model.model_id, "gpt-4o");
    assert_eq!(config.agents["writer"].system_prompt.as_deref(), Some("Write clearly."));
    assert_eq!(config.agents["critic"].model.provider, "anthropic");

    let log = config.log.expect("log present");
    assert!(log.enabled);
    assert_eq!(log.dir, "/tmp/quorum-test-runs");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("QUORUM_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[agents.writer]
model_id = "gpt-4o"
api_key = "${QUORUM_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.agents["writer"].model.api_key,
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("QUORUM_TEST_API_KEY");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, QuorumError::ConfigNotFound(_)));
}

#[test]
fn test_pricing_overrides_merge_over_builtins() {
    let toml_content = r#"
[pricing."local-llama"]
input_per_1k = 0.001
output_per_1k = 0.002
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    let config = AppConfig::load(tmp.path()).expect("load config");

    let pricing = PricingTable::with_overrides(&config.pricing);
    assert!(pricing.lookup("local-llama-3b").is_some());
    assert!(pricing.lookup("gpt-4o").is_some());
    assert_eq!(pricing.cost("mystery-model", TokenUsage::new(1000, 1000)), 0.0);
}

#[test]
fn test_workflow_file_loads_and_configured_executor_rejects_unknown_agent() {
    let workflow = r#"
id = "review"

[[steps]]
id = "draft"
kind = "agent_call"
agent = "writer"
routes_to = ["done"]

[[steps]]
id = "done"
kind = "terminal"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(workflow.as_bytes()).expect("write toml");
    let definition = WorkflowDefinition::load(tmp.path()).expect("load workflow");
    assert_eq!(definition.steps.len(), 2);

    let config = AppConfig::parse("").expect("defaults");
    let executor = WorkflowExecutor::from_config(&config, AgentRegistry::with_default_strategies(0.5));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let err = rt.block_on(executor.run(&definition, "hi")).unwrap_err();
    assert!(matches!(err, QuorumError::Graph(_)));
}
