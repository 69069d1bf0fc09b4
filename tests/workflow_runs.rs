use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use quorum_agent::graph::{RunStatus, StepSpec, StepState, WorkflowDefinition};
use quorum_agent::{AgentProfile, AgentRegistry, WorkflowExecutor};
use quorum_core::config::{BudgetConfig, ModelConfig};
use quorum_core::error::{ErrorKind, GraphError, QuorumError};
use quorum_core::traits::AgentInvoker;
use quorum_core::types::{ModelResponse, Role, RunEvent, TokenUsage};
use quorum_test_utils::{tool_call, FnInvoker, MockToolExecutor, ScriptedInvoker};

fn registry(agents: Vec<(&str, Arc<dyn AgentInvoker>)>) -> AgentRegistry {
    let mut registry = AgentRegistry::with_default_strategies(0.5);
    for (name, invoker) in agents {
        registry.register_agent(AgentProfile::new(name, ModelConfig::new("gpt-4o")), invoker);
    }
    registry
}

fn shared<I: AgentInvoker>(invoker: &Arc<I>) -> Arc<dyn AgentInvoker> {
    invoker.clone()
}

const PANEL: [(&str, &str); 4] = [
    ("a", "The sky is blue."),
    ("b", "The sky is blue indeed."),
    ("c", "The sky is green."),
    ("d", "I like apples."),
];

fn panel(strategy: &str) -> (WorkflowExecutor, WorkflowDefinition) {
    let agents = PANEL
        .iter()
        .map(|(name, text)| (*name, shared(&Arc::new(FnInvoker::constant(*text)))))
        .collect();
    let mut steps = vec![StepSpec::branch("fan").routes_to(PANEL.iter().map(|(n, _)| *n))];
    for (name, _) in PANEL {
        steps.push(StepSpec::agent_call(name, name).routes_to(["merge"]));
    }
    steps.push(StepSpec::merge("merge", strategy).routes_to(["done"]));
    steps.push(StepSpec::terminal("done"));

    (
        WorkflowExecutor::new(registry(agents)),
        WorkflowDefinition::new("panel", steps),
    )
}

#[tokio::test]
async fn partial_failure_skips_only_descendants() {
    let after_bad = Arc::new(FnInvoker::echo("after:"));
    let executor = WorkflowExecutor::new(registry(vec![
        ("broken", shared(&Arc::new(FnInvoker::failing("upstream 500")))),
        ("follow", shared(&after_bad)),
        ("steady", shared(&Arc::new(FnInvoker::echo("ok:")))),
    ]));
    let wf = WorkflowDefinition::new(
        "partial",
        vec![
            StepSpec::agent_call("bad", "broken").routes_to(["after_bad"]),
            StepSpec::agent_call("after_bad", "follow").routes_to(["done_bad"]),
            StepSpec::terminal("done_bad"),
            StepSpec::agent_call("good", "steady").routes_to(["done_good"]),
            StepSpec::terminal("done_good"),
        ],
    );

    let run = executor.run(&wf, "q").await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.step_state("bad"), Some(StepState::Failed));
    assert_eq!(run.step_state("after_bad"), Some(StepState::Skipped));
    assert_eq!(run.step_state("done_bad"), Some(StepState::Skipped));
    assert_eq!(run.step_state("good"), Some(StepState::Completed));
    assert_eq!(run.step_state("done_good"), Some(StepState::Completed));
    assert_eq!(after_bad.call_count(), 0);

    assert_eq!(run.failure_kind(), Some(ErrorKind::Provider));
    assert_eq!(run.failures[0].step_id.as_deref(), Some("bad"));
    assert_eq!(run.final_output.as_deref(), Some("ok:q"));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_step_runs() {
    let invoker = Arc::new(FnInvoker::echo(""));
    let executor = WorkflowExecutor::new(registry(vec![("agent", shared(&invoker))]));
    let wf = WorkflowDefinition::new(
        "loop",
        vec![
            StepSpec::agent_call("a", "agent").routes_to(["b"]),
            StepSpec::agent_call("b", "agent").routes_to(["a", "done"]),
            StepSpec::terminal("done"),
        ],
    );

    let err = executor.run(&wf, "q").await.unwrap_err();
    match err {
        QuorumError::Graph(GraphError::Cycle { step }) => assert_eq!(step, "a"),
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn cancellation_fails_run_and_starts_nothing_new() {
    let slow = Arc::new(FnInvoker::echo("slow:").with_delay(Duration::from_millis(500)));
    let next = Arc::new(FnInvoker::echo("next:"));
    let executor = WorkflowExecutor::new(registry(vec![
        ("slow", shared(&slow)),
        ("next", shared(&next)),
    ]));
    let wf = WorkflowDefinition::new(
        "cancel",
        vec![
            StepSpec::agent_call("first", "slow").routes_to(["second"]),
            StepSpec::agent_call("second", "next").routes_to(["done"]),
            StepSpec::terminal("done"),
        ],
    );

    let mut events = executor.events().subscribe();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = executor.run_with_cancel(&wf, "q", cancel).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.cancelled);
    assert_eq!(run.failure_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(run.step("first").unwrap().error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(run.step_state("second"), Some(StepState::Skipped));
    assert_eq!(run.step_state("done"), Some(StepState::Skipped));
    assert_eq!(next.call_count(), 0);
    assert_eq!(slow.call_count(), 1);

    let mut started = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RunEvent::StepStarted { step_id, .. } = event {
            started.push(step_id);
        }
    }
    assert_eq!(started, vec!["first"]);
}

#[tokio::test]
async fn voting_panel_picks_majority_cluster() {
    let (executor, wf) = panel("voting");
    let run = executor.run(&wf, "What colour is the sky?").await.unwrap();

    assert!(run.succeeded(), "{}", run.summary());
    assert_eq!(run.final_output.as_deref(), Some("The sky is blue."));
}

#[tokio::test]
async fn aggregation_panel_keeps_every_viewpoint() {
    let (executor, wf) = panel("aggregation");
    let run = executor.run(&wf, "What colour is the sky?").await.unwrap();

    assert!(run.succeeded(), "{}", run.summary());
    let merged = run.final_output.unwrap();
    assert!(merged.contains("sky"));
    assert!(merged.contains("green"));
    assert!(merged.contains("apples"));
}

#[tokio::test]
async fn budget_rejects_before_invoking() {
    let invoker = Arc::new(FnInvoker::constant("never"));
    let executor = WorkflowExecutor::new(registry(vec![("agent", shared(&invoker))])).with_budget(
        BudgetConfig {
            max_cost_usd: None,
            max_tokens: Some(1),
        },
    );
    let wf = WorkflowDefinition::new(
        "tight",
        vec![
            StepSpec::agent_call("ask", "agent").routes_to(["done"]),
            StepSpec::terminal("done"),
        ],
    );

    let run = executor
        .run(&wf, "Explain the history of the printing press in detail.")
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure_kind(), Some(ErrorKind::BudgetExceeded));
    assert_eq!(run.step_state("done"), Some(StepState::Skipped));
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn concurrent_branches_cannot_jointly_overspend() {
    let mut model = ModelConfig::new("gpt-4o");
    model.max_tokens = 800;
    let mut registry = AgentRegistry::with_default_strategies(0.5);
    let mut invokers = Vec::new();
    for name in ["a", "b", "c"] {
        let invoker = Arc::new(
            FnInvoker::new(|_| {
                let mut response = ModelResponse::final_answer("The sky is blue.");
                response.usage = TokenUsage::new(50, 800);
                Ok(response)
            })
            .with_delay(Duration::from_millis(20)),
        );
        registry.register_agent(AgentProfile::new(name, model.clone()), shared(&invoker));
        invokers.push(invoker);
    }
    let executor = WorkflowExecutor::new(registry).with_budget(BudgetConfig {
        max_cost_usd: None,
        max_tokens: Some(1000),
    });
    let wf = WorkflowDefinition::new(
        "fanout",
        vec![
            StepSpec::branch("fan").routes_to(["a", "b", "c"]),
            StepSpec::agent_call("a", "a").routes_to(["vote"]),
            StepSpec::agent_call("b", "b").routes_to(["vote"]),
            StepSpec::agent_call("c", "c").routes_to(["vote"]),
            StepSpec::merge("vote", "voting").routes_to(["done"]),
            StepSpec::terminal("done"),
        ],
    );

    let run = executor.run(&wf, "What colour is the sky?").await.unwrap();

    assert!(run.usage.total() <= 1000, "spent {}", run.usage.total());
    let invoked: usize = invokers.iter().map(|i| i.call_count()).sum();
    assert_eq!(invoked, 1);
    let rejected = run
        .failures
        .iter()
        .filter(|f| f.kind == ErrorKind::BudgetExceeded)
        .count();
    assert_eq!(rejected, 2);
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn tool_results_follow_request_order_under_random_latency() {
    let names = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];

    for _ in 0..5 {
        let mut tools = MockToolExecutor::new();
        for name in names {
            let latency = Duration::from_millis(rand::thread_rng().gen_range(0..40));
            tools = tools.with_tool(name, latency, Ok(format!("{name} result")));
        }
        let tools = Arc::new(tools);

        let calls = names
            .iter()
            .enumerate()
            .map(|(i, name)| tool_call(&format!("call_{i}"), name))
            .collect();
        let invoker = Arc::new(ScriptedInvoker::new(vec![
            Ok(ModelResponse::with_tool_calls("", calls)),
            Ok(ModelResponse::final_answer("done")),
        ]));

        let mut registry = registry(vec![("agent", shared(&invoker))]);
        registry.set_tools(tools.clone());
        let executor = WorkflowExecutor::new(registry);
        let wf = WorkflowDefinition::new(
            "tools",
            vec![
                StepSpec::agent_call("work", "agent").routes_to(["done"]),
                StepSpec::terminal("done"),
            ],
        );

        let run = executor.run(&wf, "use the tools").await.unwrap();
        assert!(run.succeeded(), "{}", run.summary());
        assert_eq!(run.step("work").unwrap().depth, 1);

        let calls = invoker.calls();
        let result_ids: Vec<&str> = calls[1]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let expected: Vec<String> = (0..names.len()).map(|i| format!("call_{i}")).collect();
        assert_eq!(result_ids, expected);
        assert_eq!(tools.completion_order().len(), names.len());
    }
}

#[tokio::test]
async fn events_bracket_the_run() {
    let executor =
        WorkflowExecutor::new(registry(vec![("agent", shared(&Arc::new(FnInvoker::echo(""))))]));
    let wf = WorkflowDefinition::new(
        "events",
        vec![
            StepSpec::agent_call("ask", "agent").routes_to(["done"]),
            StepSpec::terminal("done"),
        ],
    );
    let mut rx = executor.events().subscribe();

    let run = executor.run(&wf, "hi").await.unwrap();
    assert!(run.succeeded());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id(), &run.run_id);
        events.push(event);
    }
    assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunFinished { succeeded: true, .. })
    ));

    let completed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StepCompleted { step_id, .. } => Some(step_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["ask", "done"]);
}
