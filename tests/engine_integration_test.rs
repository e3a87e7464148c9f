//! 引擎集成测试：多轮规划、屏障、预算、失败传播、记忆合并与合成

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;

use hive::capability::{
    CapabilityDescriptor, CapabilityProvider, EchoProvider, Invocation, PresentationMode,
};
use hive::llm::MockLlmClient;
use hive::memory::TurnRecord;
use hive::oracle::{FnOracle, LlmOracle, PlanDecision, PlanningContext, ScriptedOracle};
use hive::workflow::{
    EngineEvent, Reference, Slots, TaskCategory, TaskId, TaskResult, TaskSpec, TaskStatus,
};
use hive::{EngineBuilder, EngineError, ProviderError, SessionRequest, SessionStatus};

/// 睡眠指定毫秒后返回 {"value": ms}
struct SleepProvider {
    name: &'static str,
    millis: u64,
}

#[async_trait]
impl CapabilityProvider for SleepProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(self.name, "sleeps then reports", TaskCategory::Support)
            .with_outputs(["value"])
    }

    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(TaskResult::success(
            invocation.task_id,
            Slots::from([("value".to_string(), json!(self.millis))]),
        ))
    }
}

struct PanickingProvider;

#[async_trait]
impl CapabilityProvider for PanickingProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new("boom", "always panics", TaskCategory::Support)
            .with_outputs(["answer"])
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<TaskResult, ProviderError> {
        panic!("provider exploded");
    }
}

/// 把 params.key / params.value 写成输出槽，可记忆
struct NoteProvider;

#[async_trait]
impl CapabilityProvider for NoteProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new("note", "records a note", TaskCategory::Deliverable)
            .with_memorable_slots(["first", "second"])
            .with_artifact_type("notes")
            .with_presentation(PresentationMode::Hidden)
    }

    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError> {
        let key = invocation
            .value("key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Failed("missing key".to_string()))?
            .to_string();
        let value = invocation.value("value").cloned().unwrap_or_default();
        Ok(TaskResult::success(
            invocation.task_id,
            Slots::from([(key, value), ("intent".to_string(), json!("take notes"))]),
        ))
    }
}

fn echo_goal() -> TaskSpec {
    TaskSpec::new("echo").input("text", Reference::context("goal"))
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_join_waits_for_slowest_branch() {
    let oracle = Arc::new(ScriptedOracle::new([
        PlanDecision::continue_with("run both", vec![TaskSpec::new("fast"), TaskSpec::new("slow")]),
        PlanDecision::done("both finished", BTreeMap::new()),
    ]));
    let (tx, mut rx) = broadcast::channel(64);
    let engine = EngineBuilder::new()
        .provider(SleepProvider { name: "fast", millis: 10 })
        .provider(SleepProvider { name: "slow", millis: 500 })
        .oracle_arc(oracle.clone())
        .events(tx)
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("go")).await;
    assert_eq!(outcome.status, SessionStatus::Done);

    let contexts = oracle.contexts();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[1].completed.len(), 2);
    assert!(contexts[1].pending.is_empty());

    let finished: Vec<(TaskId, usize)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::TaskFinished { task_id, received, .. } => Some((task_id, received)),
            EngineEvent::JoinFired { round: 1, results } => Some((TaskId(0), results)),
            _ => None,
        })
        .collect();
    // 快分支先到，Join 只在第二个结果之后触发
    assert_eq!(finished, vec![(TaskId(1), 1), (TaskId(2), 2), (TaskId(0), 2)]);
}

#[tokio::test]
async fn test_budget_exceeded_stops_before_oracle() {
    let oracle = Arc::new(ScriptedOracle::new(
        (0..5).map(|_| PlanDecision::continue_with("keep going", vec![echo_goal()])),
    ));
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle_arc(oracle.clone())
        .round_budget(2)
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("loop")).await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.error, Some(EngineError::BudgetExceeded { round: 3, budget: 2 }));
    assert_eq!(outcome.rounds, 3);
    assert_eq!(oracle.calls(), 2);
    assert!(outcome.response.is_none());
}

#[tokio::test]
async fn test_continue_without_tasks_fails() {
    let oracle = Arc::new(ScriptedOracle::new([PlanDecision::continue_with("hmm", vec![])]));
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle_arc(oracle.clone())
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("x")).await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.error, Some(EngineError::DegeneratePlan));
    assert!(outcome.reasoning.contains("hmm"));
    assert_eq!(oracle.calls(), 1);
    assert_eq!(outcome.rounds, 1);
}

#[tokio::test]
async fn test_oracle_failure_surfaces_reasoning() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(ScriptedOracle::new([PlanDecision::failed("no capability can do that")]))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("fly")).await;
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.reasoning, "no capability can do that");
    assert!(outcome.reply_text().contains("no capability can do that"));
}

#[tokio::test]
async fn test_oracle_error_fails_session() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(FnOracle::new(|_: &PlanningContext| {
            Err(EngineError::Oracle("offline".to_string()))
        }))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("x")).await;
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome.reasoning.contains("offline"));
}

#[tokio::test]
async fn test_panic_and_failure_propagation() {
    let oracle = Arc::new(ScriptedOracle::new([
        PlanDecision::continue_with(
            "try all",
            vec![
                TaskSpec::new("boom"),
                echo_goal(),
                TaskSpec::new("echo").input("text", Reference::new(1, "answer")),
            ],
        ),
        PlanDecision::continue_with(
            "reuse echo",
            vec![TaskSpec::new("echo").input("text", Reference::new(2, "answer"))],
        ),
        PlanDecision::done(
            "done",
            BTreeMap::from([("reply".to_string(), Reference::new(4, "answer"))]),
        ),
    ]));
    let (tx, mut rx) = broadcast::channel(128);
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .provider(PanickingProvider)
        .oracle_arc(oracle.clone())
        .events(tx)
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("hello")).await;

    assert_eq!(outcome.status, SessionStatus::Done);
    assert_eq!(outcome.reply_text(), "hello");

    let boom = outcome.task(TaskId(1)).unwrap();
    assert_eq!(boom.status, TaskStatus::Failed);
    assert!(boom.error.as_deref().unwrap().contains("provider exploded"));
    assert_eq!(outcome.task(TaskId(2)).unwrap().status, TaskStatus::Success);
    let dependent = outcome.task(TaskId(3)).unwrap();
    assert_eq!(dependent.status, TaskStatus::Failed);
    assert!(dependent.error.as_deref().unwrap().contains("upstream task 1 failed"));
    assert_eq!(outcome.task(TaskId(4)).unwrap().status, TaskStatus::Success);

    // 第二轮的 Oracle 看到了失败与仍在等待的任务
    let round2 = &oracle.contexts()[1];
    assert_eq!(round2.failed.len(), 1);
    assert_eq!(round2.pending.len(), 1);
    assert!(outcome.tasks.iter().all(|t| t.status.is_terminal()));

    let mut dispatched: HashMap<TaskId, usize> = HashMap::new();
    for event in drain(&mut rx) {
        if let EngineEvent::TaskDispatched { task_id, .. } = event {
            *dispatched.entry(task_id).or_default() += 1;
        }
    }
    assert!(dispatched.values().all(|n| *n == 1));
    assert!(!dispatched.contains_key(&TaskId(3)));
}

#[tokio::test]
async fn test_forward_reference_fails_immediately() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(ScriptedOracle::new([
            PlanDecision::continue_with(
                "bad order",
                vec![
                    TaskSpec::new("echo").input("text", Reference::new(2, "answer")),
                    echo_goal(),
                ],
            ),
            PlanDecision::done("ok", BTreeMap::new()),
        ]))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("hi")).await;
    assert_eq!(outcome.task(TaskId(1)).unwrap().status, TaskStatus::Failed);
    assert_eq!(outcome.task(TaskId(2)).unwrap().status, TaskStatus::Success);
    assert_eq!(outcome.status, SessionStatus::Done);
}

#[tokio::test]
async fn test_bundles_with_merges_across_rounds() {
    let engine = EngineBuilder::new()
        .provider(NoteProvider)
        .oracle(ScriptedOracle::new([
            PlanDecision::continue_with(
                "first note",
                vec![TaskSpec::new("note").param("key", "first").param("value", "a")],
            ),
            PlanDecision::continue_with(
                "second note",
                vec![TaskSpec::new("note")
                    .param("key", "second")
                    .param("value", "b")
                    .bundles_with(1)],
            ),
            PlanDecision::done("noted", BTreeMap::new()),
        ]))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("remember").with_history(vec![], 9)).await;

    assert_eq!(outcome.status, SessionStatus::Done);
    assert_eq!(outcome.artifacts.len(), 1);
    let artifact = &outcome.artifacts[0];
    assert_eq!(artifact.artifact_type, "notes");
    assert_eq!(artifact.source_task_id, TaskId(1));
    assert_eq!(artifact.turn_id, 9);
    assert_eq!(artifact.intent, "take notes");
    assert_eq!(artifact.slots.get("first"), Some(&json!("a")));
    assert_eq!(artifact.slots.get("second"), Some(&json!("b")));
    assert_eq!(artifact.bundled_task_ids, vec![TaskId(2)]);
    // hidden 输出不进入回复
    assert_eq!(outcome.response.unwrap().text, "");
}

#[tokio::test]
async fn test_synthesis_omits_unresolved_reference() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(ScriptedOracle::new([
            PlanDecision::continue_with("echo twice", vec![echo_goal(), echo_goal()]),
            PlanDecision::done(
                "answer",
                BTreeMap::from([
                    ("a".to_string(), Reference::new(1, "answer")),
                    ("b".to_string(), Reference::new(2, "y")),
                ]),
            ),
        ]))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("foo")).await;
    let response = outcome.response.unwrap();
    assert_eq!(response.resolved, BTreeMap::from([("a".to_string(), json!("foo"))]));
    assert_eq!(response.omitted, vec!["b"]);
    assert_eq!(response.text, "foo");
}

#[tokio::test]
async fn test_history_reaches_context_slot() {
    let oracle = Arc::new(ScriptedOracle::new([PlanDecision::done(
        "recall",
        BTreeMap::from([("prev".to_string(), Reference::context("chat_history"))]),
    )]));
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle_arc(oracle.clone())
        .build()
        .unwrap();

    let history = vec![TurnRecord::new(1, "my name is Ada", "Nice to meet you")];
    let outcome = engine
        .run_session(SessionRequest::new("what is my name?").with_history(history, 2))
        .await;

    assert!(oracle.contexts()[0].context_slots.contains(&"chat_history".to_string()));
    assert!(outcome.reply_text().contains("my name is Ada"));
    assert_eq!(outcome.to_turn_record("what is my name?").turn_id, 2);
}

#[tokio::test]
async fn test_mock_llm_session_end_to_end() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(LlmOracle::new(Arc::new(MockLlmClient)))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("hello there")).await;

    assert_eq!(outcome.status, SessionStatus::Done);
    assert_eq!(outcome.reply_text(), "hello there");
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts[0].intent, "echo: hello there");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_branches_all_commit() {
    let (tx, mut rx) = broadcast::channel(128);
    let engine = EngineBuilder::new()
        .provider(SleepProvider { name: "work", millis: 20 })
        .oracle(ScriptedOracle::new([
            PlanDecision::continue_with("fan out", (0..6).map(|_| TaskSpec::new("work")).collect()),
            PlanDecision::done("fan in", BTreeMap::new()),
        ]))
        .events(tx)
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("fan")).await;

    assert_eq!(outcome.status, SessionStatus::Done);
    assert_eq!(outcome.completed.len(), 7);
    assert!(outcome.tasks.iter().all(|t| t.status == TaskStatus::Success));
    let joins: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::JoinFired { results, .. } => Some(results),
            _ => None,
        })
        .collect();
    assert_eq!(joins, vec![6]);
}

#[tokio::test]
async fn test_oracle_panic_fails_session() {
    let engine = EngineBuilder::new()
        .provider(EchoProvider)
        .oracle(FnOracle::new(|_: &PlanningContext| -> Result<PlanDecision, EngineError> {
            panic!("planner crashed")
        }))
        .build()
        .unwrap();

    let outcome = engine.run_session(SessionRequest::new("x")).await;
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome.reasoning.contains("planner crashed"));
    assert!(matches!(outcome.error, Some(EngineError::Oracle(_))));
}

#[tokio::test(start_paused = true)]
async fn test_wide_round_finishes_in_one_latency_window() {
    let engine = EngineBuilder::new()
        .provider(SleepProvider { name: "slow", millis: 300 })
        .oracle(ScriptedOracle::new([
            PlanDecision::continue_with("fan out", (0..12).map(|_| TaskSpec::new("slow")).collect()),
            PlanDecision::done("fan in", BTreeMap::new()),
        ]))
        .build()
        .unwrap();
    assert_eq!(engine.settings().max_parallel, 0);

    let started = tokio::time::Instant::now();
    let outcome = engine.run_session(SessionRequest::new("wide")).await;

    assert_eq!(outcome.status, SessionStatus::Done);
    assert_eq!(outcome.completed.len(), 13);
    assert!(started.elapsed() < Duration::from_millis(400));
}
