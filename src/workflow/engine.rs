//! 编排引擎
//!
//! 控制循环：规范化请求写入上下文槽 → 每轮先检查预算再询问 Oracle →
//! continue 时登记新任务、判定就绪、派发并在屏障处等待、Join 归并 → done 时合成回复。
//! run_session 总是返回 SessionOutcome，失败原因写在 reasoning 与 error 中。

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use crate::capability::executor::panic_message;
use crate::capability::{CapabilityRegistry, Invocation};
use crate::config::EngineSection;
use crate::core::{EngineError, SessionStatus};
use crate::memory::{MemoryArtifact, TurnRecord};
use crate::normalizer::{ContextNormalizer, NormalizedContext};
use crate::oracle::{PlanAction, PlanDecision, PlanningContext, PlanningOracle};
use crate::synthesis::{AssembledResponse, Composer, SynthesisResolver};
use crate::workflow::dispatcher::{Dispatcher, RoundBuffer};
use crate::workflow::events::{EngineEvent, EventSink};
use crate::workflow::join::Join;
use crate::workflow::session::SessionState;
use crate::workflow::{CompletedOutputs, Reference, Task, TaskId, TaskResult, TaskStatus};

/// 引擎运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub round_budget: u32,
    pub provider_timeout_secs: u64,
    pub max_parallel: usize,
    pub context_preview_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSection::default().into()
    }
}

impl From<EngineSection> for EngineSettings {
    fn from(section: EngineSection) -> Self {
        Self {
            round_budget: section.round_budget,
            provider_timeout_secs: section.provider_timeout_secs,
            max_parallel: section.max_parallel,
            context_preview_chars: section.context_preview_chars,
        }
    }
}

/// 一次会话的请求
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub raw_request: String,
    pub history: Vec<TurnRecord>,
    pub turn_id: u64,
}

impl SessionRequest {
    pub fn new(raw_request: impl Into<String>) -> Self {
        Self {
            raw_request: raw_request.into(),
            history: Vec::new(),
            turn_id: 1,
        }
    }

    pub fn with_history(mut self, history: Vec<TurnRecord>, turn_id: u64) -> Self {
        self.history = history;
        self.turn_id = turn_id;
        self
    }
}

/// 会话结果
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub turn_id: u64,
    pub status: SessionStatus,
    pub reasoning: String,
    /// 会话结束时的轮次（从 1 开始）
    pub rounds: u32,
    pub response: Option<AssembledResponse>,
    pub tasks: Vec<Task>,
    pub completed: CompletedOutputs,
    pub artifacts: Vec<MemoryArtifact>,
    #[serde(skip)]
    pub error: Option<EngineError>,
}

impl SessionOutcome {
    pub fn is_done(&self) -> bool {
        self.status == SessionStatus::Done
    }

    /// 回复正文；失败时给出原因
    pub fn reply_text(&self) -> String {
        match (&self.response, self.status) {
            (Some(response), SessionStatus::Done) => response.text.clone(),
            _ => format!("Unable to complete the request: {}", self.reasoning),
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// 组装这一轮对话的记录（供宿主写入历史）
    pub fn to_turn_record(&self, human_message: &str) -> TurnRecord {
        TurnRecord::new(self.turn_id, human_message, self.reply_text())
            .with_artifacts(self.artifacts.clone())
    }
}

pub struct OrchestrationEngine {
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) oracle: Arc<dyn PlanningOracle>,
    pub(crate) normalizer: Arc<dyn ContextNormalizer>,
    pub(crate) composer: Arc<dyn Composer>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) settings: EngineSettings,
    pub(crate) events: EventSink,
}

enum Step {
    Continue,
    Finished(SessionStatus, Option<EngineError>, Option<AssembledResponse>),
}

impl OrchestrationEngine {
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 运行一次会话直到 done / failed
    pub async fn run_session(&self, request: SessionRequest) -> SessionOutcome {
        let mut session = SessionState::new(request.turn_id, self.settings.round_budget);
        tracing::info!(session_id = %session.session_id, turn_id = request.turn_id, "Session started");

        let normalized = match self
            .normalizer
            .normalize(&request.raw_request, &request.history)
            .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "Context normalization failed, using raw request as goal");
                NormalizedContext::from_goal(request.raw_request.trim())
            }
        };
        let goal = normalized.goal_text.clone();
        if let Err(e) = session.completed.seed_context(normalized.into_slots()) {
            return self.finish(session, SessionStatus::Failed, Some(e), None);
        }

        loop {
            match self.step(&mut session, &goal).await {
                Ok(Step::Continue) => continue,
                Ok(Step::Finished(status, error, response)) => {
                    return self.finish(session, status, error, response);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Session aborted");
                    if session.reasoning.is_empty() {
                        session.reasoning = e.to_string();
                    }
                    return self.finish(session, SessionStatus::Failed, Some(e), None);
                }
            }
        }
    }

    /// 一轮：planning →（executing → joining → planning）或终态
    async fn step(&self, session: &mut SessionState, goal: &str) -> Result<Step, EngineError> {
        let round = session.rounds.round();
        let budget = session.rounds.budget();
        self.events.emit(EngineEvent::RoundStarted { round, budget });

        if session.rounds.budget_exceeded() {
            let err = EngineError::BudgetExceeded { round, budget };
            session.reasoning = err.to_string();
            tracing::warn!(round, budget, "Round budget exceeded");
            return Ok(Step::Finished(SessionStatus::Failed, Some(err), None));
        }

        let ctx = PlanningContext::build(
            goal,
            &self.registry,
            &session.graph,
            &session.completed,
            &session.rounds,
            session.next_task_id(),
            self.settings.context_preview_chars,
        );
        let planned = AssertUnwindSafe(self.oracle.plan(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(EngineError::Oracle(format!(
                    "oracle panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        let decision = match planned {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(round, error = %e, "Oracle failed");
                session.reasoning = e.to_string();
                return Ok(Step::Finished(SessionStatus::Failed, Some(e), None));
            }
        };
        tracing::info!(
            round,
            action = decision.action.as_str(),
            tasks = decision.tasks.len(),
            "Plan decided"
        );
        self.events.emit(EngineEvent::PlanDecided {
            round,
            action: decision.action.as_str().to_string(),
            reasoning: decision.reasoning.clone(),
            new_tasks: decision.tasks.len(),
        });
        session.reasoning = decision.reasoning.clone();

        match decision.action {
            PlanAction::Failed => Ok(Step::Finished(SessionStatus::Failed, None, None)),
            PlanAction::Done => {
                session.rounds.transition(SessionStatus::Done)?;
                let response = self.synthesize(session, goal, &decision.synthesis_refs).await;
                Ok(Step::Finished(SessionStatus::Done, None, Some(response)))
            }
            PlanAction::Continue => {
                if decision.tasks.is_empty() {
                    let err = EngineError::DegeneratePlan;
                    session.reasoning = if decision.reasoning.is_empty() {
                        err.to_string()
                    } else {
                        format!("{} ({})", err, decision.reasoning)
                    };
                    return Ok(Step::Finished(SessionStatus::Failed, Some(err), None));
                }
                self.execute_round(session, decision).await?;
                Ok(Step::Continue)
            }
        }
    }

    async fn execute_round(&self, session: &mut SessionState, decision: PlanDecision) -> Result<(), EngineError> {
        let round = session.rounds.round();
        session.add_tasks(decision.tasks, &self.registry);
        session.rounds.transition(SessionStatus::Executing)?;

        let report = session.graph.promote_ready(&session.completed)?;
        for (task_id, reason) in &report.failed {
            tracing::warn!(task_id = %task_id, reason = %reason, "Task rejected");
            self.events.emit(EngineEvent::TaskRejected {
                task_id: *task_id,
                reason: reason.clone(),
            });
        }
        if !report.blocked.is_empty() {
            tracing::debug!(blocked = ?report.blocked, "Tasks waiting on upstream outputs");
        }

        let buffer = Arc::new(RoundBuffer::new());
        let mut invocations = Vec::with_capacity(report.ready.len());
        for task_id in &report.ready {
            let task = session.graph.get(*task_id).ok_or(EngineError::UnknownTask(*task_id))?;
            let hydrated = session.graph.hydrate(task, &session.completed);
            let invocation = hydrated.map(|resolved_inputs| Invocation {
                task_id: task.id,
                capability: task.capability.clone(),
                resolved_inputs,
                params: task.params.clone(),
            });

            let task = session
                .graph
                .get_mut(*task_id)
                .ok_or(EngineError::UnknownTask(*task_id))?;
            task.transition(TaskStatus::Running)?;
            match invocation {
                Ok(invocation) => invocations.push(invocation),
                // 就绪判定之后不应出现；按失败结果计入本轮，保持屏障计数一致
                Err(e) => {
                    buffer.push(TaskResult::failed(*task_id, e.to_string()));
                }
            }
        }

        session.rounds.transition(SessionStatus::Joining)?;
        let dispatched = self.dispatcher.dispatch(round, invocations, Arc::clone(&buffer));
        let mut dispatched_ids = report.ready.clone();
        dispatched_ids.sort();
        self.dispatcher.barrier(dispatched, &buffer).await;

        let summary = Join::new(&self.registry).fire(session, &dispatched_ids, &buffer)?;
        self.events.emit(EngineEvent::JoinFired {
            round,
            results: summary.succeeded.len() + summary.failed.len(),
        });
        Ok(())
    }

    async fn synthesize(
        &self,
        session: &SessionState,
        goal: &str,
        refs: &BTreeMap<String, Reference>,
    ) -> AssembledResponse {
        SynthesisResolver::new(&self.registry, &session.graph, &session.completed)
            .assemble(goal, refs, self.composer.as_ref())
            .await
    }

    fn finish(
        &self,
        mut session: SessionState,
        status: SessionStatus,
        error: Option<EngineError>,
        response: Option<AssembledResponse>,
    ) -> SessionOutcome {
        let rounds = session.rounds.round();
        if session.rounds.status() != status {
            if let Err(e) = session.rounds.transition(status) {
                tracing::debug!(error = %e, "Session ended outside planning");
            }
        }
        if session.reasoning.is_empty() {
            if let Some(e) = &error {
                session.reasoning = e.to_string();
            }
        }
        tracing::info!(
            session_id = %session.session_id,
            status = status.as_str(),
            rounds,
            "Session finished"
        );
        self.events.emit(EngineEvent::SessionFinished {
            status,
            rounds,
            reasoning: session.reasoning.clone(),
        });

        SessionOutcome {
            session_id: session.session_id,
            turn_id: session.turn_id,
            status,
            reasoning: session.reasoning,
            rounds,
            response,
            tasks: session.graph.into_tasks(),
            completed: session.completed,
            artifacts: session.bundler.into_artifacts(),
            error,
        }
    }
}
