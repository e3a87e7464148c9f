//! Join：屏障满足后把本轮结果归并进会话状态
//!
//! 结果按任务 ID 升序处理，保证同一批结果无论到达顺序如何都得到相同的状态；
//! 只有成功结果会写入 completed_outputs。最后清空缓冲并推进轮次。

use std::collections::BTreeSet;

use crate::capability::CapabilityRegistry;
use crate::core::{EngineError, SessionStatus};
use crate::workflow::dispatcher::RoundBuffer;
use crate::workflow::session::SessionState;
use crate::workflow::{ResultStatus, TaskId, TaskStatus};

/// 一次 Join 的摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSummary {
    pub round: u32,
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub artifacts_touched: usize,
    pub next_round: u32,
}

pub struct Join<'a> {
    registry: &'a CapabilityRegistry,
}

impl<'a> Join<'a> {
    pub fn new(registry: &'a CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// 归并本轮结果；只有收到的结果数等于派发数时才会执行
    pub fn fire(
        &self,
        session: &mut SessionState,
        dispatched: &[TaskId],
        buffer: &RoundBuffer,
    ) -> Result<JoinSummary, EngineError> {
        if session.rounds.status() != SessionStatus::Joining {
            return Err(EngineError::InvalidSessionTransition {
                from: session.rounds.status().as_str(),
                to: SessionStatus::Planning.as_str(),
            });
        }
        let received = buffer.len();
        if received != dispatched.len() {
            return Err(EngineError::IncompleteRound {
                received,
                dispatched: dispatched.len(),
            });
        }

        let round = session.rounds.round();
        let expected: BTreeSet<TaskId> = dispatched.iter().copied().collect();
        let mut results = buffer.drain();
        results.sort_by_key(|r| r.task_id);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut artifacts_touched = 0;

        for result in results {
            if !expected.contains(&result.task_id) {
                tracing::warn!(task_id = %result.task_id, "Result for a task not dispatched this round, dropping");
                continue;
            }
            let task = session
                .graph
                .get_mut(result.task_id)
                .ok_or(EngineError::UnknownTask(result.task_id))?;
            task.message = result.message.clone();

            match result.status {
                ResultStatus::Success => {
                    task.transition(TaskStatus::Success)?;
                    task.result = Some(result.outputs.clone());
                    session.completed.commit(result.task_id, result.outputs.clone())?;
                    succeeded.push(result.task_id);

                    let task = &*task;
                    if let Some(descriptor) = self.registry.descriptor(&task.capability) {
                        if session.bundler.record(task, &result.outputs, descriptor).is_some() {
                            artifacts_touched += 1;
                        }
                    }
                }
                ResultStatus::Failed => {
                    let error = result
                        .error
                        .unwrap_or_else(|| "provider reported failure".to_string());
                    tracing::warn!(task_id = %result.task_id, error = %error, "Task failed");
                    task.fail(error)?;
                    failed.push(result.task_id);
                }
            }
        }

        let next_round = session.rounds.advance_round()?;
        tracing::info!(
            round,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "Join fired"
        );

        Ok(JoinSummary {
            round,
            succeeded,
            failed,
            artifacts_touched,
            next_round,
        })
    }
}
