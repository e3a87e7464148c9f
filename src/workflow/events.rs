//! 编排过程事件：宿主可订阅，用于展示轮次、派发、汇合与会话结束

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::SessionStatus;
use crate::workflow::TaskId;

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// 进入新一轮规划
    RoundStarted { round: u32, budget: u32 },
    /// Oracle 的决定
    PlanDecided {
        round: u32,
        action: String,
        reasoning: String,
        new_tasks: usize,
    },
    /// 引用解析判定任务失败（未派发）
    TaskRejected { task_id: TaskId, reason: String },
    /// 任务已派发
    TaskDispatched {
        round: u32,
        task_id: TaskId,
        capability: String,
    },
    /// 单个分支结果写入轮次缓冲
    TaskFinished {
        round: u32,
        task_id: TaskId,
        success: bool,
        received: usize,
        dispatched: usize,
    },
    /// 屏障满足，本轮结果已归并
    JoinFired { round: u32, results: usize },
    /// 会话进入终止状态
    SessionFinished {
        status: SessionStatus,
        rounds: u32,
        reasoning: String,
    },
}

/// 事件出口：没有订阅者时发送即丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<broadcast::Sender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::JoinFired { round: 2, results: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "join_fired");
        assert_eq!(json["results"], 3);
    }

    #[tokio::test]
    async fn test_sink_delivers_to_subscriber() {
        let (tx, mut rx) = broadcast::channel(8);
        let sink = EventSink::new(tx);
        sink.emit(EngineEvent::RoundStarted { round: 1, budget: 4 });
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::RoundStarted { round: 1, budget: 4 }
        );
        EventSink::disabled().emit(EngineEvent::JoinFired { round: 1, results: 0 });
    }
}
