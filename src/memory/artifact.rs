//! 记忆条目与对话轮记录

use serde::{Deserialize, Serialize};

use crate::workflow::{Slots, TaskId};

/// 从已完成任务提取出的记忆条目；跨轮、跨会话保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryArtifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// 生成该条目的最早任务
    pub source_task_id: TaskId,
    pub turn_id: u64,
    /// 人类可读的意图说明，取自任务输出槽 "intent"
    #[serde(default)]
    pub intent: String,
    pub slots: Slots,
    /// 通过 bundles_with 合并进来的后续任务
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundled_task_ids: Vec<TaskId>,
    pub created_at: i64,
}

impl MemoryArtifact {
    pub fn new(
        artifact_type: impl Into<String>,
        source_task_id: TaskId,
        turn_id: u64,
        intent: impl Into<String>,
        slots: Slots,
    ) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            source_task_id,
            turn_id,
            intent: intent.into(),
            slots,
            bundled_task_ids: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// 合并后续任务的槽位；同名槽以后者为准
    pub fn absorb(&mut self, task_id: TaskId, slots: Slots, intent: &str) {
        self.slots.extend(slots);
        if self.intent.is_empty() && !intent.is_empty() {
            self.intent = intent.to_string();
        }
        self.bundled_task_ids.push(task_id);
    }
}

/// 一次完整的用户请求与回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: u64,
    pub human_message: String,
    pub ai_response: String,
    #[serde(default)]
    pub artifacts: Vec<MemoryArtifact>,
}

impl TurnRecord {
    pub fn new(turn_id: u64, human_message: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            turn_id,
            human_message: human_message.into(),
            ai_response: ai_response.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<MemoryArtifact>) -> Self {
        self.artifacts = artifacts;
        self
    }
}
