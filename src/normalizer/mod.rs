//! 上下文规范化：把原始请求与最近几轮对话整理成目标文本与上下文槽（ID 0）
//!
//! 上下文槽只在会话开始时写入一次，之后和普通任务输出一样通过引用读取。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::EngineError;
use crate::memory::TurnRecord;
use crate::workflow::Slots;

/// 目标文本所在的上下文槽
pub const GOAL_SLOT: &str = "goal";

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContext {
    pub goal_text: String,
    pub context_slots: Slots,
}

impl NormalizedContext {
    /// 只有目标、没有额外上下文
    pub fn from_goal(goal: impl Into<String>) -> Self {
        Self {
            goal_text: goal.into(),
            context_slots: Slots::new(),
        }
    }

    /// 写入上下文槽的最终内容：context_slots 加上 goal
    pub fn into_slots(self) -> Slots {
        let mut slots = self.context_slots;
        slots.insert(GOAL_SLOT.to_string(), json!(self.goal_text));
        slots
    }
}

#[async_trait]
pub trait ContextNormalizer: Send + Sync {
    async fn normalize(
        &self,
        raw_request: &str,
        history: &[TurnRecord],
    ) -> Result<NormalizedContext, EngineError>;
}

/// 原样使用请求作为目标，并附上最近 N 轮的对话与记忆条目
#[derive(Debug, Clone)]
pub struct HistoryNormalizer {
    window: usize,
}

impl HistoryNormalizer {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl Default for HistoryNormalizer {
    fn default() -> Self {
        Self::new(crate::config::default_history_window())
    }
}

#[async_trait]
impl ContextNormalizer for HistoryNormalizer {
    async fn normalize(
        &self,
        raw_request: &str,
        history: &[TurnRecord],
    ) -> Result<NormalizedContext, EngineError> {
        let start = history.len().saturating_sub(self.window);
        let recent = &history[start..];

        let mut slots = Slots::new();
        slots.insert("original_request".to_string(), json!(raw_request));

        if !recent.is_empty() {
            let transcript = recent
                .iter()
                .map(|t| format!("User: {}\nAssistant: {}", t.human_message, t.ai_response))
                .collect::<Vec<_>>()
                .join("\n\n");
            slots.insert("chat_history".to_string(), json!(transcript));

            let artifacts: Vec<Value> = recent
                .iter()
                .flat_map(|t| t.artifacts.iter())
                .filter_map(|a| serde_json::to_value(a).ok())
                .collect();
            if !artifacts.is_empty() {
                slots.insert("prior_artifacts".to_string(), Value::Array(artifacts));
            }
        }

        Ok(NormalizedContext {
            goal_text: raw_request.trim().to_string(),
            context_slots: slots,
        })
    }
}
