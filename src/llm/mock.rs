//! Mock LLM 客户端（用于本地运行与测试，无需 API）
//!
//! 作为 Oracle 时：第一轮把目标交给 echo，之后宣告完成；作为 Composer 时回显最后一条 User 消息。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};
use crate::oracle::ORACLE_MARKER;

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let planning = messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains(ORACLE_MARKER));
        if !planning {
            return Ok(last_user.to_string());
        }

        if last_user.contains("Completed tasks:\n(none yet)") {
            Ok(r#"{"action": "continue", "reasoning": "Echo the request back.",
  "tasks": [{"capability": "echo", "description": "echo the goal",
             "inputs": {"text": {"source_task_id": 0, "slot_name": "goal"}}}]}"#
                .to_string())
        } else {
            Ok(r#"{"action": "done", "reasoning": "Echo finished.", "synthesis_refs": {}}"#.to_string())
        }
    }
}
