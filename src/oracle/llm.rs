//! LLM Oracle：把规划上下文渲染成提示词，解析模型返回的 JSON 决定

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::EngineError;
use crate::llm::{LlmClient, Message};
use crate::oracle::{parse_decision, PlanDecision, PlanningContext, PlanningOracle};

/// 规划提示词的开头；Mock 客户端据此区分规划与合成请求
pub const ORACLE_MARKER: &str = "You are the planning oracle of a task-graph engine.";

const RULES: &str = r#"Each round, decide one of:
- "continue": add new tasks. Tasks get ids in order, starting at the next task id shown below.
  A task input is a reference {"source_task_id": N, "slot_name": "slot"} to an earlier task's output
  (or to task 0, the request context). Tasks in the same batch may reference earlier tasks in that batch.
  Optional params.bundles_with = N merges the task's memory into task N's.
- "done": the goal is met. Put the outputs to show in "synthesis_refs": {"name": reference}.
- "failed": the goal cannot be met. Explain why in "reasoning".
Failed tasks stay failed; plan around them. Do not exceed the round budget.

Reply with a single JSON object:
{"action": "continue" | "done" | "failed", "reasoning": "...",
 "tasks": [{"capability": "...", "description": "...", "inputs": {...}, "params": {...}}],
 "synthesis_refs": {...}}"#;

pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt(ctx: &PlanningContext) -> String {
        format!(
            "{}\n\n{}\n\nAvailable capabilities:\n{}",
            ORACLE_MARKER,
            RULES,
            ctx.render_capabilities()
        )
    }
}

#[async_trait]
impl PlanningOracle for LlmOracle {
    async fn plan(&self, ctx: &PlanningContext) -> Result<PlanDecision, EngineError> {
        let messages = vec![
            Message::system(Self::system_prompt(ctx)),
            Message::user(ctx.render_state()),
        ];
        let output = self.llm.complete(&messages).await.map_err(EngineError::Oracle)?;
        tracing::debug!(round = ctx.round, output = %output, "Oracle output");
        parse_decision(&output)
    }
}
