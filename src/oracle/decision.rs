//! Oracle 决定与解析
//!
//! LLM 输出可能是 ```json 代码块，也可能是裸 JSON 或带前后说明文字，统一提取第一个 JSON 对象。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::EngineError;
use crate::workflow::{Reference, TaskSpec};

/// 规划动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Continue,
    Done,
    Failed,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Continue => "continue",
            PlanAction::Done => "done",
            PlanAction::Failed => "failed",
        }
    }
}

/// 一轮规划的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub action: PlanAction,
    #[serde(default)]
    pub reasoning: String,
    /// 新任务，按顺序分配 ID（从规划上下文中的 next_task_id 开始）
    #[serde(default, alias = "sub_goals")]
    pub tasks: Vec<TaskSpec>,
    /// 回复中的命名输出 -> 引用（仅 done 时使用）
    #[serde(default, alias = "synthesis_inputs")]
    pub synthesis_refs: BTreeMap<String, Reference>,
}

impl PlanDecision {
    pub fn continue_with(reasoning: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            action: PlanAction::Continue,
            reasoning: reasoning.into(),
            tasks,
            synthesis_refs: BTreeMap::new(),
        }
    }

    pub fn done(reasoning: impl Into<String>, synthesis_refs: BTreeMap<String, Reference>) -> Self {
        Self {
            action: PlanAction::Done,
            reasoning: reasoning.into(),
            tasks: Vec::new(),
            synthesis_refs,
        }
    }

    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self {
            action: PlanAction::Failed,
            reasoning: reasoning.into(),
            tasks: Vec::new(),
            synthesis_refs: BTreeMap::new(),
        }
    }
}

/// 从 LLM 文本中解析 PlanDecision
pub fn parse_decision(output: &str) -> Result<PlanDecision, EngineError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Err(EngineError::Oracle(format!(
            "no JSON object in oracle output: {}",
            trimmed
        )));
    };

    serde_json::from_str(json_str)
        .map_err(|e| EngineError::Oracle(format!("{}: {}", e, json_str)))
}
