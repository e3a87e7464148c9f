//! 规划上下文：每轮交给 Oracle 的全部信息
//!
//! 目标、能力描述、已完成 / 失败 / 等待中的任务摘要、轮次与预算，以及下一个任务 ID。
//! 输出预览按字符截断，避免上下文过长。

use serde::Serialize;

use crate::capability::{CapabilityDescriptor, CapabilityRegistry};
use crate::core::RoundState;
use crate::workflow::{CompletedOutputs, ReferenceState, TaskGraph, TaskId, TaskStatus};

/// 单个任务的摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub capability: String,
    pub description: String,
    /// 槽位名 -> 截断后的值预览
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 尚未满足的引用（仅等待中的任务）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub waiting_for: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanningContext {
    pub goal: String,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub completed: Vec<TaskSummary>,
    pub failed: Vec<TaskSummary>,
    pub pending: Vec<TaskSummary>,
    pub round: u32,
    pub round_budget: u32,
    pub next_task_id: TaskId,
    /// 上下文槽（ID 0）中可引用的槽位名
    pub context_slots: Vec<String>,
}

impl PlanningContext {
    pub fn build(
        goal: &str,
        registry: &CapabilityRegistry,
        graph: &TaskGraph,
        completed: &CompletedOutputs,
        rounds: &RoundState,
        next_task_id: TaskId,
        preview_chars: usize,
    ) -> Self {
        let mut ctx = Self {
            goal: goal.to_string(),
            capabilities: registry.descriptors().cloned().collect(),
            completed: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
            round: rounds.round(),
            round_budget: rounds.budget(),
            next_task_id,
            context_slots: completed
                .get(TaskId::CONTEXT)
                .map(|slots| slots.keys().cloned().collect())
                .unwrap_or_default(),
        };

        for task in graph.tasks() {
            let mut summary = TaskSummary {
                id: task.id,
                capability: task.capability.clone(),
                description: task.description.clone(),
                outputs: Vec::new(),
                error: task.error.clone(),
                message: task.message.clone(),
                waiting_for: Vec::new(),
            };
            match task.status {
                TaskStatus::Success => {
                    if let Some(slots) = completed.get(task.id) {
                        summary.outputs = slots
                            .iter()
                            .map(|(k, v)| (k.clone(), preview(&value_text(v), preview_chars)))
                            .collect();
                    }
                    ctx.completed.push(summary);
                }
                TaskStatus::Failed => ctx.failed.push(summary),
                _ => {
                    summary.waiting_for = task
                        .inputs
                        .values()
                        .filter(|r| {
                            graph.check_reference(task.id, r, completed) == ReferenceState::Waiting
                        })
                        .map(|r| r.to_string())
                        .collect();
                    ctx.pending.push(summary);
                }
            }
        }
        ctx
    }

    /// 能力描述（给 Oracle 的 system prompt 用）
    pub fn render_capabilities(&self) -> String {
        self.capabilities
            .iter()
            .map(|d| {
                let mut line = format!("- {}: {} (category: {:?}", d.name, d.description, d.category);
                if !d.outputs.is_empty() {
                    line.push_str(&format!(", outputs: {}", d.outputs.join(", ")));
                }
                line.push(')');
                if !d.preconditions.is_empty() {
                    line.push_str(&format!("\n  requires: {}", d.preconditions.join("; ")));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 当前状态（给 Oracle 的 user 消息）
    pub fn render_state(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Goal: {}\n", self.goal));
        out.push_str(&format!(
            "Round {} of {}. Next task id: {}.\n",
            self.round, self.round_budget, self.next_task_id
        ));
        out.push_str(&format!(
            "Context slots (task 0): {}\n\n",
            if self.context_slots.is_empty() {
                "(none)".to_string()
            } else {
                self.context_slots.join(", ")
            }
        ));

        out.push_str("Completed tasks:\n");
        render_section(&mut out, &self.completed);
        out.push_str("\nFailed tasks:\n");
        render_section(&mut out, &self.failed);
        out.push_str("\nPending tasks:\n");
        render_section(&mut out, &self.pending);
        out
    }
}

fn render_section(out: &mut String, tasks: &[TaskSummary]) {
    if tasks.is_empty() {
        out.push_str("(none yet)\n");
        return;
    }
    for t in tasks {
        out.push_str(&format!("- task {} [{}] {}\n", t.id, t.capability, t.description));
        for (slot, value) in &t.outputs {
            out.push_str(&format!("    {} = {}\n", slot, value));
        }
        if let Some(err) = &t.error {
            out.push_str(&format!("    error: {}\n", err));
        }
        if let Some(msg) = &t.message {
            out.push_str(&format!("    note: {}\n", msg));
        }
        if !t.waiting_for.is_empty() {
            out.push_str(&format!("    waiting for: {}\n", t.waiting_for.join(", ")));
        }
    }
}

/// 字符串值原样，其余转 JSON
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
