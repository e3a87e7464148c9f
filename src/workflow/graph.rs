//! 任务依赖图与引用解析
//!
//! 任务按 ID 有序存放；引用只能指向更早的任务（或上下文槽 0），因此图天然无环。
//! 每次规划后对所有 pending 任务做一次就绪判定：可解析的转 ready，无效的立即 failed，其余继续等待。

use std::collections::BTreeMap;

use crate::core::EngineError;
use crate::workflow::types::*;

/// 单个引用的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceState {
    /// 来源已提交且槽位存在
    Resolved,
    /// 来源仍在执行中，槽位在其声明的输出里
    Waiting,
    /// 悬空来源 / 槽位缺失 / 上游失败
    Invalid(String),
}

/// 一次就绪判定的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessReport {
    pub ready: Vec<TaskId>,
    pub failed: Vec<(TaskId, String)>,
    pub blocked: Vec<TaskId>,
}

/// 任务依赖图
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.status == status).collect()
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks.into_values().collect()
    }

    /// 判定单个引用
    pub fn check_reference(
        &self,
        dependent: TaskId,
        reference: &Reference,
        completed: &CompletedOutputs,
    ) -> ReferenceState {
        let source = reference.source_task_id;
        let slot = &reference.slot_name;

        if completed.lookup(reference).is_some() {
            return ReferenceState::Resolved;
        }
        if completed.contains(source) {
            return ReferenceState::Invalid(format!(
                "slot '{}' not found in outputs of task {}",
                slot, source
            ));
        }
        if source != TaskId::CONTEXT && source >= dependent {
            return ReferenceState::Invalid(format!(
                "task {} references task {} which is not an earlier task",
                dependent, source
            ));
        }

        match self.tasks.get(&source) {
            None => ReferenceState::Invalid(format!("task {} does not exist", source)),
            Some(task) if task.status == TaskStatus::Failed => ReferenceState::Invalid(format!(
                "upstream task {} failed: {}",
                source,
                task.error.as_deref().unwrap_or("unknown error")
            )),
            Some(task) if task.status.is_terminal() => ReferenceState::Invalid(format!(
                "task {} finished without committing slot '{}'",
                source, slot
            )),
            Some(task) if !task.outputs.is_empty() && !task.outputs.contains(slot) => {
                ReferenceState::Invalid(format!(
                    "slot '{}' is not declared by task {} ({})",
                    slot, source, task.capability
                ))
            }
            Some(_) => ReferenceState::Waiting,
        }
    }

    /// 就绪判定：所有引用都已解析时为 ready；任一无效则给出错误；否则阻塞
    pub fn evaluate(&self, task: &Task, completed: &CompletedOutputs) -> ReferenceState {
        let mut waiting = false;
        for (input, reference) in &task.inputs {
            match self.check_reference(task.id, reference, completed) {
                ReferenceState::Resolved => {}
                ReferenceState::Waiting => waiting = true,
                ReferenceState::Invalid(reason) => {
                    return ReferenceState::Invalid(format!(
                        "invalid reference for input '{}' ({}): {}",
                        input, reference, reason
                    ));
                }
            }
        }
        if waiting {
            ReferenceState::Waiting
        } else {
            ReferenceState::Resolved
        }
    }

    /// 对所有 pending 任务做就绪判定并推进状态（pending → ready / failed）
    pub fn promote_ready(&mut self, completed: &CompletedOutputs) -> Result<ReadinessReport, EngineError> {
        let pending: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id)
            .collect();

        let mut report = ReadinessReport::default();
        // 按 ID 升序处理：同一步里先失败的上游能让下游立即失败
        for id in pending {
            let state = match self.tasks.get(&id) {
                Some(task) => self.evaluate(task, completed),
                None => continue,
            };
            let task = self.tasks.get_mut(&id).ok_or(EngineError::UnknownTask(id))?;
            match state {
                ReferenceState::Resolved => {
                    task.transition(TaskStatus::Ready)?;
                    report.ready.push(id);
                }
                ReferenceState::Invalid(reason) => {
                    task.fail(reason.clone())?;
                    report.failed.push((id, reason));
                }
                ReferenceState::Waiting => report.blocked.push(id),
            }
        }
        Ok(report)
    }

    /// 水合输入：按值复制被引用的槽位
    pub fn hydrate(&self, task: &Task, completed: &CompletedOutputs) -> Result<Slots, EngineError> {
        task.inputs
            .iter()
            .map(|(input, reference)| {
                completed
                    .lookup(reference)
                    .cloned()
                    .map(|value| (input.clone(), value))
                    .ok_or_else(|| {
                        EngineError::Reference(format!(
                            "input '{}' of task {} cannot be resolved from {}",
                            input, task.id, reference
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: u64, inputs: &[(&str, Reference)], outputs: &[&str]) -> Task {
        Task::from_spec(
            TaskId(id),
            TaskSpec {
                capability: "worker".to_string(),
                description: format!("Task {}", id),
                inputs: inputs
                    .iter()
                    .map(|(name, r)| (name.to_string(), r.clone()))
                    .collect(),
                params: serde_json::Map::new(),
                outputs: Some(outputs.iter().map(|s| s.to_string()).collect()),
                category: None,
            },
            None,
        )
    }

    fn completed_with(id: u64, slots: &[(&str, serde_json::Value)]) -> CompletedOutputs {
        let mut completed = CompletedOutputs::new();
        completed
            .seed_context(Slots::from([("goal".to_string(), json!("find things"))]))
            .unwrap();
        completed
            .commit(
                TaskId(id),
                slots.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            )
            .unwrap();
        completed
    }

    #[test]
    fn test_task_without_inputs_is_ready() {
        let mut graph = TaskGraph::new();
        graph.insert(task(1, &[], &["x"]));
        let report = graph.promote_ready(&CompletedOutputs::new()).unwrap();
        assert_eq!(report.ready, vec![TaskId(1)]);
        assert_eq!(graph.get(TaskId(1)).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn test_context_reference_resolves_like_any_other() {
        let mut graph = TaskGraph::new();
        graph.insert(task(2, &[("q", Reference::context("goal"))], &["x"]));
        let completed = completed_with(1, &[("x", json!(1))]);
        let report = graph.promote_ready(&completed).unwrap();
        assert_eq!(report.ready, vec![TaskId(2)]);

        let hydrated = graph.hydrate(graph.get(TaskId(2)).unwrap(), &completed).unwrap();
        assert_eq!(hydrated.get("q"), Some(&json!("find things")));
    }

    #[test]
    fn test_waits_on_running_source() {
        let mut graph = TaskGraph::new();
        let mut source = task(1, &[], &["x"]);
        source.transition(TaskStatus::Ready).unwrap();
        source.transition(TaskStatus::Running).unwrap();
        graph.insert(source);
        graph.insert(task(2, &[("in", Reference::new(1, "x"))], &[]));

        let report = graph.promote_ready(&CompletedOutputs::new()).unwrap();
        assert_eq!(report.blocked, vec![TaskId(2)]);
        assert_eq!(graph.get(TaskId(2)).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_dangling_source_fails_immediately() {
        let mut graph = TaskGraph::new();
        graph.insert(task(5, &[("in", Reference::new(4, "x"))], &[]));
        let report = graph.promote_ready(&CompletedOutputs::new()).unwrap();

        assert_eq!(report.failed.len(), 1);
        let failed = graph.get(TaskId(5)).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("does not exist"));
    }

    #[test]
    fn test_missing_slot_on_committed_source_fails() {
        let mut graph = TaskGraph::new();
        graph.insert(task(2, &[("in", Reference::new(1, "y"))], &[]));
        let completed = completed_with(1, &[("x", json!("foo"))]);
        graph.promote_ready(&completed).unwrap();

        let failed = graph.get(TaskId(2)).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("slot 'y'"));
    }

    #[test]
    fn test_undeclared_slot_fails_before_source_runs() {
        let mut graph = TaskGraph::new();
        graph.insert(task(1, &[], &["x"]));
        graph.insert(task(2, &[("in", Reference::new(1, "nope"))], &[]));
        let report = graph.promote_ready(&CompletedOutputs::new()).unwrap();

        assert_eq!(report.ready, vec![TaskId(1)]);
        assert_eq!(report.failed[0].0, TaskId(2));
    }

    #[test]
    fn test_failed_upstream_fails_dependent() {
        let mut graph = TaskGraph::new();
        graph.insert(task(1, &[("in", Reference::new(9, "x"))], &["x"]));
        graph.insert(task(10, &[("in", Reference::new(1, "x"))], &[]));
        graph.promote_ready(&CompletedOutputs::new()).unwrap();

        let dependent = graph.get(TaskId(10)).unwrap();
        assert_eq!(dependent.status, TaskStatus::Failed);
        assert!(dependent.error.as_deref().unwrap().contains("upstream task 1 failed"));
    }

    #[test]
    fn test_forward_reference_is_invalid() {
        let mut graph = TaskGraph::new();
        graph.insert(task(1, &[("in", Reference::new(2, "x"))], &["x"]));
        graph.insert(task(2, &[("in", Reference::new(1, "x"))], &["x"]));
        let report = graph.promote_ready(&CompletedOutputs::new()).unwrap();

        assert_eq!(report.failed.len(), 2);
        assert!(report.blocked.is_empty());
    }

    #[test]
    fn test_hydration_is_stable_within_round() {
        let mut graph = TaskGraph::new();
        graph.insert(task(2, &[("in", Reference::new(1, "x"))], &[]));
        let completed = completed_with(1, &[("x", json!({"rows": [1, 2, 3]}))]);
        graph.promote_ready(&completed).unwrap();

        let t = graph.get(TaskId(2)).unwrap();
        let first = graph.hydrate(t, &completed).unwrap();
        let second = graph.hydrate(t, &completed).unwrap();
        assert_eq!(first, second);
    }
}
