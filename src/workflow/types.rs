//! 任务图类型定义
//!
//! 定义任务、引用、任务结果以及已提交输出表（completed_outputs）等核心数据类型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityDescriptor;
use crate::core::EngineError;

/// 单个任务的输出：槽位名 -> 值
pub type Slots = BTreeMap<String, Value>;

/// 任务 ID：单调分配、永不复用；0 保留给预处理写入的上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// 保留 ID：上下文规范化的输出写在这里
    pub const CONTEXT: TaskId = TaskId(0);

    pub fn next(self) -> TaskId {
        TaskId(self.0 + 1)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

/// 引用：指向某个任务已提交输出中的某个槽位
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    #[serde(alias = "from_task", alias = "from_sub_goal", alias = "task")]
    pub source_task_id: TaskId,
    #[serde(alias = "slot")]
    pub slot_name: String,
}

impl Reference {
    pub fn new(source_task_id: impl Into<TaskId>, slot_name: impl Into<String>) -> Self {
        Self {
            source_task_id: source_task_id.into(),
            slot_name: slot_name.into(),
        }
    }

    /// 指向上下文槽（ID 0）的引用，解析方式与普通引用完全一致
    pub fn context(slot_name: impl Into<String>) -> Self {
        Self::new(TaskId::CONTEXT, slot_name)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task{}.{}", self.source_task_id, self.slot_name)
    }
}

/// 任务类别：中间数据或面向用户的交付物
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Support,
    Deliverable,
}

/// 任务状态：只能前进，不能回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待引用满足
    Pending,
    /// 引用已满足，等待本轮派发
    Ready,
    /// 已派发
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready) | (Pending, Failed) | (Ready, Running) | (Running, Success) | (Running, Failed)
        )
    }
}

/// Oracle 规划出的任务定义（尚未分配 ID）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(alias = "worker")]
    pub capability: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Reference>,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// 未指定时取能力描述中声明的输出
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    /// 未指定时取能力描述中的类别
    #[serde(default, alias = "goal_type")]
    pub category: Option<TaskCategory>,
}

impl TaskSpec {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            description: String::new(),
            inputs: BTreeMap::new(),
            params: serde_json::Map::new(),
            outputs: None,
            category: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 把输入槽接到某个任务的输出槽
    pub fn input(mut self, name: impl Into<String>, reference: Reference) -> Self {
        self.inputs.insert(name.into(), reference);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// 合并进更早任务的记忆条目
    pub fn bundles_with(self, task_id: impl Into<TaskId>) -> Self {
        let id = task_id.into();
        self.param("bundles_with", id.0)
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = Some(outputs.into_iter().map(Into::into).collect());
        self
    }

    pub fn category(mut self, category: TaskCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// 任务节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub capability: String,
    pub description: String,
    pub inputs: BTreeMap<String, Reference>,
    pub params: serde_json::Map<String, Value>,
    pub outputs: Vec<String>,
    pub category: TaskCategory,
    pub status: TaskStatus,
    pub result: Option<Slots>,
    pub error: Option<String>,
    /// Provider 给出的简短说明，透传给下一轮规划
    pub message: Option<String>,
}

impl Task {
    /// 由 TaskSpec 创建任务；输出与类别缺省时从能力描述补全
    pub fn from_spec(id: TaskId, spec: TaskSpec, descriptor: Option<&CapabilityDescriptor>) -> Self {
        let outputs = spec
            .outputs
            .or_else(|| descriptor.map(|d| d.outputs.clone()))
            .unwrap_or_default();
        let category = spec
            .category
            .or_else(|| descriptor.map(|d| d.category))
            .unwrap_or(TaskCategory::Support);

        Self {
            id,
            capability: spec.capability,
            description: spec.description,
            inputs: spec.inputs,
            params: spec.params,
            outputs,
            category,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            message: None,
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTaskTransition {
                task_id: self.id,
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// params.bundles_with（或 bundles_with_sub_goal）：要合并进的更早任务 ID（只按显式 ID 匹配）；
    /// 接受数字或数字字符串
    pub fn bundles_with(&self) -> Option<TaskId> {
        let value = self
            .params
            .get("bundles_with")
            .or_else(|| self.params.get("bundles_with_sub_goal"))?;
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(TaskId)
    }
}

/// 单次结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Provider 返回（或边界包装器生成）的任务结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: ResultStatus,
    #[serde(default)]
    pub outputs: Slots,
    #[serde(default)]
    pub error: Option<String>,
    /// 给 Oracle 看的简短说明
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: TaskId, outputs: Slots) -> Self {
        Self {
            task_id,
            status: ResultStatus::Success,
            outputs,
            error: None,
            message: None,
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: ResultStatus::Failed,
            outputs: Slots::new(),
            error: Some(error.into()),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// 已提交输出表：任务 ID -> 槽位值；写入后不可变（上下文槽只写一次）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletedOutputs {
    entries: BTreeMap<TaskId, Slots>,
}

impl CompletedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入上下文槽（ID 0），只允许一次，且必须在第一轮之前
    pub fn seed_context(&mut self, slots: Slots) -> Result<(), EngineError> {
        if self.entries.contains_key(&TaskId::CONTEXT) {
            return Err(EngineError::AlreadyCommitted(TaskId::CONTEXT));
        }
        self.entries.insert(TaskId::CONTEXT, slots);
        Ok(())
    }

    /// 提交任务输出；同一任务只能提交一次
    pub fn commit(&mut self, task_id: TaskId, slots: Slots) -> Result<(), EngineError> {
        if task_id == TaskId::CONTEXT || self.entries.contains_key(&task_id) {
            return Err(EngineError::AlreadyCommitted(task_id));
        }
        self.entries.insert(task_id, slots);
        Ok(())
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Slots> {
        self.entries.get(&task_id)
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.contains_key(&task_id)
    }

    /// 统一查找规则：来源存在且槽位存在
    pub fn lookup(&self, reference: &Reference) -> Option<&Value> {
        self.entries
            .get(&reference.source_task_id)
            .and_then(|slots| slots.get(&reference.slot_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &Slots)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(capability: &str) -> TaskSpec {
        TaskSpec::new(capability)
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut task = Task::from_spec(TaskId(1), spec("echo"), None);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Success).unwrap();

        assert!(task.transition(TaskStatus::Running).is_err());
        assert!(task.transition(TaskStatus::Pending).is_err());
        assert!(task.fail("late").is_err());
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut task = Task::from_spec(TaskId(1), spec("echo"), None);
        task.fail("dangling reference").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("dangling reference"));
    }

    #[test]
    fn test_ready_cannot_skip_running() {
        let mut task = Task::from_spec(TaskId(1), spec("echo"), None);
        task.transition(TaskStatus::Ready).unwrap();
        assert!(task.transition(TaskStatus::Success).is_err());
    }

    #[test]
    fn test_commit_is_write_once() {
        let mut outputs = CompletedOutputs::new();
        outputs
            .commit(TaskId(1), Slots::from([("x".to_string(), json!("foo"))]))
            .unwrap();
        let again = outputs.commit(TaskId(1), Slots::new());
        assert_eq!(again, Err(EngineError::AlreadyCommitted(TaskId(1))));
        assert_eq!(outputs.lookup(&Reference::new(1, "x")), Some(&json!("foo")));
    }

    #[test]
    fn test_context_slot_seeded_once_and_not_committable() {
        let mut outputs = CompletedOutputs::new();
        outputs
            .seed_context(Slots::from([("goal".to_string(), json!("hi"))]))
            .unwrap();
        assert!(outputs.seed_context(Slots::new()).is_err());
        assert!(outputs.commit(TaskId::CONTEXT, Slots::new()).is_err());
        assert_eq!(outputs.lookup(&Reference::context("goal")), Some(&json!("hi")));
    }

    #[test]
    fn test_bundles_with_param() {
        let task = Task::from_spec(TaskId(4), spec("exec").bundles_with(3), None);
        assert_eq!(task.bundles_with(), Some(TaskId(3)));
    }

    #[test]
    fn test_bundles_with_accepts_numeric_string_and_long_key() {
        let quoted = Task::from_spec(TaskId(4), spec("exec").param("bundles_with", " 3 "), None);
        assert_eq!(quoted.bundles_with(), Some(TaskId(3)));

        let long_key = Task::from_spec(TaskId(5), spec("exec").param("bundles_with_sub_goal", 2), None);
        assert_eq!(long_key.bundles_with(), Some(TaskId(2)));

        let garbage = Task::from_spec(TaskId(6), spec("exec").param("bundles_with", "three"), None);
        assert_eq!(garbage.bundles_with(), None);
    }

    #[test]
    fn test_reference_accepts_short_field_names() {
        let r: Reference = serde_json::from_value(json!({"task": 2, "slot": "y"})).unwrap();
        assert_eq!(r, Reference::new(2, "y"));

        let r: Reference = serde_json::from_value(json!({"from_sub_goal": 3, "slot_name": "z"})).unwrap();
        assert_eq!(r, Reference::new(3, "z"));
    }
}
