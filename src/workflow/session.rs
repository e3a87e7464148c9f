//! 单次会话的可变状态：任务图、已提交输出、轮次状态机与记忆打包器

use crate::capability::CapabilityRegistry;
use crate::core::RoundState;
use crate::memory::MemoryBundler;
use crate::workflow::{CompletedOutputs, Task, TaskGraph, TaskId, TaskSpec};

pub struct SessionState {
    pub session_id: String,
    pub turn_id: u64,
    pub graph: TaskGraph,
    pub completed: CompletedOutputs,
    pub rounds: RoundState,
    pub bundler: MemoryBundler,
    /// 最近一次 Oracle 给出的推理
    pub reasoning: String,
    next_task_id: TaskId,
}

impl SessionState {
    pub fn new(turn_id: u64, round_budget: u32) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            turn_id,
            graph: TaskGraph::new(),
            completed: CompletedOutputs::new(),
            rounds: RoundState::new(round_budget),
            bundler: MemoryBundler::new(turn_id),
            reasoning: String::new(),
            next_task_id: TaskId(1),
        }
    }

    /// 下一个将被分配的任务 ID（同批任务可以据此互相引用）
    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id
    }

    /// 按顺序为新任务分配 ID 并加入任务图
    pub fn add_tasks(&mut self, specs: Vec<TaskSpec>, registry: &CapabilityRegistry) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = self.next_task_id;
            self.next_task_id = id.next();
            let descriptor = registry.descriptor(&spec.capability);
            self.graph.insert(Task::from_spec(id, spec, descriptor));
            ids.push(id);
        }
        ids
    }
}
