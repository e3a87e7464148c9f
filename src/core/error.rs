//! 引擎错误类型
//!
//! 会话级错误（EngineError）与 Provider 侧错误（ProviderError）分开：
//! 前者决定会话能否继续，后者只会把单个任务标记为 failed，由下一轮规划决定如何处理。

use thiserror::Error;

use crate::workflow::TaskId;

/// 编排过程中可能出现的错误（引用、预算、退化计划、Oracle、状态迁移等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfiguration(String),

    /// 引用无法满足（悬空来源或槽位缺失），只影响依赖它的任务
    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Round budget exceeded: round {round} > budget {budget}")]
    BudgetExceeded { round: u32, budget: u32 },

    /// Oracle 返回 continue 却没有任何任务
    #[error("Degenerate plan: continue with no tasks")]
    DegeneratePlan,

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Invalid task transition for task {task_id}: {from} -> {to}")]
    InvalidTaskTransition {
        task_id: TaskId,
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidSessionTransition { from: &'static str, to: &'static str },

    /// completed_outputs 写入后不可变
    #[error("Outputs for task {0} already committed")]
    AlreadyCommitted(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    /// Join 只在结果数等于派发数时触发
    #[error("Join barrier not reached: {received}/{dispatched} results")]
    IncompleteRound { received: usize, dispatched: usize },
}

/// Provider 调用失败的原因；由边界包装器转为 failed 的 TaskResult，不会越过 Reducer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("provider timed out after {0}s")]
    Timeout(u64),

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}
