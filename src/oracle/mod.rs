//! 规划 Oracle：每轮根据当前状态决定 continue（追加任务）/ done（合成回复）/ failed
//!
//! 引擎对 Oracle 的内部实现不做假设；LLM、脚本或任意闭包都可以充当 Oracle。

pub mod context;
pub mod decision;
pub mod llm;
pub mod scripted;

use async_trait::async_trait;

pub use context::{value_text, PlanningContext, TaskSummary};
pub use decision::{parse_decision, PlanAction, PlanDecision};
pub use llm::{LlmOracle, ORACLE_MARKER};
pub use scripted::{FnOracle, ScriptedOracle};

use crate::core::EngineError;

#[async_trait]
pub trait PlanningOracle: Send + Sync {
    async fn plan(&self, ctx: &PlanningContext) -> Result<PlanDecision, EngineError>;
}
