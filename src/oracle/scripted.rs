//! 脚本化 Oracle：按顺序返回预设决定，或由闭包根据上下文生成决定；记录每次收到的上下文

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::EngineError;
use crate::oracle::{PlanDecision, PlanningContext, PlanningOracle};

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    decisions: Mutex<VecDeque<PlanDecision>>,
    seen: Mutex<Vec<PlanningContext>>,
}

impl ScriptedOracle {
    pub fn new(decisions: impl IntoIterator<Item = PlanDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// 每次调用时收到的上下文
    pub fn contexts(&self) -> Vec<PlanningContext> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PlanningOracle for ScriptedOracle {
    async fn plan(&self, ctx: &PlanningContext) -> Result<PlanDecision, EngineError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(ctx.clone());
        }
        let next = self
            .decisions
            .lock()
            .map_err(|e| EngineError::Oracle(e.to_string()))?
            .pop_front();
        Ok(next.unwrap_or_else(|| PlanDecision::failed("script exhausted")))
    }
}

/// 闭包 Oracle
pub struct FnOracle<F> {
    f: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&PlanningContext) -> Result<PlanDecision, EngineError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> PlanningOracle for FnOracle<F>
where
    F: Fn(&PlanningContext) -> Result<PlanDecision, EngineError> + Send + Sync,
{
    async fn plan(&self, ctx: &PlanningContext) -> Result<PlanDecision, EngineError> {
        (self.f)(ctx)
    }
}
