//! 会话状态机：planning → executing → joining → planning，终态 done / failed
//!
//! 轮次计数只在 Join 中 +1；预算检查在调用 Oracle 之前进行。

use serde::{Deserialize, Serialize};

use crate::core::EngineError;

/// 会话整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planning,
    Executing,
    Joining,
    Done,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Executing => "executing",
            SessionStatus::Joining => "joining",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }

    fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, Done)
                | (Planning, Failed)
                | (Executing, Joining)
                | (Joining, Planning)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 轮次状态：当前状态、轮次（从 1 开始）、预算
#[derive(Debug, Clone)]
pub struct RoundState {
    status: SessionStatus,
    round: u32,
    budget: u32,
}

impl RoundState {
    pub fn new(budget: u32) -> Self {
        Self {
            status: SessionStatus::Planning,
            round: 1,
            budget,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// 轮次已超出预算（在调用 Oracle 之前检查）
    pub fn budget_exceeded(&self) -> bool {
        self.round > self.budget
    }

    pub fn transition(&mut self, next: SessionStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidSessionTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Join 完成：joining → planning，轮次 +1
    pub fn advance_round(&mut self) -> Result<u32, EngineError> {
        self.transition(SessionStatus::Planning)?;
        self.round += 1;
        Ok(self.round)
    }
}
