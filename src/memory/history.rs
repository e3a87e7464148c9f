//! 对话轮历史与持久化
//!
//! 保留最近 N 轮（TurnRecord），超出时剪掉最旧的；可写入/从 JSON 文件加载，用于跨进程恢复。

use std::path::{Path, PathBuf};

use crate::memory::TurnRecord;

/// 最近 N 轮对话
#[derive(Clone, Debug)]
pub struct TurnHistory {
    turns: Vec<TurnRecord>,
    max_turns: usize,
}

impl TurnHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn from_turns(turns: Vec<TurnRecord>, max_turns: usize) -> Self {
        let mut history = Self::new(max_turns);
        history.turns = turns;
        history.prune();
        history
    }

    pub fn push(&mut self, turn: TurnRecord) {
        self.turns.push(turn);
        self.prune();
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    /// 最近 n 轮（按时间顺序）
    pub fn recent(&self, n: usize) -> &[TurnRecord] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// 下一轮的 ID：比已有最大值大 1
    pub fn next_turn_id(&self) -> u64 {
        self.turns.iter().map(|t| t.turn_id).max().map_or(1, |id| id + 1)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn prune(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }
}

/// 单文件 JSON 持久化
#[derive(Debug)]
pub struct HistoryPersistence {
    path: PathBuf,
}

impl HistoryPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 文件不存在时返回空 Vec
    pub fn load(&self) -> anyhow::Result<Vec<TurnRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// 父目录不存在时自动创建
    pub fn save(&self, turns: &[TurnRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(turns)?)?;
        Ok(())
    }
}
