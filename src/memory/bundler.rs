//! 记忆打包：把本次会话中值得记住的任务输出整理成 MemoryArtifact
//!
//! 只有能力描述声明了 memorable_slots 的成功任务才会产出条目；带 bundles_with 的任务
//! 合并进更早任务的条目，而不是另起一条。匹配只按显式任务 ID。

use crate::capability::CapabilityDescriptor;
use crate::memory::MemoryArtifact;
use crate::workflow::{Slots, Task, TaskId};

/// 任务输出中约定的意图槽
pub const INTENT_SLOT: &str = "intent";

/// 单次记录的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleAction {
    Created(TaskId),
    Merged { into: TaskId },
}

/// 会话级记忆打包器
#[derive(Debug, Clone, Default)]
pub struct MemoryBundler {
    turn_id: u64,
    artifacts: Vec<MemoryArtifact>,
}

impl MemoryBundler {
    pub fn new(turn_id: u64) -> Self {
        Self {
            turn_id,
            artifacts: Vec::new(),
        }
    }

    /// 处理一个成功任务；能力不可记忆或没有可记忆的槽位时返回 None
    pub fn record(
        &mut self,
        task: &Task,
        outputs: &Slots,
        descriptor: &CapabilityDescriptor,
    ) -> Option<BundleAction> {
        if !descriptor.is_memorable() {
            return None;
        }

        let slots: Slots = descriptor
            .memorable_slots
            .iter()
            .filter_map(|name| outputs.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        if slots.is_empty() {
            tracing::debug!(task_id = %task.id, "No memorable slots in outputs, skipping");
            return None;
        }

        let intent = outputs
            .get(INTENT_SLOT)
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if let Some(target) = task.bundles_with() {
            let existing = self
                .artifacts
                .iter_mut()
                .find(|a| target < task.id && a.source_task_id == target);
            match existing {
                Some(artifact) => {
                    artifact.absorb(task.id, slots, intent);
                    tracing::debug!(task_id = %task.id, into = %target, "Bundled into existing artifact");
                    return Some(BundleAction::Merged { into: target });
                }
                None => {
                    tracing::warn!(
                        task_id = %task.id,
                        bundles_with = %target,
                        "Bundle target has no artifact in this session, creating a standalone one"
                    );
                }
            }
        }

        self.artifacts.push(MemoryArtifact::new(
            descriptor.artifact_type(),
            task.id,
            self.turn_id,
            intent,
            slots,
        ));
        Some(BundleAction::Created(task.id))
    }

    pub fn artifacts(&self) -> &[MemoryArtifact] {
        &self.artifacts
    }

    pub fn into_artifacts(self) -> Vec<MemoryArtifact> {
        self.artifacts
    }
}
