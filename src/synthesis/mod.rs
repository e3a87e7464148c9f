//! 合成：把 Oracle 在 done 时指定的引用解析成最终回复
//!
//! 每个命名引用按来源能力的呈现方式分组：narrative 交给 Composer 写成一段话，
//! display 按来源任务 ID 顺序原样附在后面，hidden 不出现在回复里。解析不到的引用被省略并记录。

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::capability::executor::panic_message;
use crate::capability::{CapabilityRegistry, PresentationMode};
use crate::core::EngineError;
use crate::llm::{LlmClient, Message};
use crate::oracle::value_text;
use crate::workflow::{CompletedOutputs, Reference, TaskCategory, TaskGraph, TaskId};

/// 一个解析成功的命名输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOutput {
    pub name: String,
    pub reference: Reference,
    pub value: Value,
    pub presentation: PresentationMode,
}

/// 最终回复
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledResponse {
    pub text: String,
    /// 出现在回复中的命名输出（不含 hidden）
    pub resolved: BTreeMap<String, Value>,
    /// 解析失败而省略的名字
    pub omitted: Vec<String>,
}

#[async_trait]
pub trait Composer: Send + Sync {
    /// 把叙述型输出写成回复正文
    async fn compose(&self, goal: &str, narrative: &[ResolvedOutput]) -> Result<String, EngineError>;
}

/// 直接拼接各输出的文本
#[derive(Debug, Default, Clone)]
pub struct PlainComposer;

#[async_trait]
impl Composer for PlainComposer {
    async fn compose(&self, _goal: &str, narrative: &[ResolvedOutput]) -> Result<String, EngineError> {
        Ok(join_plain(narrative))
    }
}

fn join_plain(outputs: &[ResolvedOutput]) -> String {
    outputs
        .iter()
        .map(|o| value_text(&o.value))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 用 LLM 把叙述型输出组织成回答
pub struct LlmComposer {
    llm: Arc<dyn LlmClient>,
}

impl LlmComposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Composer for LlmComposer {
    async fn compose(&self, goal: &str, narrative: &[ResolvedOutput]) -> Result<String, EngineError> {
        let material = narrative
            .iter()
            .map(|o| format!("[{}]\n{}", o.name, value_text(&o.value)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages = vec![
            Message::system(
                "Write the final answer to the user's request using only the material provided. \
                 Be concise and do not mention tasks or internal steps.",
            ),
            Message::user(format!("Request: {}\n\nMaterial:\n{}", goal, material)),
        ];
        self.llm.complete(&messages).await.map_err(EngineError::Oracle)
    }
}

/// 引用解析与分组
pub struct SynthesisResolver<'a> {
    registry: &'a CapabilityRegistry,
    graph: &'a TaskGraph,
    completed: &'a CompletedOutputs,
}

impl<'a> SynthesisResolver<'a> {
    pub fn new(
        registry: &'a CapabilityRegistry,
        graph: &'a TaskGraph,
        completed: &'a CompletedOutputs,
    ) -> Self {
        Self {
            registry,
            graph,
            completed,
        }
    }

    /// 来源任务的呈现方式；上下文槽视为叙述
    fn presentation(&self, source: TaskId) -> PresentationMode {
        if source == TaskId::CONTEXT {
            return PresentationMode::Narrative;
        }
        self.graph
            .get(source)
            .and_then(|task| self.registry.descriptor(&task.capability))
            .map(|d| d.presentation)
            .unwrap_or_default()
    }

    /// 解析命名引用；返回解析成功的输出与省略的名字
    pub fn resolve(&self, refs: &BTreeMap<String, Reference>) -> (Vec<ResolvedOutput>, Vec<String>) {
        let mut resolved = Vec::new();
        let mut omitted = Vec::new();
        for (name, reference) in refs {
            match self.completed.lookup(reference) {
                Some(value) => resolved.push(ResolvedOutput {
                    name: name.clone(),
                    reference: reference.clone(),
                    value: value.clone(),
                    presentation: self.presentation(reference.source_task_id),
                }),
                None => {
                    tracing::warn!(name = %name, reference = %reference, "Synthesis reference unresolved, omitting");
                    omitted.push(name.clone());
                }
            }
        }
        (resolved, omitted)
    }

    /// Oracle 没有指定引用时，取所有成功交付物的输出槽
    pub fn deliverable_refs(&self) -> BTreeMap<String, Reference> {
        let mut refs = BTreeMap::new();
        for task in self.graph.tasks() {
            if task.category != TaskCategory::Deliverable {
                continue;
            }
            let Some(slots) = self.completed.get(task.id) else {
                continue;
            };
            for slot in slots.keys() {
                if slot == crate::memory::INTENT_SLOT {
                    continue;
                }
                refs.insert(
                    format!("task{}_{}", task.id, slot),
                    Reference::new(task.id, slot.clone()),
                );
            }
        }
        refs
    }

    /// 解析并组装回复；Composer 失败时退回直接拼接
    pub async fn assemble(
        &self,
        goal: &str,
        refs: &BTreeMap<String, Reference>,
        composer: &dyn Composer,
    ) -> AssembledResponse {
        let refs = if refs.is_empty() {
            self.deliverable_refs()
        } else {
            refs.clone()
        };
        let (resolved, omitted) = self.resolve(&refs);

        let mut narrative = Vec::new();
        let mut display = Vec::new();
        for output in resolved {
            match output.presentation {
                PresentationMode::Narrative => narrative.push(output),
                PresentationMode::Display => display.push(output),
                PresentationMode::Hidden => {}
            }
        }
        display.sort_by(|a, b| {
            (a.reference.source_task_id, &a.name).cmp(&(b.reference.source_task_id, &b.name))
        });

        let mut parts = Vec::new();
        if !narrative.is_empty() {
            let composed = AssertUnwindSafe(composer.compose(goal, &narrative))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(EngineError::Oracle(format!(
                        "composer panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            let prose = match composed {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Composer failed, joining outputs directly");
                    join_plain(&narrative)
                }
            };
            if !prose.trim().is_empty() {
                parts.push(prose);
            }
        }
        parts.extend(display.iter().map(|o| value_text(&o.value)));

        let shown: BTreeMap<String, Value> = narrative
            .into_iter()
            .chain(display)
            .map(|o| (o.name, o.value))
            .collect();

        AssembledResponse {
            text: parts.join("\n\n"),
            resolved: shown,
            omitted,
        }
    }
}
