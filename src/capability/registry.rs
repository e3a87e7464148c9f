//! 能力注册表
//!
//! 所有 Provider 实现 CapabilityProvider（descriptor / invoke），由 CapabilityRegistry 按名注册与查找；
//! 描述表是静态的：前置条件只展示给 Oracle，memorable_slots 与呈现方式供 Join / Synthesis 使用。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ProviderError;
use crate::workflow::{Slots, TaskCategory, TaskId, TaskResult};

/// 交付物在最终回复中的呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    /// 交给外部组合步骤融入正文
    #[default]
    Narrative,
    /// 原样追加在正文之后
    Display,
    /// 永远不进入最终回复
    Hidden,
}

/// 能力描述（注册表条目）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    /// 供 Oracle 判断的文字前置条件，引擎不做机械求值
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    pub category: TaskCategory,
    /// 值得跨轮保存的输出槽；为空表示不生成记忆条目
    #[serde(default)]
    pub memorable_slots: Vec<String>,
    #[serde(default)]
    pub presentation: PresentationMode,
    /// 记忆条目类型标签，缺省为能力名
    #[serde(default)]
    pub artifact_type: Option<String>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, category: TaskCategory) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            preconditions: Vec::new(),
            outputs: Vec::new(),
            category,
            memorable_slots: Vec::new(),
            presentation: PresentationMode::default(),
            artifact_type: None,
        }
    }

    pub fn with_preconditions<I, S>(mut self, preconditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preconditions = preconditions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memorable_slots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memorable_slots = slots.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_presentation(mut self, presentation: PresentationMode) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    pub fn artifact_type(&self) -> &str {
        self.artifact_type.as_deref().unwrap_or(&self.name)
    }

    pub fn is_memorable(&self) -> bool {
        !self.memorable_slots.is_empty()
    }
}

/// 一次 Provider 调用的输入
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub task_id: TaskId,
    pub capability: String,
    pub resolved_inputs: Slots,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Invocation {
    /// 先查已解析输入，再查 params
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.resolved_inputs.get(key).or_else(|| self.params.get(key))
    }
}

/// 能力 Provider：输入相同则输出相同，不产生引擎可见的副作用
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn descriptor(&self) -> CapabilityDescriptor;

    /// 业务失败返回 Ok(TaskResult::failed(..))；Err 表示内部故障，由边界包装器转换
    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError>;
}

/// 能力注册表：按名称存储描述与 Arc<dyn CapabilityProvider>
#[derive(Default)]
pub struct CapabilityRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
    descriptors: BTreeMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl CapabilityProvider + 'static) {
        self.register_arc(Arc::new(provider));
    }

    pub fn register_arc(&mut self, provider: Arc<dyn CapabilityProvider>) {
        let descriptor = provider.descriptor();
        let name = descriptor.name.clone();
        if self.descriptors.contains_key(&name) {
            tracing::warn!(capability = %name, "Capability registered twice, replacing");
        }
        self.descriptors.insert(name.clone(), descriptor);
        self.providers.insert(name, provider);
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(name)
    }

    /// 按名称排序的描述列表，用于生成 Oracle 的能力视图
    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::EchoProvider;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = CapabilityRegistry::new();
        registry.register(EchoProvider);

        assert!(registry.provider("echo").is_some());
        assert!(registry.provider("nope").is_none());
        let descriptor = registry.descriptor("echo").unwrap();
        assert_eq!(descriptor.category, TaskCategory::Deliverable);
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_artifact_type_defaults_to_name() {
        let d = CapabilityDescriptor::new("query_gen", "builds queries", TaskCategory::Support);
        assert_eq!(d.artifact_type(), "query_gen");
        assert!(!d.is_memorable());

        let d = d.with_artifact_type("query").with_memorable_slots(["query"]);
        assert_eq!(d.artifact_type(), "query");
        assert!(d.is_memorable());
    }
}
