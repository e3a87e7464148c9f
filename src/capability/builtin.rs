//! 内置 Provider（演示与测试用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capability::{CapabilityDescriptor, CapabilityProvider, Invocation, PresentationMode};
use crate::core::ProviderError;
use crate::workflow::{Slots, TaskCategory, TaskResult};

/// Echo：回显输入文本，作为叙述型交付物
pub struct EchoProvider;

#[async_trait]
impl CapabilityProvider for EchoProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "echo",
            "Echo text back to the user. Inputs/params: {\"text\": \"message\"}",
            TaskCategory::Deliverable,
        )
        .with_preconditions(["some text to repeat is available"])
        .with_outputs(["answer", "intent"])
        .with_memorable_slots(["answer"])
        .with_presentation(PresentationMode::Narrative)
    }

    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError> {
        let Some(text) = invocation.value("text").and_then(Value::as_str) else {
            return Ok(TaskResult::failed(invocation.task_id, "missing 'text' input"));
        };
        let intent: String = text.chars().take(60).collect();
        let outputs = Slots::from([
            ("answer".to_string(), json!(text)),
            ("intent".to_string(), json!(format!("echo: {}", intent))),
        ]);
        Ok(TaskResult::success(invocation.task_id, outputs).with_message("echoed input text"))
    }
}

/// ContextLookup：把一个已解析的输入原样转成输出槽 value（常用于取出上下文槽）
pub struct ContextLookupProvider;

#[async_trait]
impl CapabilityProvider for ContextLookupProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "context_lookup",
            "Copy a referenced value into slot 'value'. Inputs: {\"source\": reference}",
            TaskCategory::Support,
        )
        .with_outputs(["value"])
    }

    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError> {
        match invocation.value("source") {
            Some(value) => Ok(TaskResult::success(
                invocation.task_id,
                Slots::from([("value".to_string(), value.clone())]),
            )),
            None => Ok(TaskResult::failed(invocation.task_id, "missing 'source' input")),
        }
    }
}

/// FormatJson：把任意输入值格式化为 JSON 文本，原样展示
pub struct FormatJsonProvider;

#[async_trait]
impl CapabilityProvider for FormatJsonProvider {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "format_json",
            "Render a value as pretty JSON for verbatim display. Inputs: {\"value\": any}",
            TaskCategory::Deliverable,
        )
        .with_preconditions(["a completed task produced the value to show"])
        .with_outputs(["formatted"])
        .with_presentation(PresentationMode::Display)
    }

    async fn invoke(&self, invocation: Invocation) -> Result<TaskResult, ProviderError> {
        let value = invocation.value("value").cloned().unwrap_or(Value::Null);
        let formatted = serde_json::to_string_pretty(&value)
            .map_err(|e| ProviderError::Failed(e.to_string()))?;
        Ok(TaskResult::success(
            invocation.task_id,
            Slots::from([("formatted".to_string(), json!(formatted))]),
        ))
    }
}
