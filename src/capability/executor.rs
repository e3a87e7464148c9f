//! Provider 执行器（边界包装器）
//!
//! 持有 CapabilityRegistry 与单次调用超时，invoke(invocation) 总是返回 TaskResult：
//! 未知能力、超时、panic、内部错误都在这里转为 failed，Reducer 永远看不到未捕获的故障；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::time::timeout;

use crate::capability::{CapabilityRegistry, Invocation};
use crate::core::ProviderError;
use crate::workflow::{TaskId, TaskResult};

/// Provider 执行器：对每次调用施加超时并吞掉故障
#[derive(Clone)]
pub struct ProviderExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl ProviderExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// 调用对应 Provider；任何故障都转为 failed 的 TaskResult
    pub async fn invoke(&self, invocation: Invocation) -> TaskResult {
        let start = Instant::now();
        let task_id = invocation.task_id;
        let capability = invocation.capability.clone();

        let outcome = match self.registry.provider(&capability) {
            None => Err(ProviderError::UnknownCapability(capability.clone())),
            Some(provider) => {
                let call = AssertUnwindSafe(provider.invoke(invocation)).catch_unwind();
                match timeout(self.timeout, call).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(ProviderError::Panicked(panic_message(panic.as_ref()))),
                    Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
                }
            }
        };

        let result = match outcome {
            Ok(result) => normalize_task_id(task_id, result),
            Err(e) => TaskResult::failed(task_id, e.to_string()),
        };

        let audit = serde_json::json!({
            "event": "provider_audit",
            "task_id": task_id,
            "capability": capability,
            "ok": result.is_success(),
            "error": result.error,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "provider");

        result
    }
}

/// Provider 返回的 task_id 以派发时为准，否则屏障计数会错位
fn normalize_task_id(task_id: TaskId, mut result: TaskResult) -> TaskResult {
    if result.task_id != task_id {
        tracing::warn!(
            expected = %task_id,
            got = %result.task_id,
            "Provider returned result for a different task id, rewriting"
        );
        result.task_id = task_id;
    }
    result
}

/// panic 负载转成可读文本
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
