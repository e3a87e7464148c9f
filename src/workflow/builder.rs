//! 引擎构建器
//!
//! 提供流畅的 API 组装 OrchestrationEngine：能力注册表、Oracle 必填，其余有缺省值。

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::capability::{CapabilityProvider, CapabilityRegistry, ProviderExecutor};
use crate::core::EngineError;
use crate::normalizer::{ContextNormalizer, HistoryNormalizer};
use crate::oracle::PlanningOracle;
use crate::synthesis::{Composer, PlainComposer};
use crate::workflow::dispatcher::Dispatcher;
use crate::workflow::engine::{EngineSettings, OrchestrationEngine};
use crate::workflow::events::{EngineEvent, EventSink};

pub struct EngineBuilder {
    registry: CapabilityRegistry,
    oracle: Option<Arc<dyn PlanningOracle>>,
    normalizer: Option<Arc<dyn ContextNormalizer>>,
    composer: Option<Arc<dyn Composer>>,
    settings: EngineSettings,
    events: EventSink,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: CapabilityRegistry::new(),
            oracle: None,
            normalizer: None,
            composer: None,
            settings: EngineSettings::default(),
            events: EventSink::disabled(),
        }
    }

    /// 使用已组装好的注册表（覆盖之前注册的 Provider）
    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.registry.register(provider);
        self
    }

    pub fn oracle(mut self, oracle: impl PlanningOracle + 'static) -> Self {
        self.oracle = Some(Arc::new(oracle));
        self
    }

    pub fn oracle_arc(mut self, oracle: Arc<dyn PlanningOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn normalizer(mut self, normalizer: impl ContextNormalizer + 'static) -> Self {
        self.normalizer = Some(Arc::new(normalizer));
        self
    }

    pub fn composer(mut self, composer: impl Composer + 'static) -> Self {
        self.composer = Some(Arc::new(composer));
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn round_budget(mut self, budget: u32) -> Self {
        self.settings.round_budget = budget;
        self
    }

    pub fn provider_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.provider_timeout_secs = secs;
        self
    }

    /// 订阅过程事件
    pub fn events(mut self, tx: broadcast::Sender<EngineEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn build(self) -> Result<OrchestrationEngine, EngineError> {
        let oracle = self
            .oracle
            .ok_or_else(|| EngineError::InvalidConfiguration("planning oracle is required".to_string()))?;
        if self.settings.round_budget == 0 {
            return Err(EngineError::InvalidConfiguration(
                "round_budget must be at least 1".to_string(),
            ));
        }
        if self.registry.is_empty() {
            tracing::warn!("Engine built with no registered capabilities");
        }

        let registry = Arc::new(self.registry);
        let executor = ProviderExecutor::new(Arc::clone(&registry), self.settings.provider_timeout_secs);
        let dispatcher = Dispatcher::new(executor, self.settings.max_parallel, self.events.clone());

        Ok(OrchestrationEngine {
            registry,
            oracle,
            normalizer: self
                .normalizer
                .unwrap_or_else(|| Arc::new(HistoryNormalizer::default())),
            composer: self.composer.unwrap_or_else(|| Arc::new(PlainComposer)),
            dispatcher,
            settings: self.settings,
            events: self.events,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
