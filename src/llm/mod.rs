//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};

use crate::config::AppConfig;

/// 按配置与环境变量选择后端；没有 API Key 时回退到 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model)))
    } else if use_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}
