//! Hive - Rust 任务图编排引擎
//!
//! 模块划分：
//! - **capability**: 能力描述表、Provider 抽象、边界执行器与内置 Provider
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与会话状态机
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 记忆条目、会话内打包、对话轮历史与持久化
//! - **normalizer**: 请求与历史的规范化（上下文槽）
//! - **observability**: 日志初始化
//! - **oracle**: 规划 Oracle（LLM / 脚本）与规划上下文
//! - **synthesis**: 引用解析与最终回复组装
//! - **workflow**: 任务图、引用解析、派发、Join 与控制循环

pub mod capability;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod normalizer;
pub mod observability;
pub mod oracle;
pub mod synthesis;
pub mod workflow;

pub use core::{EngineError, ProviderError, SessionStatus};
pub use workflow::{EngineBuilder, OrchestrationEngine, SessionOutcome, SessionRequest};
