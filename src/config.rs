//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__ROUND_BUDGET=6`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub engine: EngineSection,
    pub memory: MemorySection,
    pub llm: LlmSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [engine] 段：轮次预算、Provider 超时、并发上限、规划上下文中的输出预览长度
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_round_budget")]
    pub round_budget: u32,
    /// 单次 Provider 调用超时（秒）
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// 单轮在途分支上限；0 表示不限制
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_context_preview_chars")]
    pub context_preview_chars: usize,
}

fn default_round_budget() -> u32 {
    10
}

fn default_provider_timeout_secs() -> u64 {
    120
}

fn default_max_parallel() -> usize {
    0
}

fn default_context_preview_chars() -> usize {
    200
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            round_budget: default_round_budget(),
            provider_timeout_secs: default_provider_timeout_secs(),
            max_parallel: default_max_parallel(),
            context_preview_chars: default_context_preview_chars(),
        }
    }
}

/// [memory] 段：规范化时带入的历史轮数、保留轮数与持久化文件
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// 未设置时不持久化
    pub history_path: Option<PathBuf>,
}

pub(crate) fn default_history_window() -> usize {
    5
}

fn default_max_turns() -> usize {
    20
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_turns: default_max_turns(),
            history_path: None,
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；最终由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.round_budget, 10);
        assert_eq!(cfg.engine.provider_timeout_secs, 120);
        assert_eq!(cfg.engine.max_parallel, 0);
        assert_eq!(cfg.memory.history_window, 5);
        assert!(cfg.memory.history_path.is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[engine]\nround_budget = 3\n\n[memory]\nhistory_window = 2\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.round_budget, 3);
        assert_eq!(cfg.engine.max_parallel, 0);
        assert_eq!(cfg.memory.history_window, 2);
    }
}
