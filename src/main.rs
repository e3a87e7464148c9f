//! Hive - Rust 任务图编排引擎
//!
//! 入口：初始化日志与配置，组装引擎，在终端里逐行读取请求并运行会话；对话历史写入 JSON 文件。

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use hive::capability::{
    CapabilityRegistry, ContextLookupProvider, EchoProvider, FormatJsonProvider,
};
use hive::config::load_config;
use hive::llm::{create_llm_from_config, LlmClient};
use hive::memory::{HistoryPersistence, TurnHistory};
use hive::normalizer::HistoryNormalizer;
use hive::oracle::LlmOracle;
use hive::synthesis::LlmComposer;
use hive::{EngineBuilder, SessionRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Default::default()
    });

    let llm = create_llm_from_config(&cfg);
    let mut registry = CapabilityRegistry::new();
    registry.register(EchoProvider);
    registry.register(ContextLookupProvider);
    registry.register(FormatJsonProvider);

    let engine = EngineBuilder::new()
        .registry(registry)
        .oracle(LlmOracle::new(Arc::clone(&llm)))
        .composer(LlmComposer::new(Arc::clone(&llm)))
        .normalizer(HistoryNormalizer::new(cfg.memory.history_window))
        .settings(cfg.engine.clone().into())
        .build()
        .context("Failed to build engine")?;

    let persistence = cfg.memory.history_path.as_ref().map(HistoryPersistence::new);
    let saved = match &persistence {
        Some(p) => p.load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load history: {}, starting fresh", e);
            Vec::new()
        }),
        None => Vec::new(),
    };
    let mut history = TurnHistory::from_turns(saved, cfg.memory.max_turns);

    println!("hive ready. Type a request, or 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let turn_id = history.next_turn_id();
        let request = SessionRequest::new(input).with_history(history.turns().to_vec(), turn_id);
        let outcome = engine.run_session(request).await;

        let reply = outcome.reply_text();
        println!("{}", if reply.is_empty() { "(no output)" } else { reply.as_str() });
        let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
        tracing::info!(
            status = outcome.status.as_str(),
            rounds = outcome.rounds,
            tasks = outcome.tasks.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "Turn finished"
        );

        history.push(outcome.to_turn_record(input));
        if let Some(p) = &persistence {
            if let Err(e) = p.save(history.turns()) {
                tracing::warn!("Failed to save history: {}", e);
            }
        }
    }

    Ok(())
}
