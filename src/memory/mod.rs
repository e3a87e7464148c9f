//! 记忆层：任务级记忆条目、会话内打包、对话轮历史与持久化

pub mod artifact;
pub mod bundler;
pub mod history;

pub use artifact::{MemoryArtifact, TurnRecord};
pub use bundler::{BundleAction, MemoryBundler, INTENT_SLOT};
pub use history::{HistoryPersistence, TurnHistory};
