//! 核心层：错误类型与会话状态机

pub mod error;
pub mod state;

pub use error::{EngineError, ProviderError};
pub use state::{RoundState, SessionStatus};
