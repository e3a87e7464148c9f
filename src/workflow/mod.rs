//! 任务图编排：类型、依赖图与引用解析、派发、Join 与控制循环

pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod graph;
pub mod join;
pub mod session;
pub mod types;

pub use builder::EngineBuilder;
pub use dispatcher::{DispatchedRound, Dispatcher, RoundBuffer};
pub use engine::{EngineSettings, OrchestrationEngine, SessionOutcome, SessionRequest};
pub use events::{EngineEvent, EventSink};
pub use graph::{ReadinessReport, ReferenceState, TaskGraph};
pub use join::{Join, JoinSummary};
pub use session::SessionState;
pub use types::*;
