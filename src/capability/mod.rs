//! 能力层：描述表、Provider 抽象、边界执行器与内置 Provider

pub mod builtin;
pub mod executor;
pub mod registry;

pub use builtin::{ContextLookupProvider, EchoProvider, FormatJsonProvider};
pub use executor::ProviderExecutor;
pub use registry::{
    CapabilityDescriptor, CapabilityProvider, CapabilityRegistry, Invocation, PresentationMode,
};
