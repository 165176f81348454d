//! Domain ports (interfaces) for the debug orchestrator.

pub mod agent_client;
pub mod debug_store;
pub mod function_registry;

pub use agent_client::{
    AgentConnector, AgentRpc, CollectorEventBatch, CollectorEventQuery, CpuProfileRequest,
    CpuProfileResponse, MemoryProfileRequest, MemoryProfileResponse, MemoryProfileStats,
    StartCollectorRequest, StartCollectorResponse,
};
pub use debug_store::DebugStore;
pub use function_registry::{FunctionRegistry, NullFunctionRegistry};
