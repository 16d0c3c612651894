//! Application layer for copilot-pilot
//!
//! This crate contains the port definitions the backend adapter implements,
//! the streaming completion engine, the session pool and the service façade
//! callers talk to. It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{PoolConfig, ServiceConfig};
pub use ports::{
    backend::{
        BackendClient, BackendClientFactory, EventHandler, EventSession, GatewayError,
        SessionConfig, Subscription,
    },
    conversation_logger::{ConversationEvent, ConversationLogger, NoConversationLogger},
    mcp_config::{McpConfigSource, NoMcpConfig},
    permission::{
        ApproveAll, AsyncFnPermissionHandler, DenyAll, FnPermissionHandler,
        LoggingPermissionHandler, PermissionHandler,
    },
};
pub use use_cases::pilot_service::{
    AbortOutcome, ClientCache, PilotService, SendOptions, merge_mcp_servers,
};
pub use use_cases::session_pool::{PoolEntry, PoolError, PoolStats, SessionFactory, SessionPool};
pub use use_cases::streaming_completion::{
    ChunkCallback, CompletionError, CompletionMode, CompletionState, StreamingCompletion,
    Transition, requires_streaming,
};
