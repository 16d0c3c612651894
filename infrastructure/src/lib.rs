//! Infrastructure layer for copilot-pilot
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer: the Copilot CLI client, the default MCP
//! config reader, the JSONL conversation log and configuration file
//! loading.

pub mod config;
pub mod copilot;
pub mod logging;
pub mod mcp;

// Re-export commonly used types
pub use config::{
    ConfigIssue, ConfigLoader, FileConfig, FileLoggingConfig, FileMcpConfig, FilePoolConfig,
    FileServiceConfig,
};
pub use copilot::{
    client::{CopilotClient, CopilotClientFactory},
    error::{CopilotError, Result},
    router::{MessageRouter, SessionRoute},
    session::CopilotEventSession,
};
pub use logging::JsonlConversationLogger;
pub use mcp::FileMcpConfigSource;
