//! Domain layer for copilot-pilot
//!
//! This crate contains the vocabulary shared by every other layer: the
//! backend's session events, the settled results of a send, token usage
//! accounting, permission requests and MCP server descriptions.
//! It has no dependencies on infrastructure or presentation concerns.
//!
//! # Core Concepts
//!
//! ## Session events
//!
//! A backend session emits a stream of typed lifecycle events
//! ([`SessionEvent`]): streamed deltas, final messages, turn boundaries,
//! usage reports, tool diagnostics and the terminal `session.idle` /
//! `session.error` signals.
//!
//! ## Results
//!
//! - [`StreamingResult`]: what one streaming send settled with
//! - [`ServiceResult`]: the uniform `{success, error}` shape returned to callers

pub mod core;
pub mod mcp;
pub mod permission;
pub mod session;

// Re-export commonly used types
pub use core::error::DomainError;
pub use mcp::{McpServerConfig, McpServers};
pub use permission::{PermissionDecision, PermissionRequest};
pub use session::{
    event::{
        AbortData, AssistantMessageData, IntentData, MessageDeltaData, RawSessionEvent,
        SessionErrorData, SessionEvent, SessionInfoData, ToolExecutionCompleteData,
        ToolExecutionProgressData, ToolExecutionStartData, ToolRequest, TurnData, UsageData,
        UsageInfoData, event_types,
    },
    result::{ServiceResult, StreamingResult},
    usage::{TokenUsage, TokenUsageAccumulator},
};
