//! Port for structured conversation logging.
//!
//! Defines the [`ConversationLogger`] trait for recording what happened during
//! a send (permission requests and answers, backend tool executions, the
//! settled result) to a structured log.
//!
//! This is separate from `tracing`-based operation logs: tracing handles
//! human-readable diagnostic messages, while this port captures a
//! machine-readable transcript (JSONL).

use serde_json::Value;

/// Event type identifiers written by this crate.
pub mod event_names {
    pub const PERMISSION_REQUEST: &str = "permission_request";
    pub const PERMISSION_RESULT: &str = "permission_result";
    pub const TOOL_EXECUTION_COMPLETE: &str = "tool_execution_complete";
    pub const SEND_RESULT: &str = "send_result";
}

/// A structured conversation event for logging.
///
/// Each event has a type string and a JSON payload containing
/// event-specific fields. The adapter adds the timestamp.
#[derive(Debug, Clone)]
pub struct ConversationEvent {
    /// Event type identifier (see [`event_names`]).
    pub event_type: &'static str,
    /// JSON payload with event-specific data.
    pub payload: Value,
}

impl ConversationEvent {
    pub fn new(event_type: &'static str, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Port for logging conversation events to a structured log.
///
/// The `log` method is synchronous and non-fallible so that logging can
/// never disrupt a send; write failures are ignored by implementations.
pub trait ConversationLogger: Send + Sync {
    /// Record a conversation event.
    fn log(&self, event: ConversationEvent);
}

/// No-op implementation for tests and when logging is disabled.
pub struct NoConversationLogger;

impl ConversationLogger for NoConversationLogger {
    fn log(&self, _event: ConversationEvent) {}
}
