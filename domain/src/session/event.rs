//! Backend session events.
//!
//! Every event a backend session emits is a JSON object with a string
//! `type` discriminator and a `data` payload:
//!
//! ```text
//! { "type": "assistant.message_delta", "data": { "deltaContent": "Hel" } }
//! ```
//!
//! [`RawSessionEvent`] is that wire shape. [`SessionEvent::from_raw`] turns it
//! into a typed [`SessionEvent`]; unknown types and payloads that do not match
//! the expected shape become [`SessionEvent::Other`] so a new backend event
//! never breaks a running stream.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Event type discriminators used by the backend.
pub mod event_types {
    pub const MESSAGE_DELTA: &str = "assistant.message_delta";
    /// Older CLI builds spell the delta event with a dot.
    pub const MESSAGE_DELTA_LEGACY: &str = "assistant.message.delta";
    pub const MESSAGE: &str = "assistant.message";
    pub const TURN_START: &str = "assistant.turn_start";
    pub const TURN_END: &str = "assistant.turn_end";
    pub const USAGE: &str = "assistant.usage";
    pub const INTENT: &str = "assistant.intent";
    /// Sent once when a session is created; answers `session.create`.
    pub const SESSION_START: &str = "session.start";
    pub const SESSION_IDLE: &str = "session.idle";
    pub const SESSION_ERROR: &str = "session.error";
    pub const SESSION_USAGE_INFO: &str = "session.usage_info";
    pub const SESSION_INFO: &str = "session.info";
    pub const TOOL_EXECUTION_START: &str = "tool.execution_start";
    pub const TOOL_EXECUTION_COMPLETE: &str = "tool.execution_complete";
    pub const TOOL_EXECUTION_PROGRESS: &str = "tool.execution_progress";
    pub const ABORT: &str = "abort";
}

/// Accepts integer or floating point JSON numbers for token counts.
fn de_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v > 0.0).map_or(0, |v| v as u64))
}

fn de_opt_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
}

/// Wire shape of a session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl RawSessionEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// `assistant.message_delta` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeltaData {
    #[serde(default, alias = "content")]
    pub delta_content: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// A tool invocation requested inside an assistant message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub tool_call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `assistant.message` payload: the complete text of one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessageData {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// `assistant.turn_start` / `assistant.turn_end` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnData {
    #[serde(default)]
    pub turn_id: Option<String>,
}

/// `session.error` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// `assistant.usage` payload: usage of a single turn.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageData {
    #[serde(default, deserialize_with = "de_count")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub output_tokens: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub cache_read_tokens: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `session.usage_info` payload: a snapshot of the session's context window.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfoData {
    #[serde(default, deserialize_with = "de_opt_count")]
    pub token_limit: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub current_tokens: Option<u64>,
}

/// `tool.execution_start` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionStartData {
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `tool.execution_complete` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionCompleteData {
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    /// Either a plain string or an object with a `message` field.
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl ToolExecutionCompleteData {
    /// The error message, whichever shape the backend used.
    pub fn error_message(&self) -> Option<&str> {
        match self.error.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            other => other.get("message").and_then(|m| m.as_str()),
        }
    }

    /// Size of the serialized tool output in bytes (0 when absent).
    pub fn result_bytes(&self) -> usize {
        self.result
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok())
            .map_or(0, |s| s.len())
    }
}

/// `tool.execution_progress` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionProgressData {
    pub tool_call_id: String,
    #[serde(default)]
    pub progress_message: Option<String>,
}

/// `assistant.intent` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IntentData {
    #[serde(default)]
    pub intent: String,
}

/// `session.info` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoData {
    #[serde(default)]
    pub info_type: String,
    #[serde(default)]
    pub message: String,
}

/// `abort` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AbortData {
    #[serde(default)]
    pub reason: String,
}

/// A typed backend session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Incremental fragment of streamed response text.
    MessageDelta(MessageDeltaData),
    /// Complete text payload of one assistant turn.
    Message(AssistantMessageData),
    TurnStart(TurnData),
    TurnEnd(TurnData),
    /// The backend has nothing more to do for the current send.
    Idle,
    Error(SessionErrorData),
    Usage(UsageData),
    UsageInfo(UsageInfoData),
    ToolExecutionStart(ToolExecutionStartData),
    ToolExecutionComplete(ToolExecutionCompleteData),
    ToolExecutionProgress(ToolExecutionProgressData),
    Intent(IntentData),
    Info(SessionInfoData),
    Abort(AbortData),
    /// Any event type this crate does not interpret.
    Other { event_type: String },
}

impl SessionEvent {
    /// Build a typed event from its wire shape.
    ///
    /// A payload that does not deserialize into the expected struct is
    /// downgraded to [`SessionEvent::Other`] rather than rejected.
    pub fn from_raw(raw: RawSessionEvent) -> Self {
        use event_types::*;

        fn parse<T: for<'de> Deserialize<'de>>(data: Value) -> Option<T> {
            // Events without a payload carry `null`; treat it as `{}`.
            let data = if data.is_null() {
                Value::Object(Default::default())
            } else {
                data
            };
            serde_json::from_value(data).ok()
        }

        let RawSessionEvent { event_type, data } = raw;
        let parsed = match event_type.as_str() {
            MESSAGE_DELTA | MESSAGE_DELTA_LEGACY => parse(data).map(Self::MessageDelta),
            MESSAGE => parse(data).map(Self::Message),
            TURN_START => parse(data).map(Self::TurnStart),
            TURN_END => parse(data).map(Self::TurnEnd),
            SESSION_IDLE => Some(Self::Idle),
            SESSION_ERROR => parse(data).map(Self::Error),
            USAGE => parse(data).map(Self::Usage),
            SESSION_USAGE_INFO => parse(data).map(Self::UsageInfo),
            TOOL_EXECUTION_START => parse(data).map(Self::ToolExecutionStart),
            TOOL_EXECUTION_COMPLETE => parse(data).map(Self::ToolExecutionComplete),
            TOOL_EXECUTION_PROGRESS => parse(data).map(Self::ToolExecutionProgress),
            INTENT => parse(data).map(Self::Intent),
            SESSION_INFO => parse(data).map(Self::Info),
            ABORT => parse(data).map(Self::Abort),
            _ => None,
        };

        parsed.unwrap_or(Self::Other { event_type })
    }

    /// Parse an event from an arbitrary JSON value (`{type, data}`).
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RawSessionEvent>(value) {
            Ok(raw) => Self::from_raw(raw),
            Err(_) => Self::Other {
                event_type: String::new(),
            },
        }
    }

    /// The wire discriminator for this event.
    pub fn event_type(&self) -> &str {
        use event_types::*;
        match self {
            Self::MessageDelta(_) => MESSAGE_DELTA,
            Self::Message(_) => MESSAGE,
            Self::TurnStart(_) => TURN_START,
            Self::TurnEnd(_) => TURN_END,
            Self::Idle => SESSION_IDLE,
            Self::Error(_) => SESSION_ERROR,
            Self::Usage(_) => USAGE,
            Self::UsageInfo(_) => SESSION_USAGE_INFO,
            Self::ToolExecutionStart(_) => TOOL_EXECUTION_START,
            Self::ToolExecutionComplete(_) => TOOL_EXECUTION_COMPLETE,
            Self::ToolExecutionProgress(_) => TOOL_EXECUTION_PROGRESS,
            Self::Intent(_) => INTENT,
            Self::Info(_) => SESSION_INFO,
            Self::Abort(_) => ABORT,
            Self::Other { event_type } => event_type,
        }
    }

    // ==================== Convenience Constructors ====================

    pub fn delta(text: impl Into<String>) -> Self {
        Self::MessageDelta(MessageDeltaData {
            delta_content: text.into(),
            message_id: None,
        })
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::Message(AssistantMessageData {
            content: content.into(),
            ..Default::default()
        })
    }

    pub fn turn_start(turn_id: impl Into<String>) -> Self {
        Self::TurnStart(TurnData {
            turn_id: Some(turn_id.into()),
        })
    }

    pub fn turn_end(turn_id: impl Into<String>) -> Self {
        Self::TurnEnd(TurnData {
            turn_id: Some(turn_id.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(SessionErrorData {
            message: message.into(),
            ..Default::default()
        })
    }

    pub fn tool_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::ToolExecutionStart(ToolExecutionStartData {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments: None,
        })
    }

    pub fn tool_complete(tool_call_id: impl Into<String>, success: bool) -> Self {
        Self::ToolExecutionComplete(ToolExecutionCompleteData {
            tool_call_id: tool_call_id.into(),
            success: Some(success),
            ..Default::default()
        })
    }
}
