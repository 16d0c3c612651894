//! JSON-RPC protocol types for Copilot CLI communication.
//!
//! This module defines the message structures used in the JSON-RPC 2.0 protocol
//! for communicating with the Copilot CLI process.
//!
//! # Protocol Overview
//!
//! - **Requests**: Client → Copilot CLI (`session.create`, `session.send`, `session.destroy`)
//! - **Responses**: Copilot CLI → Client (result or error)
//! - **Notifications**: Copilot CLI → Client (`session.event` carrying one session event)
//! - **Incoming requests**: Copilot CLI → Client (`permission.request`, `tool.call`)

use pilot_application::SessionConfig;
use pilot_domain::{McpServers, PermissionDecision, PermissionRequest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for JSON-RPC requests.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a unique request ID.
fn next_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Method names used on the wire.
pub mod methods {
    pub const SESSION_CREATE: &str = "session.create";
    pub const SESSION_SEND: &str = "session.send";
    pub const SESSION_DESTROY: &str = "session.destroy";
    pub const SESSION_EVENT: &str = "session.event";
    pub const PERMISSION_REQUEST: &str = "permission.request";
    pub const TOOL_CALL: &str = "tool.call";
}

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with an auto-generated ID.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: next_id(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Notification from server (`session.event`)
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

/// JSON-RPC response sent from SDK → CLI (e.g. a permission decision).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponseOut {
    pub jsonrpc: &'static str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponseOut {
    pub fn new(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Session creation parameters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<McpServers>,
    pub streaming: bool,
    /// Ask the CLI to route permission prompts to us.
    pub request_permission: bool,
}

impl CreateSessionParams {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            working_directory: config.working_directory.clone(),
            available_tools: config.available_tools.clone(),
            excluded_tools: config.excluded_tools.clone(),
            mcp_servers: config.mcp_servers.clone(),
            streaming: config.streaming,
            request_permission: config.permission_handler.is_some(),
        }
    }
}

/// Send parameters (for `session.send`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub session_id: String,
    pub prompt: String,
}

/// Parameters naming a session (for `session.destroy`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdParams {
    pub session_id: String,
}

/// Parameters of an incoming `permission.request`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestParams {
    pub session_id: String,
    pub permission_request: PermissionRequest,
}

/// Result payload answering a `permission.request`.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionResponse {
    pub result: PermissionDecision,
}

/// Parameters for a `tool.call` request from the Copilot CLI.
///
/// No host-side tools are registered, so these are always rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Result payload for a `tool.call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// The text result that the LLM should see.
    pub text_result_for_llm: String,
    /// Result type: "text" for normal results, "error" for errors.
    pub result_type: String,
}

impl ToolCallResult {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            result_type: "error".to_string(),
        }
    }

    pub fn into_rpc_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_application::ApproveAll;
    use pilot_domain::McpServerConfig;
    use std::sync::Arc;

    #[test]
    fn create_session_params_from_config() {
        let mut servers = McpServers::new();
        servers.insert(
            "memory".to_string(),
            McpServerConfig::local("npx", vec!["-y".to_string()]),
        );
        let config = SessionConfig {
            model: Some("gpt-5".to_string()),
            working_directory: Some(PathBuf::from("/work")),
            excluded_tools: Some(vec!["shell".to_string()]),
            mcp_servers: Some(servers),
            streaming: true,
            permission_handler: Some(Arc::new(ApproveAll)),
            ..Default::default()
        };

        let json = serde_json::to_value(CreateSessionParams::from_config(&config)).unwrap();
        assert_eq!(json["model"], "gpt-5");
        assert_eq!(json["workingDirectory"], "/work");
        assert_eq!(json["excludedTools"][0], "shell");
        assert_eq!(json["mcpServers"]["memory"]["command"], "npx");
        assert_eq!(json["streaming"], true);
        assert_eq!(json["requestPermission"], true);
        assert!(json.get("availableTools").is_none());
    }

    #[test]
    fn empty_mcp_map_is_sent_explicitly() {
        let config = SessionConfig {
            mcp_servers: Some(McpServers::new()),
            ..Default::default()
        };
        let json = serde_json::to_value(CreateSessionParams::from_config(&config)).unwrap();
        assert_eq!(json["mcpServers"], serde_json::json!({}));
        assert_eq!(json["requestPermission"], false);
    }

    #[test]
    fn permission_request_params_deserialize() {
        let params: PermissionRequestParams = serde_json::from_value(serde_json::json!({
            "sessionId": "sess-1",
            "permissionRequest": {
                "kind": "shell",
                "toolCallId": "tc-1",
                "fullCommandText": "rm -rf target"
            }
        }))
        .unwrap();

        assert_eq!(params.session_id, "sess-1");
        assert_eq!(params.permission_request.kind, "shell");
        assert_eq!(
            params.permission_request.details["fullCommandText"],
            "rm -rf target"
        );
    }

    #[test]
    fn permission_response_serializes_decision() {
        let response = JsonRpcResponseOut::new(
            7,
            serde_json::to_value(PermissionResponse {
                result: PermissionDecision::DeniedByRules,
            })
            .unwrap(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["result"]["result"]["kind"], "denied-by-rules");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_response_omits_result() {
        let json =
            serde_json::to_value(JsonRpcResponseOut::error(3, METHOD_NOT_FOUND, "nope")).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn tool_call_result_error() {
        let value = ToolCallResult::error("File not found").into_rpc_value();
        assert_eq!(value["resultType"], "error");
        assert_eq!(value["textResultForLlm"], "File not found");
    }
}
