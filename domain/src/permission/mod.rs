//! Permission requests raised by a backend session.
//!
//! Before running a tool that touches the machine (shell, file writes,
//! MCP calls, URL fetches) the backend asks the host for permission. The
//! host answers with a [`PermissionDecision`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A permission request from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Request category, e.g. `shell`, `write`, `mcp`, `read`, `url`.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Kind-specific fields (command text, file path, server name, ...).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl PermissionRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            tool_call_id: None,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// The host's answer to a [`PermissionRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PermissionDecision {
    Approved,
    DeniedByRules,
    DeniedInteractivelyByUser,
    #[serde(rename = "denied-no-approval-rule-and-could-not-request-from-user")]
    DeniedNoApprovalRule,
}

impl PermissionDecision {
    pub fn is_approved(self) -> bool {
        matches!(self, PermissionDecision::Approved)
    }
}
