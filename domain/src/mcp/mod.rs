//! MCP server descriptions.
//!
//! An MCP server is an external tool provider the backend can call during a
//! session. Local servers are launched from a `command`; remote servers are
//! reached at a `url`. Unknown keys are carried through untouched so newer
//! backend options keep working.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Server name → configuration.
pub type McpServers = BTreeMap<String, McpServerConfig>;

/// Configuration for one MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// `local`, `stdio`, `http` or `sse`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Tool allow-list for this server; `["*"]` means all tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl McpServerConfig {
    pub fn local(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            server_type: Some("local".to_string()),
            command: Some(command.into()),
            args,
            tools: vec!["*".to_string()],
            ..Default::default()
        }
    }

    pub fn remote(server_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server_type: Some(server_type.into()),
            url: Some(url.into()),
            tools: vec!["*".to_string()],
            ..Default::default()
        }
    }

    pub fn is_remote(&self) -> bool {
        self.url.is_some() && self.command.is_none()
    }
}
