//! MCP configuration from TOML (`[mcp]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw MCP configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMcpConfig {
    /// Merge the per-user MCP servers into new sessions.
    pub load_default_config: bool,
    /// Replaces `~/.copilot/mcp-config.json`.
    pub config_path: Option<PathBuf>,
}

impl Default for FileMcpConfig {
    fn default() -> Self {
        Self {
            load_default_config: true,
            config_path: None,
        }
    }
}
