//! Default MCP server configuration read from the Copilot CLI's config file.
//!
//! The CLI keeps per-user MCP servers in `~/.copilot/mcp-config.json`:
//!
//! ```json
//! { "mcpServers": { "memory": { "type": "local", "command": "npx", "args": [] } } }
//! ```

use pilot_application::McpConfigSource;
use pilot_domain::McpServers;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpConfigFile {
    #[serde(default)]
    mcp_servers: McpServers,
}

/// Reads `mcpServers` from a JSON file on every call.
#[derive(Debug, Clone)]
pub struct FileMcpConfigSource {
    path: Option<PathBuf>,
}

impl FileMcpConfigSource {
    /// Use `path`, or the CLI's default location when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.or_else(Self::default_path),
        }
    }

    /// `~/.copilot/mcp-config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".copilot").join("mcp-config.json"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(path: &Path) -> McpServers {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No MCP config at {}", path.display());
                return McpServers::new();
            }
            Err(e) => {
                warn!("Could not read MCP config {}: {}", path.display(), e);
                return McpServers::new();
            }
        };

        match serde_json::from_str::<McpConfigFile>(&content) {
            Ok(file) => {
                debug!(
                    "Loaded {} MCP server(s) from {}",
                    file.mcp_servers.len(),
                    path.display()
                );
                file.mcp_servers
            }
            Err(e) => {
                warn!("Ignoring malformed MCP config {}: {}", path.display(), e);
                McpServers::new()
            }
        }
    }
}

impl Default for FileMcpConfigSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl McpConfigSource for FileMcpConfigSource {
    fn load_default(&self) -> McpServers {
        match &self.path {
            Some(path) => Self::read(path),
            None => McpServers::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(content: &str) -> (tempfile::TempDir, FileMcpConfigSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-config.json");
        std::fs::write(&path, content).unwrap();
        (dir, FileMcpConfigSource::new(Some(path)))
    }

    #[test]
    fn reads_servers() {
        let (_dir, source) = source_with(
            r#"{
                "mcpServers": {
                    "memory": {"type": "local", "command": "npx", "args": ["-y", "server-memory"], "tools": ["*"]},
                    "docs": {"type": "http", "url": "https://mcp.example.com/docs"}
                }
            }"#,
        );

        let servers = source.load_default();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["memory"].command.as_deref(), Some("npx"));
        assert!(servers["docs"].is_remote());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileMcpConfigSource::new(Some(dir.path().join("absent.json")));
        assert!(source.load_default().is_empty());
    }

    #[test]
    fn malformed_file_is_empty() {
        let (_dir, source) = source_with("{ not json");
        assert!(source.load_default().is_empty());
    }

    #[test]
    fn file_without_servers_key_is_empty() {
        let (_dir, source) = source_with(r#"{"theme": "dark"}"#);
        assert!(source.load_default().is_empty());
    }

    #[test]
    fn default_path_points_at_copilot_dir() {
        if let Some(path) = FileMcpConfigSource::default_path() {
            assert!(path.ends_with(".copilot/mcp-config.json"));
        }
    }
}
