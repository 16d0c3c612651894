//! Port for the per-user default MCP server configuration.

use pilot_domain::McpServers;

/// Source of the default MCP servers merged into new sessions.
///
/// Implementations must not fail: a missing or unreadable configuration is
/// an empty map.
pub trait McpConfigSource: Send + Sync {
    fn load_default(&self) -> McpServers;
}

/// Source that never provides any servers.
pub struct NoMcpConfig;

impl McpConfigSource for NoMcpConfig {
    fn load_default(&self) -> McpServers {
        McpServers::new()
    }
}
