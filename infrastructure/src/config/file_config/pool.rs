//! Session pool configuration from TOML (`[pool]` section)

use serde::{Deserialize, Serialize};

/// Raw pool configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePoolConfig {
    pub max_sessions: usize,
    pub idle_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub reap_interval_ms: u64,
}

impl Default for FilePoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            idle_timeout_ms: 300_000,
            acquire_timeout_ms: 30_000,
            reap_interval_ms: 60_000,
        }
    }
}
