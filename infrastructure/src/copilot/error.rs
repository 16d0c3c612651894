//! Error types for the Copilot adapter

use pilot_application::GatewayError;
use thiserror::Error;

/// Result type alias for Copilot operations
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Errors that can occur when communicating with Copilot CLI
#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Failed to spawn Copilot process: {0}")]
    SpawnError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("JSON-RPC error (code {code}): {message}")]
    RpcError { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Message router stopped")]
    RouterStopped,

    #[error("Request timeout: {0}")]
    Timeout(String),
}

impl From<CopilotError> for GatewayError {
    fn from(err: CopilotError) -> Self {
        match err {
            CopilotError::SpawnError(_) | CopilotError::Io(_) => {
                GatewayError::ConnectionError(err.to_string())
            }
            CopilotError::TransportClosed | CopilotError::RouterStopped => {
                GatewayError::TransportClosed
            }
            other => GatewayError::RequestFailed(other.to_string()),
        }
    }
}
