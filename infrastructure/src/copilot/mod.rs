//! Copilot CLI adapter
//!
//! Implements the backend ports for the GitHub Copilot CLI running in
//! server mode: one [`MessageRouter`](router::MessageRouter) per CLI
//! process, one [`CopilotEventSession`](session::CopilotEventSession) per
//! conversation.

pub mod client;
pub mod error;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake_cli;
