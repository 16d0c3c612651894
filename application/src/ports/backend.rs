//! Backend port
//!
//! Defines how the application layer talks to the AI coding-assistant
//! backend. The backend is a black-box event source: a [`BackendClient`]
//! bound to one working directory creates [`EventSession`]s, and each
//! session emits typed [`SessionEvent`]s to its subscribers.
//!
//! ```text
//! BackendClientFactory::connect(cwd) → BackendClient
//!     BackendClient::create_session(config) → EventSession
//!         EventSession::on(handler) → Subscription
//!         EventSession::send(prompt)            (events flow to handlers)
//!         EventSession::destroy()
//! ```
//!
//! Implementations (adapters) live in the infrastructure layer.

use crate::ports::permission::PermissionHandler;
use async_trait::async_trait;
use pilot_domain::{McpServers, RawSessionEvent, SessionEvent};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during backend operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Copilot backend is not available: {0}")]
    NotAvailable(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport closed")]
    TransportClosed,
}

/// Callback invoked for every event a session emits.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by [`EventSession::on`].
///
/// Unsubscribes exactly once: either explicitly through
/// [`unsubscribe`](Self::unsubscribe) or when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Per-session options passed to [`BackendClient::create_session`].
#[derive(Clone, Default)]
pub struct SessionConfig {
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
    /// Tool allow-list; `None` means the backend default.
    pub available_tools: Option<Vec<String>>,
    /// Tool deny-list.
    pub excluded_tools: Option<Vec<String>>,
    /// `Some(empty)` disables every MCP server.
    pub mcp_servers: Option<McpServers>,
    /// Ask the backend for `assistant.message_delta` events.
    pub streaming: bool,
    pub permission_handler: Option<Arc<dyn PermissionHandler>>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .field("available_tools", &self.available_tools)
            .field("excluded_tools", &self.excluded_tools)
            .field(
                "mcp_servers",
                &self
                    .mcp_servers
                    .as_ref()
                    .map(|servers| servers.keys().collect::<Vec<_>>()),
            )
            .field("streaming", &self.streaming)
            .field("permission_handler", &self.permission_handler.is_some())
            .finish()
    }
}

/// One conversational session with the backend.
#[async_trait]
pub trait EventSession: Send + Sync {
    /// Opaque backend-assigned identifier.
    fn session_id(&self) -> &str;

    /// Register `handler` for every subsequent event of this session.
    fn on(&self, handler: EventHandler) -> Subscription;

    /// Send a prompt without waiting for the response (events carry it).
    async fn send(&self, prompt: &str) -> Result<(), GatewayError>;

    /// Send a prompt and block until the session goes idle.
    ///
    /// Returns the last `assistant.message` event, if any. Backends cap
    /// `timeout` at their own blocking-call ceiling.
    async fn send_and_wait(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<RawSessionEvent>, GatewayError>;

    /// Tear the session down. Handlers are dropped.
    async fn destroy(&self) -> Result<(), GatewayError>;
}

/// A backend client bound to one working directory.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn working_directory(&self) -> Option<&Path>;

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn EventSession>, GatewayError>;

    async fn stop(&self) -> Result<(), GatewayError>;
}

/// Creates backend clients; the concrete loading mechanism (subprocess,
/// library, RPC) stays behind this interface.
#[async_trait]
pub trait BackendClientFactory: Send + Sync {
    /// Whether the backend can be located and loaded at all.
    fn probe(&self) -> bool;

    async fn connect(
        &self,
        working_directory: Option<&Path>,
    ) -> Result<Arc<dyn BackendClient>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_cancels_once_on_unsubscribe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_subscription_is_inactive() {
        let subscription = Subscription::noop();
        assert!(!subscription.is_active());
        subscription.unsubscribe();
    }

    #[test]
    fn session_config_debug_hides_handler() {
        let config = SessionConfig {
            model: Some("gpt-5".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(debug.contains("gpt-5"));
        assert!(debug.contains("permission_handler: false"));
    }
}
