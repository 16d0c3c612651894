//! Copilot session adapter.
//!
//! Provides [`CopilotEventSession`], which implements [`EventSession`] on top
//! of a [`SessionRoute`] registered with the shared [`MessageRouter`].

use crate::copilot::error::CopilotError;
use crate::copilot::protocol::{SendParams, SessionIdParams, methods};
use crate::copilot::router::{MessageRouter, SessionRoute};
use async_trait::async_trait;
use pilot_application::{EventHandler, EventSession, GatewayError, Subscription};
use pilot_domain::{RawSessionEvent, SessionEvent, event_types};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Longest wait the blocking `send_and_wait` call supports.
pub const SEND_AND_WAIT_CEILING: Duration = Duration::from_secs(120);

/// An active conversation session with the Copilot CLI.
pub struct CopilotEventSession {
    router: Arc<MessageRouter>,
    route: Arc<SessionRoute>,
    destroyed: AtomicBool,
}

impl CopilotEventSession {
    pub fn new(router: Arc<MessageRouter>, route: Arc<SessionRoute>) -> Self {
        Self {
            router,
            route,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), GatewayError> {
        if self.is_destroyed() {
            return Err(GatewayError::SessionError(format!(
                "Session {} has been destroyed",
                self.session_id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSession for CopilotEventSession {
    fn session_id(&self) -> &str {
        self.route.session_id()
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        if self.is_destroyed() {
            return Subscription::noop();
        }
        self.route.subscribe(handler)
    }

    async fn send(&self, prompt: &str) -> Result<(), GatewayError> {
        self.ensure_live()?;
        debug!("Sending to session {} ({} chars)", self.session_id(), prompt.len());

        let params = serde_json::to_value(SendParams {
            session_id: self.session_id().to_string(),
            prompt: prompt.to_string(),
        })
        .map_err(CopilotError::from)?;

        let result = self.router.call(methods::SESSION_SEND, params).await?;
        debug!("session.send response: {:?}", result);
        Ok(())
    }

    async fn send_and_wait(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<RawSessionEvent>, GatewayError> {
        let timeout = timeout.min(SEND_AND_WAIT_CEILING);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.on(Arc::new(move |event: &SessionEvent| {
            let _ = tx.send(event.clone());
        }));

        self.send(prompt).await?;

        let mut last_message = None;
        let outcome = tokio::time::timeout(timeout, async {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Message(data) => last_message = Some(data),
                    SessionEvent::Idle => return Ok(()),
                    SessionEvent::Error(err) => return Err(GatewayError::SessionError(err.message)),
                    _ => {}
                }
            }
            Err(GatewayError::TransportClosed)
        })
        .await;
        subscription.unsubscribe();

        match outcome {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        }

        Ok(last_message.map(|data| {
            RawSessionEvent::new(
                event_types::MESSAGE,
                serde_json::json!({
                    "content": data.content,
                    "messageId": data.message_id,
                }),
            )
        }))
    }

    async fn destroy(&self) -> Result<(), GatewayError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let session_id = self.session_id().to_string();
        info!("Destroying session {}", session_id);

        self.router.deregister_session(&session_id);
        let params = serde_json::to_value(SessionIdParams { session_id }).map_err(CopilotError::from)?;
        self.router.call(methods::SESSION_DESTROY, params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copilot::fake_cli::FakeCli;
    use serde_json::json;

    async fn session(router: &Arc<MessageRouter>, cli: &mut FakeCli) -> Arc<CopilotEventSession> {
        let route = cli.create(router, "sess-1").await;
        Arc::new(CopilotEventSession::new(Arc::clone(router), route))
    }

    #[tokio::test]
    async fn send_issues_session_send() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let sending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send("hello").await })
        };
        let (id, params) = cli.expect_request("session.send").await;
        assert_eq!(params, json!({"sessionId": "sess-1", "prompt": "hello"}));
        cli.respond(id, json!({"messageId": "m-1"})).await;

        sending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_surfaces_rpc_errors() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let sending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send("hello").await })
        };
        let (id, _) = cli.expect_request("session.send").await;
        cli.respond_error(id, -32000, "model unavailable").await;

        let err = sending.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::RequestFailed(msg) if msg.contains("model unavailable")));
    }

    #[tokio::test]
    async fn send_and_wait_returns_last_message_at_idle() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_and_wait("hi", Duration::from_secs(5)).await })
        };
        let (id, _) = cli.expect_request("session.send").await;
        cli.respond(id, json!({})).await;
        cli.emit("sess-1", "assistant.message", json!({"content": "first", "messageId": "a"}))
            .await;
        cli.emit("sess-1", "assistant.message", json!({"content": "second", "messageId": "b"}))
            .await;
        cli.emit("sess-1", "session.idle", json!({})).await;

        let raw = waiting.await.unwrap().unwrap().unwrap();
        assert_eq!(raw.event_type, "assistant.message");
        assert_eq!(raw.data["content"], "second");
        assert_eq!(raw.data["messageId"], "b");
        assert_eq!(session.route.handler_count(), 0);
    }

    #[tokio::test]
    async fn send_and_wait_without_message_returns_none() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_and_wait("hi", Duration::from_secs(5)).await })
        };
        let (id, _) = cli.expect_request("session.send").await;
        cli.respond(id, json!({})).await;
        cli.emit("sess-1", "session.idle", json!({})).await;

        assert!(waiting.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn send_and_wait_fails_on_session_error() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_and_wait("hi", Duration::from_secs(5)).await })
        };
        let (id, _) = cli.expect_request("session.send").await;
        cli.respond(id, json!({})).await;
        cli.emit("sess-1", "session.error", json!({"message": "quota exceeded"}))
            .await;

        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err, GatewayError::SessionError("quota exceeded".into()));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let (router, mut cli) = FakeCli::pair();
        let session = session(&router, &mut cli).await;

        let destroying = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.destroy().await })
        };
        let (id, params) = cli.expect_request("session.destroy").await;
        assert_eq!(params["sessionId"], "sess-1");
        cli.respond(id, json!({})).await;
        destroying.await.unwrap().unwrap();

        assert_eq!(router.session_count(), 0);
        session.destroy().await.unwrap();
        assert!(session.send("again").await.is_err());
        assert!(!session.on(Arc::new(|_: &SessionEvent| {})).is_active());
    }
}
