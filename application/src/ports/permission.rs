//! Permission handler port
//!
//! The backend asks the host before running tools that touch the machine.
//! A [`PermissionHandler`] answers those requests. Handlers can be written
//! as plain closures ([`FnPermissionHandler`]) or as closures returning a
//! future ([`AsyncFnPermissionHandler`]); callers see the same async
//! interface either way.
//!
//! [`LoggingPermissionHandler`] decorates any handler so that every
//! request/decision pair is recorded.

use crate::ports::conversation_logger::{ConversationEvent, ConversationLogger, event_names};
use async_trait::async_trait;
use pilot_domain::{PermissionDecision, PermissionRequest};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Answers backend permission requests.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn handle(&self, request: PermissionRequest, session_id: &str) -> PermissionDecision;
}

/// Approves every request.
pub struct ApproveAll;

#[async_trait]
impl PermissionHandler for ApproveAll {
    async fn handle(&self, _request: PermissionRequest, _session_id: &str) -> PermissionDecision {
        PermissionDecision::Approved
    }
}

/// Denies every request.
pub struct DenyAll;

#[async_trait]
impl PermissionHandler for DenyAll {
    async fn handle(&self, _request: PermissionRequest, _session_id: &str) -> PermissionDecision {
        PermissionDecision::DeniedInteractivelyByUser
    }
}

/// Adapts a synchronous closure into a [`PermissionHandler`].
pub struct FnPermissionHandler<F>(F);

impl<F> FnPermissionHandler<F>
where
    F: Fn(&PermissionRequest) -> PermissionDecision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> PermissionHandler for FnPermissionHandler<F>
where
    F: Fn(&PermissionRequest) -> PermissionDecision + Send + Sync,
{
    async fn handle(&self, request: PermissionRequest, _session_id: &str) -> PermissionDecision {
        (self.0)(&request)
    }
}

/// Adapts a closure returning a future into a [`PermissionHandler`].
pub struct AsyncFnPermissionHandler<F>(F);

impl<F, Fut> AsyncFnPermissionHandler<F>
where
    F: Fn(PermissionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PermissionDecision> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> PermissionHandler for AsyncFnPermissionHandler<F>
where
    F: Fn(PermissionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PermissionDecision> + Send + 'static,
{
    async fn handle(&self, request: PermissionRequest, _session_id: &str) -> PermissionDecision {
        (self.0)(request).await
    }
}

/// Records every request and the decision the wrapped handler returned.
pub struct LoggingPermissionHandler {
    inner: Arc<dyn PermissionHandler>,
    conversation_logger: Arc<dyn ConversationLogger>,
}

impl LoggingPermissionHandler {
    pub fn new(
        inner: Arc<dyn PermissionHandler>,
        conversation_logger: Arc<dyn ConversationLogger>,
    ) -> Self {
        Self {
            inner,
            conversation_logger,
        }
    }
}

#[async_trait]
impl PermissionHandler for LoggingPermissionHandler {
    async fn handle(&self, request: PermissionRequest, session_id: &str) -> PermissionDecision {
        info!(
            "Permission request from session {}: kind={}",
            session_id, request.kind
        );
        let request_json = serde_json::to_value(&request).unwrap_or_default();
        debug!("Permission request details: {}", request_json);
        self.conversation_logger.log(ConversationEvent::new(
            event_names::PERMISSION_REQUEST,
            serde_json::json!({
                "session_id": session_id,
                "request": request_json,
            }),
        ));

        let kind = request.kind.clone();
        let decision = self.inner.handle(request, session_id).await;

        info!(
            "Permission result for session {}: kind={} approved={}",
            session_id,
            kind,
            decision.is_approved()
        );
        self.conversation_logger.log(ConversationEvent::new(
            event_names::PERMISSION_RESULT,
            serde_json::json!({
                "session_id": session_id,
                "kind": kind,
                "result": serde_json::to_value(decision).unwrap_or_default(),
            }),
        ));

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLogger {
        events: Mutex<Vec<ConversationEvent>>,
    }

    impl ConversationLogger for RecordingLogger {
        fn log(&self, event: ConversationEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn sync_closure_handler() {
        let handler = FnPermissionHandler::new(|request: &PermissionRequest| {
            if request.kind == "read" {
                PermissionDecision::Approved
            } else {
                PermissionDecision::DeniedByRules
            }
        });

        assert_eq!(
            handler.handle(PermissionRequest::new("read"), "s").await,
            PermissionDecision::Approved
        );
        assert_eq!(
            handler.handle(PermissionRequest::new("shell"), "s").await,
            PermissionDecision::DeniedByRules
        );
    }

    #[tokio::test]
    async fn async_closure_handler() {
        let handler = AsyncFnPermissionHandler::new(|request: PermissionRequest| async move {
            tokio::task::yield_now().await;
            if request.kind == "write" {
                PermissionDecision::DeniedInteractivelyByUser
            } else {
                PermissionDecision::Approved
            }
        });

        assert_eq!(
            handler.handle(PermissionRequest::new("write"), "s").await,
            PermissionDecision::DeniedInteractivelyByUser
        );
    }

    #[tokio::test]
    async fn logging_wrapper_records_request_and_result() {
        let logger = Arc::new(RecordingLogger::default());
        let handler = LoggingPermissionHandler::new(Arc::new(ApproveAll), logger.clone());

        let request = PermissionRequest::new("shell")
            .with_detail("fullCommandText", serde_json::json!("ls -la"));
        let decision = handler.handle(request, "session-7").await;
        assert_eq!(decision, PermissionDecision::Approved);

        let events = logger.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "permission_request");
        assert_eq!(events[0].payload["session_id"], "session-7");
        assert_eq!(events[0].payload["request"]["fullCommandText"], "ls -la");
        assert_eq!(events[1].event_type, "permission_result");
        assert_eq!(events[1].payload["result"]["kind"], "approved");
    }

    #[tokio::test]
    async fn deny_all_denies() {
        let decision = DenyAll.handle(PermissionRequest::new("url"), "s").await;
        assert!(!decision.is_approved());
    }
}
