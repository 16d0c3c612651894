//! Transport demultiplexer: message routing for concurrent Copilot CLI sessions.
//!
//! The Copilot CLI communicates over a **single connection** using JSON-RPC 2.0,
//! but a client may run several sessions at once (direct sends, pooled
//! sessions, aborts arriving mid-stream).
//!
//! [`MessageRouter`] solves this by running a single background reader task that
//! owns the read half exclusively (no `Mutex` contention) and routes
//! incoming messages to the correct [`SessionRoute`] by `session_id`:
//!
//! | Incoming frame | Dispatch |
//! |----------------|----------|
//! | response | `pending_responses` oneshot (request correlation) |
//! | `session.event` / `session.start` | session-creation handshake |
//! | `session.event` (other) | typed [`SessionEvent`] to every handler of the session |
//! | `permission.request` | session's [`PermissionHandler`], answered on a spawned task |
//! | `tool.call` | rejected: no host-side tools are registered |

use crate::copilot::error::{CopilotError, Result};
use crate::copilot::protocol::{
    CreateSessionParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseOut,
    METHOD_NOT_FOUND, PermissionRequestParams, PermissionResponse, ToolCallParams, ToolCallResult,
    methods,
};
use crate::copilot::transport::{MessageKind, classify_message, read_frame, write_frame};
use pilot_application::{EventHandler, PermissionHandler, Subscription};
use pilot_domain::{PermissionDecision, SessionEvent, event_types};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Timeout for session creation (waiting for `session.start` event).
const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the CLI to announce its listening port.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the CLI process to exit after being killed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type SharedWriter = Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;
type Routes = Arc<std::sync::RwLock<HashMap<String, Arc<SessionRoute>>>>;
type PendingResponses = Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Per-session dispatch target: the event handlers subscribed through
/// [`EventSession::on`](pilot_application::EventSession::on) and the
/// session's permission handler.
pub struct SessionRoute {
    session_id: String,
    handlers: std::sync::Mutex<Vec<(u64, EventHandler)>>,
    next_handler: AtomicU64,
    permission_handler: Option<Arc<dyn PermissionHandler>>,
}

impl SessionRoute {
    fn new(session_id: String, permission_handler: Option<Arc<dyn PermissionHandler>>) -> Self {
        Self {
            session_id,
            handlers: std::sync::Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(1),
            permission_handler,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register `handler` until the returned subscription is cancelled.
    pub fn subscribe(self: &Arc<Self>, handler: EventHandler) -> Subscription {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.lock_handlers().push((id, handler));

        let route: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(route) = route.upgrade() {
                route.lock_handlers().retain(|(other, _)| *other != id);
            }
        })
    }

    pub fn handler_count(&self) -> usize {
        self.lock_handlers().len()
    }

    /// Deliver `event` to every handler registered right now.
    pub fn dispatch(&self, event: &SessionEvent) {
        let snapshot: Vec<EventHandler> = self
            .lock_handlers()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    "Event handler for session {} panicked on {}",
                    self.session_id,
                    event.event_type()
                );
            }
        }
    }

    /// Drop every handler; subscribers observe their channels closing.
    pub fn close(&self) {
        self.lock_handlers().clear();
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, EventHandler)>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Central message router that demultiplexes a single connection
/// across multiple concurrent Copilot sessions.
///
/// # Responsibilities
///
/// 1. **Spawn** the Copilot CLI process in the client's working directory
///    and establish a TCP connection.
/// 2. **Own** the read half in a background [`tokio::spawn`] task.
/// 3. **Route** incoming session events by `session_id` to [`SessionRoute`]s.
/// 4. **Correlate** request–response pairs via `oneshot` channels (used by
///    [`request`](Self::request)).
/// 5. **Serialize** session creation through `create_lock` to prevent
///    `session.start` event mix-ups.
/// 6. **Answer** `permission.request` calls through the session's handler.
pub struct MessageRouter {
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,

    /// Session routes (session_id -> route).
    ///
    /// Uses `std::sync::RwLock` so that routes can be removed synchronously.
    /// The lock is only held briefly for HashMap insert/remove/lookup.
    routes: Routes,

    /// Request-response correlation (request_id -> oneshot sender).
    pending_responses: PendingResponses,

    /// Channel for session.start events (consumed during session creation).
    session_start_rx: Mutex<mpsc::UnboundedReceiver<String>>,

    /// Serializes session creation (prevent concurrent session.start confusion).
    create_lock: Mutex<()>,

    /// Writer (serialized writes, independent of reader).
    writer: SharedWriter,

    /// Copilot CLI child process (killed on shutdown and Drop).
    child: std::sync::Mutex<Option<Child>>,

    shutdown: CancellationToken,
}

impl MessageRouter {
    /// Spawn the Copilot CLI (`<cli_path> --server`) and build the router.
    ///
    /// The CLI binds its working directory at startup, so one router serves
    /// exactly one directory.
    pub async fn spawn(cli_path: &str, working_directory: Option<&Path>) -> Result<Arc<Self>> {
        debug!("Spawning Copilot CLI: {} --server", cli_path);

        let mut cmd = Command::new(cli_path);
        cmd.arg("--server")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        // Linux: request kernel to send SIGTERM to child when parent dies.
        // This catches cases where Drop doesn't run (SIGKILL, OOM kill).
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CopilotError::SpawnError(format!("{}: {}", cli_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CopilotError::SpawnError("Failed to capture stdout".into()))?;

        let port = tokio::time::timeout(STARTUP_TIMEOUT, Self::read_port(stdout))
            .await
            .map_err(|_| CopilotError::Timeout("Copilot CLI did not announce a port".into()))??;

        info!("Copilot CLI listening on port {}, connecting...", port);

        let stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await?;
        Ok(Self::from_stream(stream, Some(child)))
    }

    async fn read_port(stdout: tokio::process::ChildStdout) -> Result<u16> {
        let mut stdout_reader = BufReader::new(stdout);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = stdout_reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(CopilotError::UnexpectedResponse(
                    "Copilot CLI exited without announcing port".into(),
                ));
            }

            let trimmed = line.trim();
            debug!("Copilot CLI output: {}", trimmed);

            if let Some(port_str) = trimmed.strip_prefix("CLI server listening on port ") {
                return port_str.trim().parse::<u16>().map_err(|_| {
                    CopilotError::UnexpectedResponse(format!(
                        "Failed to parse port number: {}",
                        port_str
                    ))
                });
            }
        }
    }

    /// Build a router over an already-connected stream.
    pub fn from_stream<S>(stream: S, child: Option<Child>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(Box::new(write_half))));

        let routes: Routes = Arc::new(std::sync::RwLock::new(HashMap::new()));
        let pending_responses: PendingResponses = Arc::new(RwLock::new(HashMap::new()));
        let (session_start_tx, session_start_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let reader_handle = tokio::spawn(Self::reader_loop(
            reader,
            Arc::clone(&routes),
            Arc::clone(&pending_responses),
            session_start_tx,
            Arc::clone(&writer),
            shutdown.clone(),
        ));

        Arc::new(Self {
            reader_handle: std::sync::Mutex::new(Some(reader_handle)),
            routes,
            pending_responses,
            session_start_rx: Mutex::new(session_start_rx),
            create_lock: Mutex::new(()),
            writer,
            child: std::sync::Mutex::new(child),
            shutdown,
        })
    }

    /// Background reader loop: single owner of the read half.
    ///
    /// Runs until the connection closes, an I/O error occurs or the router
    /// is shut down. When the loop exits, every route is closed and every
    /// pending request is dropped, so waiters observe
    /// [`CopilotError::RouterStopped`] and event subscribers see their
    /// channels close.
    async fn reader_loop(
        read_half: BoxedReader,
        routes: Routes,
        pending_responses: PendingResponses,
        session_start_tx: mpsc::UnboundedSender<String>,
        writer: SharedWriter,
        shutdown: CancellationToken,
    ) {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            let body = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Reader loop: shutdown requested");
                    break;
                }
                frame = read_frame(&mut reader, &mut line) => match frame {
                    Ok(Some(body)) => body,
                    Ok(None) => {
                        info!("Reader loop: Copilot CLI closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("Reader loop: failed to read frame: {}", e);
                        break;
                    }
                },
            };

            trace!("Router received: {}", String::from_utf8_lossy(&body));

            let json_value: serde_json::Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Router: failed to parse JSON: {}", e);
                    continue;
                }
            };

            match classify_message(&json_value) {
                MessageKind::Response => {
                    Self::handle_response(json_value, &pending_responses).await;
                }
                MessageKind::IncomingRequest { id } => {
                    Self::handle_incoming_request(id, json_value, &routes, &writer).await;
                }
                MessageKind::Notification => {
                    Self::handle_notification(json_value, &routes, &session_start_tx);
                }
            }
        }

        info!("Router: reader loop ended, closing all session routes");
        let closed: Vec<Arc<SessionRoute>> = {
            let mut routes_w = routes.write().unwrap_or_else(|e| e.into_inner());
            routes_w.drain().map(|(_, route)| route).collect()
        };
        for route in closed {
            route.close();
        }
        pending_responses.write().await.clear();
    }

    async fn handle_response(json_value: serde_json::Value, pending_responses: &PendingResponses) {
        let response: JsonRpcResponse = match serde_json::from_value(json_value) {
            Ok(r) => r,
            Err(e) => {
                warn!("Router: failed to parse response: {}", e);
                return;
            }
        };
        let Some(id) = response.id else {
            return;
        };
        let sender = pending_responses.write().await.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Router: no pending receiver for response id={}", id),
        }
    }

    async fn handle_incoming_request(
        id: u64,
        json_value: serde_json::Value,
        routes: &Routes,
        writer: &SharedWriter,
    ) {
        let method = json_value
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let params = json_value.get("params").cloned().unwrap_or_default();

        match method {
            methods::PERMISSION_REQUEST => {
                let params: PermissionRequestParams = match serde_json::from_value(params) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Router: invalid permission.request params (id={}): {}", id, e);
                        let response = JsonRpcResponseOut::error(id, -32602, e.to_string());
                        Self::write_response(writer, &response).await;
                        return;
                    }
                };
                let route = Self::lookup(routes, &params.session_id);
                let writer = Arc::clone(writer);
                // Answered off the reader task: handlers may wait on a human.
                tokio::spawn(async move {
                    let decision = match route.and_then(|r| r.permission_handler.clone()) {
                        Some(handler) => {
                            handler
                                .handle(params.permission_request, &params.session_id)
                                .await
                        }
                        None => {
                            debug!(
                                "Router: no permission handler for session {}, denying",
                                params.session_id
                            );
                            PermissionDecision::DeniedNoApprovalRule
                        }
                    };
                    let result = serde_json::to_value(PermissionResponse { result: decision })
                        .unwrap_or_default();
                    Self::write_response(&writer, &JsonRpcResponseOut::new(id, result)).await;
                });
            }
            methods::TOOL_CALL => {
                let tool = serde_json::from_value::<ToolCallParams>(params)
                    .map(|p| p.tool_name)
                    .unwrap_or_else(|_| "unknown".to_string());
                warn!("Router: rejecting tool.call for unregistered tool {}", tool);
                let result = ToolCallResult::error(format!("Tool '{}' is not available", tool));
                Self::write_response(writer, &JsonRpcResponseOut::new(id, result.into_rpc_value()))
                    .await;
            }
            other => {
                debug!("Router: unsupported incoming request method={}", other);
                let response = JsonRpcResponseOut::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not supported: {}", other),
                );
                Self::write_response(writer, &response).await;
            }
        }
    }

    fn handle_notification(
        json_value: serde_json::Value,
        routes: &Routes,
        session_start_tx: &mpsc::UnboundedSender<String>,
    ) {
        let notification: JsonRpcNotification = match serde_json::from_value(json_value) {
            Ok(n) => n,
            Err(e) => {
                warn!("Router: failed to parse notification: {}", e);
                return;
            }
        };

        if notification.method != methods::SESSION_EVENT {
            trace!(
                "Router: ignoring notification method={}",
                notification.method
            );
            return;
        }

        let Some(mut params) = notification.params else {
            return;
        };
        let session_id = params
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let event = params.get_mut("event").map(serde_json::Value::take);

        let (Some(sid), Some(event)) = (session_id, event) else {
            debug!("Router: session.event without sessionId/event");
            return;
        };

        let event = SessionEvent::from_value(event);
        if event.event_type() == event_types::SESSION_START {
            debug!("Router: session.start for {}", sid);
            let _ = session_start_tx.send(sid);
            return;
        }

        match Self::lookup(routes, &sid) {
            Some(route) => route.dispatch(&event),
            None => debug!(
                "Router: no route for session_id={}, dropping event type={}",
                sid,
                event.event_type()
            ),
        }
    }

    fn lookup(routes: &Routes, session_id: &str) -> Option<Arc<SessionRoute>> {
        routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    async fn write_response(writer: &SharedWriter, response: &JsonRpcResponseOut) {
        let json = match serde_json::to_string(response) {
            Ok(json) => json,
            Err(e) => {
                warn!("Router: failed to serialize response: {}", e);
                return;
            }
        };
        trace!("Router sending response: {}", json);
        let mut w = writer.lock().await;
        if let Err(e) = write_frame(&mut *w, &json).await {
            warn!("Router: failed to send response id={}: {}", response.id, e);
        }
    }

    /// Create a new Copilot session and register its route.
    ///
    /// Session creation is serialized via `create_lock` to prevent
    /// concurrent `session.create` requests from confusing which
    /// `session.start` event belongs to which caller.
    pub async fn create_session(
        &self,
        params: CreateSessionParams,
        permission_handler: Option<Arc<dyn PermissionHandler>>,
    ) -> Result<Arc<SessionRoute>> {
        let _guard = self.create_lock.lock().await;

        let params_value = serde_json::to_value(&params)?;
        trace!("session.create params: {}", params_value);
        let request = JsonRpcRequest::new(methods::SESSION_CREATE, Some(params_value));

        self.send_request(&request).await?;

        let session_id = {
            let mut rx = self.session_start_rx.lock().await;
            match tokio::time::timeout(SESSION_CREATE_TIMEOUT, rx.recv()).await {
                Ok(Some(session_id)) => session_id,
                Ok(None) => return Err(CopilotError::RouterStopped),
                Err(_) => {
                    return Err(CopilotError::Timeout(
                        "session.create timed out waiting for session.start".into(),
                    ));
                }
            }
        };

        debug!("Router: session created: {}", session_id);

        let route = Arc::new(SessionRoute::new(session_id.clone(), permission_handler));
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id, Arc::clone(&route));
        Ok(route)
    }

    /// Send a JSON-RPC request and wait for the correlated response.
    pub async fn request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        let request_id = request.id;

        self.pending_responses.write().await.insert(request_id, tx);

        if let Err(e) = self.send_request(request).await {
            // Clean up the pending entry to prevent leaks
            self.pending_responses.write().await.remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| CopilotError::RouterStopped)
    }

    /// Call `method` and return its result, mapping JSON-RPC errors.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let response = self
            .request(&JsonRpcRequest::new(method, Some(params)))
            .await?;
        if let Some(error) = response.error {
            return Err(CopilotError::RpcError {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    /// Send a JSON-RPC request without waiting for a response (fire-and-forget).
    ///
    /// Used for `session.create` where the answer that matters is the
    /// asynchronous `session.start` event.
    pub async fn send_request(&self, request: &JsonRpcRequest) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CopilotError::RouterStopped);
        }
        let request_json = serde_json::to_string(request)?;
        trace!("Router sending: {}", request_json);

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &request_json).await
    }

    /// Remove a session's route and drop its handlers.
    pub fn deregister_session(&self, session_id: &str) {
        let route = self
            .routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(route) = route {
            route.close();
            debug!("Router: deregistered session {}", session_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.routes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop the reader task and terminate the CLI process.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            debug!("Killing Copilot CLI process");
            child.start_kill()?;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(status) => debug!("Copilot CLI exited: {:?}", status?),
                Err(_) => warn!("Copilot CLI did not exit within {:?}", SHUTDOWN_TIMEOUT),
            }
        }
        Ok(())
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let child = self.child.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = child.as_mut() {
            debug!("MessageRouter dropping, killing copilot-cli child process");
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copilot::fake_cli::FakeCli;
    use pilot_application::FnPermissionHandler;
    use pilot_domain::PermissionRequest;
    use serde_json::json;

    fn recorder(route: &Arc<SessionRoute>) -> (Subscription, Arc<std::sync::Mutex<Vec<String>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = route.subscribe(Arc::new(move |event: &SessionEvent| {
            sink.lock().unwrap().push(event.event_type().to_string());
        }));
        (subscription, seen)
    }

    #[tokio::test]
    async fn create_session_waits_for_session_start() {
        let (router, mut cli) = FakeCli::pair();

        let creating = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .create_session(
                        CreateSessionParams {
                            model: Some("gpt-5".into()),
                            ..Default::default()
                        },
                        None,
                    )
                    .await
            })
        };

        let params = cli.accept_create("sess-1").await;
        assert_eq!(params["model"], "gpt-5");

        let route = creating.await.unwrap().unwrap();
        assert_eq!(route.session_id(), "sess-1");
        assert_eq!(router.session_count(), 1);
    }

    #[tokio::test]
    async fn events_are_routed_by_session() {
        let (router, mut cli) = FakeCli::pair();
        let a = cli.create(&router, "sess-a").await;
        let b = cli.create(&router, "sess-b").await;
        let (_sub_a, seen_a) = recorder(&a);
        let (_sub_b, seen_b) = recorder(&b);

        cli.emit("sess-a", "assistant.message_delta", json!({"deltaContent": "hi"}))
            .await;
        cli.emit("sess-b", "session.idle", json!({})).await;
        cli.emit("sess-unknown", "session.idle", json!({})).await;
        cli.emit("sess-a", "session.idle", json!({})).await;
        cli.settle().await;

        assert_eq!(
            *seen_a.lock().unwrap(),
            vec!["assistant.message_delta", "session.idle"]
        );
        assert_eq!(*seen_b.lock().unwrap(), vec!["session.idle"]);
    }

    #[tokio::test]
    async fn unsubscribed_handlers_stop_receiving() {
        let (router, mut cli) = FakeCli::pair();
        let route = cli.create(&router, "sess-1").await;
        let (subscription, seen) = recorder(&route);

        cli.emit("sess-1", "assistant.turn_start", json!({"turnId": "1"}))
            .await;
        cli.settle().await;
        subscription.unsubscribe();
        cli.emit("sess-1", "session.idle", json!({})).await;
        cli.settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["assistant.turn_start"]);
        assert_eq!(route.handler_count(), 0);
    }

    #[tokio::test]
    async fn call_correlates_results_and_errors() {
        let (router, mut cli) = FakeCli::pair();

        let ok = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.call("session.send", json!({"x": 1})).await })
        };
        let (id, params) = cli.expect_request("session.send").await;
        assert_eq!(params["x"], 1);
        cli.respond(id, json!({"messageId": "m-1"})).await;
        assert_eq!(ok.await.unwrap().unwrap().unwrap()["messageId"], "m-1");

        let failing = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.call("session.destroy", json!({})).await })
        };
        let (id, _) = cli.expect_request("session.destroy").await;
        cli.respond_error(id, -32000, "Session not found").await;
        let err = failing.await.unwrap().unwrap_err();
        assert!(matches!(err, CopilotError::RpcError { code: -32000, .. }));
    }

    #[tokio::test]
    async fn permission_requests_use_the_session_handler() {
        let (router, mut cli) = FakeCli::pair();
        let handler: Arc<dyn PermissionHandler> =
            Arc::new(FnPermissionHandler::new(|request: &PermissionRequest| {
            if request.kind == "read" {
                PermissionDecision::Approved
            } else {
                PermissionDecision::DeniedByRules
            }
        }));
        let _route = cli
            .create_with_handler(&router, "sess-1", Some(handler))
            .await;

        let reply = cli
            .ask_permission(41, "sess-1", json!({"kind": "read", "path": "src/lib.rs"}))
            .await;
        assert_eq!(reply["result"]["result"]["kind"], "approved");

        let reply = cli
            .ask_permission(42, "sess-1", json!({"kind": "shell"}))
            .await;
        assert_eq!(reply["result"]["result"]["kind"], "denied-by-rules");
    }

    #[tokio::test]
    async fn permission_requests_without_handler_are_denied() {
        let (router, mut cli) = FakeCli::pair();
        let _route = cli.create(&router, "sess-1").await;

        let reply = cli
            .ask_permission(7, "sess-1", json!({"kind": "write"}))
            .await;
        assert_eq!(
            reply["result"]["result"]["kind"],
            "denied-no-approval-rule-and-could-not-request-from-user"
        );
    }

    #[tokio::test]
    async fn unsupported_requests_get_errors() {
        let (_router, mut cli) = FakeCli::pair();

        cli.send(json!({
            "jsonrpc": "2.0", "id": 5, "method": "tool.call",
            "params": {"sessionId": "s", "toolCallId": "t", "toolName": "deploy", "arguments": {}}
        }))
        .await;
        let reply = cli.next_message().await;
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["result"]["resultType"], "error");

        cli.send(json!({"jsonrpc": "2.0", "id": 6, "method": "hooks.invoke", "params": {}}))
            .await;
        let reply = cli.next_message().await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn connection_loss_closes_routes_and_pending_requests() {
        let (router, mut cli) = FakeCli::pair();
        let route = cli.create(&router, "sess-1").await;
        let (_subscription, _seen) = recorder(&route);

        let pending = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.call("session.send", json!({})).await })
        };
        cli.expect_request("session.send").await;
        drop(cli);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CopilotError::RouterStopped));
        assert_eq!(route.handler_count(), 0);
        assert_eq!(router.session_count(), 0);
    }

    #[tokio::test]
    async fn deregister_closes_route() {
        let (router, mut cli) = FakeCli::pair();
        let route = cli.create(&router, "sess-1").await;
        let (_subscription, _seen) = recorder(&route);

        router.deregister_session("sess-1");
        assert_eq!(route.handler_count(), 0);
        assert_eq!(router.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let (router, _cli) = FakeCli::pair();
        router.shutdown().await.unwrap();

        let err = router
            .send_request(&JsonRpcRequest::new("session.send", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CopilotError::RouterStopped));
    }
}
