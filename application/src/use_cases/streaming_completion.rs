//! Streaming completion engine.
//!
//! Sends one prompt to an [`EventSession`] and settles exactly once with a
//! [`StreamingResult`] or a [`CompletionError`], however the backend's
//! lifecycle events are ordered.
//!
//! # Completion signals
//!
//! | Signal | Effect |
//! |--------|--------|
//! | `session.idle` | settle now with the best content (primary signal) |
//! | `session.error` | fail now with the backend's message |
//! | `assistant.turn_end` | arm the grace timer unless one is pending |
//! | `assistant.turn_start` | disarm the grace timer (more turns follow) |
//! | grace timer fires | settle if any content exists, else keep waiting |
//! | invocation timeout | fail with the configured duration |
//!
//! A backend commonly emits `turn_end → (tool execution) → turn_start` for
//! the next turn of the same conversation, so a pending grace timer is
//! cancelled as soon as another turn begins.
//!
//! # Content
//!
//! Every non-empty `assistant.message` is kept, one per turn. On settlement
//! they are joined with a blank line ([`CompletionMode::JoinAll`]); the raw
//! delta text is used only when no final message was seen. A settlement
//! with no content and zero turns is [`CompletionError::NoResponse`]; with
//! turns > 0 it is a successful, empty response (the backend did its work
//! through tools).

use crate::ports::backend::{EventSession, GatewayError};
use crate::ports::conversation_logger::{
    ConversationEvent, ConversationLogger, NoConversationLogger, event_names,
};
use pilot_domain::{SessionEvent, StreamingResult, TokenUsageAccumulator};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace, warn};

/// Default wait after `assistant.turn_end` before settling without `session.idle`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// Receives each streamed text fragment as it arrives.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors that end a streaming send.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("No response received from Copilot")]
    NoResponse,

    #[error("Session event stream closed before completion")]
    StreamClosed,
}

impl From<GatewayError> for CompletionError {
    fn from(err: GatewayError) -> Self {
        CompletionError::SendFailed(err.to_string())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How recorded final messages become the response text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Join every non-empty final message with a blank line.
    #[default]
    JoinAll,
    /// Keep only the last non-empty final message.
    LastMessage,
}

/// What the driver must do after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Continue,
    StartGrace,
    CancelGrace,
    Settle,
    Fail(String),
}

#[derive(Debug)]
struct OpenToolCall {
    name: String,
    started: Instant,
}

/// Per-invocation state of the completion state machine.
///
/// Pure bookkeeping: no timers, no I/O. [`StreamingCompletion`] owns one
/// per send and maps each [`Transition`] onto its timers.
pub struct CompletionState {
    mode: CompletionMode,
    on_chunk: Option<ChunkCallback>,
    delta_text: String,
    messages: Vec<String>,
    turn_count: u32,
    usage: TokenUsageAccumulator,
    open_tools: HashMap<String, OpenToolCall>,
    saw_delta: bool,
    message_chunk_sent: bool,
    grace_pending: bool,
}

impl CompletionState {
    pub fn new(mode: CompletionMode, on_chunk: Option<ChunkCallback>) -> Self {
        Self {
            mode,
            on_chunk,
            delta_text: String::new(),
            messages: Vec::new(),
            turn_count: 0,
            usage: TokenUsageAccumulator::new(),
            open_tools: HashMap::new(),
            saw_delta: false,
            message_chunk_sent: false,
            grace_pending: false,
        }
    }

    /// Apply one backend event.
    pub fn apply(&mut self, event: &SessionEvent) -> Transition {
        match event {
            SessionEvent::MessageDelta(data) => {
                self.delta_text.push_str(&data.delta_content);
                if !data.delta_content.is_empty() {
                    self.saw_delta = true;
                    self.emit_chunk(&data.delta_content);
                }
                Transition::Continue
            }
            SessionEvent::Message(data) => {
                if !data.content.is_empty() {
                    self.messages.push(data.content.clone());
                    // Backends may skip deltas for short answers.
                    if !self.saw_delta && !self.message_chunk_sent {
                        self.message_chunk_sent = true;
                        self.emit_chunk(&data.content);
                    }
                }
                if !data.tool_requests.is_empty() {
                    debug!(
                        "Stream: assistant.message requested {} tool(s)",
                        data.tool_requests.len()
                    );
                }
                Transition::Continue
            }
            SessionEvent::TurnStart(data) => {
                trace!("Stream: assistant.turn_start {:?}", data.turn_id);
                if self.grace_pending {
                    self.grace_pending = false;
                    debug!("Stream: new turn started, grace timer cancelled");
                    Transition::CancelGrace
                } else {
                    Transition::Continue
                }
            }
            SessionEvent::TurnEnd(data) => {
                self.turn_count += 1;
                debug!(
                    "Stream: assistant.turn_end {:?} (turns: {}, messages: {}, delta bytes: {})",
                    data.turn_id,
                    self.turn_count,
                    self.messages.len(),
                    self.delta_text.len()
                );
                if self.grace_pending {
                    Transition::Continue
                } else {
                    self.grace_pending = true;
                    Transition::StartGrace
                }
            }
            SessionEvent::Idle => {
                debug!("Stream: session.idle");
                Transition::Settle
            }
            SessionEvent::Error(data) => {
                let message = if data.message.is_empty() {
                    "Unknown session error".to_string()
                } else {
                    data.message.clone()
                };
                warn!("Session error: {}", message);
                if let Some(stack) = &data.stack {
                    debug!("Session error stack: {}", stack);
                }
                Transition::Fail(message)
            }
            SessionEvent::Usage(data) => {
                self.usage.record_usage(data);
                Transition::Continue
            }
            SessionEvent::UsageInfo(data) => {
                self.usage.record_quota(data);
                Transition::Continue
            }
            SessionEvent::ToolExecutionStart(data) => {
                debug!("Stream: tool start {} ({})", data.tool_name, data.tool_call_id);
                self.open_tools.insert(
                    data.tool_call_id.clone(),
                    OpenToolCall {
                        name: data.tool_name.clone(),
                        started: Instant::now(),
                    },
                );
                Transition::Continue
            }
            SessionEvent::ToolExecutionComplete(data) => {
                let open = self.open_tools.remove(&data.tool_call_id);
                let name = data
                    .tool_name
                    .as_deref()
                    .or(open.as_ref().map(|t| t.name.as_str()))
                    .unwrap_or("unknown");
                debug!(
                    "Stream: tool complete {} ({}) success={:?} elapsed={:?}",
                    name,
                    data.tool_call_id,
                    data.success,
                    open.as_ref().map(|t| t.started.elapsed())
                );
                if let Some(error) = data.error_message() {
                    debug!("Stream: tool {} failed: {}", name, error);
                }
                Transition::Continue
            }
            SessionEvent::ToolExecutionProgress(data) => {
                trace!(
                    "Stream: tool progress {}: {:?}",
                    data.tool_call_id, data.progress_message
                );
                Transition::Continue
            }
            SessionEvent::Intent(data) => {
                debug!("Stream: intent: {}", data.intent);
                Transition::Continue
            }
            SessionEvent::Info(data) => {
                debug!("Stream: info [{}] {}", data.info_type, data.message);
                Transition::Continue
            }
            SessionEvent::Abort(data) => {
                debug!("Stream: abort: {}", data.reason);
                Transition::Continue
            }
            SessionEvent::Other { event_type } => {
                trace!("Stream: unhandled event '{}'", event_type);
                Transition::Continue
            }
        }
    }

    /// The grace timer fired. Returns `true` when there is content to settle with.
    pub fn grace_elapsed(&mut self) -> bool {
        self.grace_pending = false;
        let ready = self.has_content();
        if ready {
            debug!("Stream: grace period elapsed after turn_end, settling");
        } else {
            debug!("Stream: grace period elapsed without content, still waiting");
        }
        ready
    }

    pub fn has_content(&self) -> bool {
        !self.messages.is_empty() || !self.delta_text.is_empty()
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    /// Response text as it would be settled right now.
    pub fn content(&self) -> String {
        if self.messages.is_empty() {
            return self.delta_text.clone();
        }
        match self.mode {
            CompletionMode::JoinAll => self.messages.join("\n\n"),
            CompletionMode::LastMessage => self.messages.last().cloned().unwrap_or_default(),
        }
    }

    /// Build the settled outcome.
    pub fn finish(&self) -> Result<StreamingResult, CompletionError> {
        for (id, tool) in &self.open_tools {
            debug!(
                "Tool call {} ({}) still open at settlement after {:?}",
                tool.name,
                id,
                tool.started.elapsed()
            );
        }

        let response = self.content();
        if response.is_empty() && self.turn_count == 0 {
            return Err(CompletionError::NoResponse);
        }
        if response.is_empty() {
            debug!(
                "Settled with empty text after {} turn(s); tool-only execution",
                self.turn_count
            );
        }

        Ok(StreamingResult {
            response,
            token_usage: self.usage.summary(),
            turn_count: self.turn_count,
        })
    }

    fn emit_chunk(&self, chunk: &str) {
        let Some(callback) = &self.on_chunk else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(chunk))).is_err() {
            warn!("Chunk callback panicked; continuing stream");
        }
    }
}

/// Whether a send must go through the streaming engine rather than the
/// backend's blocking call.
pub fn requires_streaming(
    timeout: Duration,
    blocking_call_ceiling: Duration,
    streaming_requested: bool,
    has_chunk_callback: bool,
) -> bool {
    streaming_requested || has_chunk_callback || timeout > blocking_call_ceiling
}

async fn grace_expired(grace: &mut Option<Pin<Box<Sleep>>>) {
    match grace {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Drives one send through [`CompletionState`] with its timers.
pub struct StreamingCompletion {
    grace_period: Duration,
    mode: CompletionMode,
    conversation_logger: Arc<dyn ConversationLogger>,
}

impl StreamingCompletion {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            mode: CompletionMode::default(),
            conversation_logger: Arc::new(NoConversationLogger),
        }
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.conversation_logger = logger;
        self
    }

    /// Send `prompt` on `session` and wait for settlement.
    ///
    /// The event handler is registered before the prompt is sent and
    /// unsubscribed exactly once when this returns.
    pub async fn run(
        &self,
        session: &dyn EventSession,
        prompt: &str,
        timeout: Duration,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<StreamingResult, CompletionError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        let subscription = session.on(Arc::new(move |event: &SessionEvent| {
            let _ = tx.send(event.clone());
        }));

        let outcome = self
            .drive(session, prompt, timeout, on_chunk, &mut rx)
            .await;
        subscription.unsubscribe();

        match &outcome {
            Ok(result) => debug!(
                "Session {} settled: {} bytes, {} turn(s)",
                session.session_id(),
                result.response.len(),
                result.turn_count
            ),
            Err(e) => debug!("Session {} failed: {}", session.session_id(), e),
        }
        outcome
    }

    async fn drive(
        &self,
        session: &dyn EventSession,
        prompt: &str,
        timeout: Duration,
        on_chunk: Option<ChunkCallback>,
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<StreamingResult, CompletionError> {
        let mut state = CompletionState::new(self.mode, on_chunk);
        let mut grace: Option<Pin<Box<Sleep>>> = None;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let send = session.send(prompt);
        tokio::pin!(send);
        let mut sent = false;

        loop {
            tokio::select! {
                biased;

                result = &mut send, if !sent => {
                    sent = true;
                    result?;
                    trace!("Prompt sent to session {}", session.session_id());
                }

                event = rx.recv() => {
                    let Some(event) = event else {
                        return Err(CompletionError::StreamClosed);
                    };
                    if let SessionEvent::ToolExecutionComplete(data) = &event {
                        self.log_tool_completion(session.session_id(), data);
                    }
                    match state.apply(&event) {
                        Transition::Continue => {}
                        Transition::StartGrace => {
                            grace = Some(Box::pin(tokio::time::sleep(self.grace_period)));
                        }
                        Transition::CancelGrace => grace = None,
                        Transition::Settle => return state.finish(),
                        Transition::Fail(message) => {
                            return Err(CompletionError::SessionError(message));
                        }
                    }
                }

                _ = grace_expired(&mut grace) => {
                    grace = None;
                    if state.grace_elapsed() {
                        return state.finish();
                    }
                }

                _ = &mut deadline => {
                    warn!(
                        "Session {} timed out after {}ms",
                        session.session_id(),
                        timeout.as_millis()
                    );
                    return Err(CompletionError::Timeout(duration_ms(timeout)));
                }
            }
        }
    }

    fn log_tool_completion(
        &self,
        session_id: &str,
        data: &pilot_domain::ToolExecutionCompleteData,
    ) {
        let mut payload = serde_json::json!({
            "session_id": session_id,
            "tool_call_id": data.tool_call_id,
            "tool": data.tool_name.as_deref().unwrap_or("unknown"),
            "output_bytes": data.result_bytes(),
        });
        if let Some(success) = data.success {
            payload["success"] = serde_json::json!(success);
        }
        if let Some(error) = data.error_message() {
            payload["error"] = serde_json::json!(error);
        }
        self.conversation_logger.log(ConversationEvent::new(
            event_names::TOOL_EXECUTION_COMPLETE,
            payload,
        ));
    }
}
