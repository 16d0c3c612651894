//! Service façade
//!
//! [`PilotService`] is the single entry point callers use to run prompts
//! against the backend. It owns:
//!
//! - a [`ClientCache`] holding at most one backend client, bound to the
//!   working directory of the last request
//! - the cached availability probe
//! - the registry of in-flight sessions, for [`abort_session`](PilotService::abort_session)
//! - a lazily created [`SessionPool`] for pooled sends, retired whenever the
//!   cached client is replaced
//!
//! Every failure is folded into a [`ServiceResult`]; `send_message` never
//! returns an error.

use crate::config::ServiceConfig;
use crate::ports::backend::{
    BackendClient, BackendClientFactory, EventSession, GatewayError, SessionConfig,
};
use crate::ports::conversation_logger::{
    ConversationEvent, ConversationLogger, NoConversationLogger, event_names,
};
use crate::ports::mcp_config::{McpConfigSource, NoMcpConfig};
use crate::ports::permission::{LoggingPermissionHandler, PermissionHandler};
use crate::use_cases::session_pool::{SessionFactory, SessionPool};
use crate::use_cases::streaming_completion::{
    ChunkCallback, CompletionError, CompletionMode, StreamingCompletion, duration_ms,
    requires_streaming,
};
use async_trait::async_trait;
use pilot_domain::{DomainError, McpServers, ServiceResult, TokenUsage};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Options for one [`PilotService::send_message`] call.
#[derive(Clone, Default)]
pub struct SendOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
    /// Defaults to [`ServiceConfig::default_timeout`].
    pub timeout: Option<Duration>,
    pub streaming: bool,
    pub use_pool: bool,
    pub available_tools: Option<Vec<String>>,
    pub excluded_tools: Option<Vec<String>>,
    /// Explicit MCP servers; an empty map disables every server.
    pub mcp_servers: Option<McpServers>,
    /// Defaults to [`ServiceConfig::load_default_mcp_config`].
    pub load_default_mcp_config: Option<bool>,
    pub permission_handler: Option<Arc<dyn PermissionHandler>>,
    pub on_chunk: Option<ChunkCallback>,
    pub mode: CompletionMode,
    /// Cancelling aborts the send at whatever stage it has reached.
    pub cancellation: Option<CancellationToken>,
}

impl SendOptions {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    // ==================== Builder Methods ====================

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_pool(mut self, use_pool: bool) -> Self {
        self.use_pool = use_pool;
        self
    }

    pub fn with_available_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = Some(tools);
        self
    }

    pub fn with_excluded_tools(mut self, tools: Vec<String>) -> Self {
        self.excluded_tools = Some(tools);
        self
    }

    pub fn with_mcp_servers(mut self, servers: McpServers) -> Self {
        self.mcp_servers = Some(servers);
        self
    }

    pub fn with_default_mcp_config(mut self, enabled: bool) -> Self {
        self.load_default_mcp_config = Some(enabled);
        self
    }

    pub fn with_permission_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.permission_handler = Some(handler);
        self
    }

    pub fn with_chunk_callback(mut self, callback: ChunkCallback) -> Self {
        self.on_chunk = Some(callback);
        self
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Resolves once the send is cancelled; never without a token.
    async fn cancelled(&self) {
        match &self.cancellation {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .field("timeout", &self.timeout)
            .field("streaming", &self.streaming)
            .field("use_pool", &self.use_pool)
            .field("available_tools", &self.available_tools)
            .field("excluded_tools", &self.excluded_tools)
            .field(
                "mcp_servers",
                &self
                    .mcp_servers
                    .as_ref()
                    .map(|servers| servers.keys().collect::<Vec<_>>()),
            )
            .field("load_default_mcp_config", &self.load_default_mcp_config)
            .field("permission_handler", &self.permission_handler.is_some())
            .field("on_chunk", &self.on_chunk.is_some())
            .field("mode", &self.mode)
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

/// Outcome of [`PilotService::abort_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    NotFound,
    Aborted,
}

/// Merge explicit MCP servers with the loaded defaults.
///
/// An explicit empty map disables every server. Otherwise explicit entries
/// win over same-named defaults.
pub fn merge_mcp_servers(
    explicit: Option<&McpServers>,
    defaults: Option<&McpServers>,
) -> Option<McpServers> {
    match (explicit, defaults) {
        (Some(explicit), _) if explicit.is_empty() => Some(McpServers::new()),
        (Some(explicit), Some(defaults)) => {
            let mut merged = defaults.clone();
            merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(merged)
        }
        (Some(explicit), None) => Some(explicit.clone()),
        (None, Some(defaults)) if !defaults.is_empty() => Some(defaults.clone()),
        (None, _) => None,
    }
}

struct CachedClient {
    working_directory: PathBuf,
    client: Arc<dyn BackendClient>,
}

/// Holds at most one backend client, bound to one working directory.
///
/// The lock is held while a client connects, so concurrent callers share
/// one initialization.
pub struct ClientCache {
    factory: Arc<dyn BackendClientFactory>,
    current: tokio::sync::Mutex<Option<CachedClient>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn BackendClientFactory>) -> Self {
        Self {
            factory,
            current: tokio::sync::Mutex::new(None),
        }
    }

    pub fn factory(&self) -> &Arc<dyn BackendClientFactory> {
        &self.factory
    }

    /// Return the client for `working_directory` (the process directory
    /// when `None`), replacing a client bound elsewhere.
    pub async fn ensure_client(
        &self,
        working_directory: Option<&Path>,
    ) -> Result<Arc<dyn BackendClient>, GatewayError> {
        self.ensure_client_with(working_directory, || async {}).await
    }

    /// Like [`ensure_client`](Self::ensure_client), running `retire` before a
    /// previous client is stopped. Sessions created on that client must be
    /// released by `retire` while it still answers.
    pub async fn ensure_client_with<F, Fut>(
        &self,
        working_directory: Option<&Path>,
        retire: F,
    ) -> Result<Arc<dyn BackendClient>, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let working_directory = match working_directory {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| {
                GatewayError::ConnectionError(format!("Cannot resolve working directory: {}", e))
            })?,
        };

        let mut current = self.current.lock().await;
        if let Some(cached) = current.as_ref()
            && cached.working_directory == working_directory
        {
            return Ok(Arc::clone(&cached.client));
        }

        if let Some(old) = current.take() {
            info!(
                "Working directory changed ({} -> {}), restarting Copilot client",
                old.working_directory.display(),
                working_directory.display()
            );
            retire().await;
            if let Err(e) = old.client.stop().await {
                warn!("Failed to stop previous Copilot client: {}", e);
            }
        }

        debug!(
            "Starting Copilot client in {}",
            working_directory.display()
        );
        let client = self.factory.connect(Some(&working_directory)).await?;
        *current = Some(CachedClient {
            working_directory,
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    /// Stop the cached client, if any. Errors are logged.
    pub async fn stop(&self) {
        let Some(cached) = self.current.lock().await.take() else {
            return;
        };
        debug!(
            "Stopping Copilot client for {}",
            cached.working_directory.display()
        );
        if let Err(e) = cached.client.stop().await {
            warn!("Failed to stop Copilot client: {}", e);
        }
    }
}

/// Creates pooled sessions from the service defaults.
struct PooledSessionFactory {
    clients: Arc<ClientCache>,
    config: SessionConfig,
}

#[async_trait]
impl SessionFactory for PooledSessionFactory {
    async fn create(&self) -> Result<Arc<dyn EventSession>, GatewayError> {
        let client = self
            .clients
            .ensure_client(self.config.working_directory.as_deref())
            .await?;
        client.create_session(self.config.clone()).await
    }
}

/// A session registered for the duration of one send.
struct ActiveSession {
    session: Arc<dyn EventSession>,
    /// Set for pooled sends: the owning pool and the entry id.
    pooled: Option<(Arc<SessionPool>, u64)>,
}

struct Completion {
    response: String,
    token_usage: Option<TokenUsage>,
    raw_response: Option<serde_json::Value>,
}

/// Entry point for sending prompts to the backend.
pub struct PilotService {
    config: ServiceConfig,
    clients: Arc<ClientCache>,
    availability: Mutex<Option<bool>>,
    active_sessions: Mutex<HashMap<String, ActiveSession>>,
    pool: Mutex<Option<Arc<SessionPool>>>,
    mcp_source: Arc<dyn McpConfigSource>,
    conversation_logger: Arc<dyn ConversationLogger>,
    default_permission_handler: Option<Arc<dyn PermissionHandler>>,
}

impl PilotService {
    pub fn new(factory: Arc<dyn BackendClientFactory>, config: ServiceConfig) -> Self {
        Self {
            config,
            clients: Arc::new(ClientCache::new(factory)),
            availability: Mutex::new(None),
            active_sessions: Mutex::new(HashMap::new()),
            pool: Mutex::new(None),
            mcp_source: Arc::new(NoMcpConfig),
            conversation_logger: Arc::new(NoConversationLogger),
            default_permission_handler: None,
        }
    }

    pub fn with_mcp_source(mut self, source: Arc<dyn McpConfigSource>) -> Self {
        self.mcp_source = source;
        self
    }

    pub fn with_conversation_logger(mut self, logger: Arc<dyn ConversationLogger>) -> Self {
        self.conversation_logger = logger;
        self
    }

    /// Handler used when a send supplies none, and for pooled sessions.
    pub fn with_default_permission_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.default_permission_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Return the client for `working_directory`. Replacing a client bound
    /// elsewhere also disposes the session pool, whose sessions live on the
    /// old client.
    pub async fn ensure_client(
        &self,
        working_directory: Option<&Path>,
    ) -> Result<Arc<dyn BackendClient>, GatewayError> {
        self.clients
            .ensure_client_with(working_directory, || self.retire_pool())
            .await
    }

    async fn retire_pool(&self) {
        let retired = lock(&self.pool).take();
        if let Some(pool) = retired {
            info!("Disposing session pool bound to the previous Copilot client");
            pool.dispose().await;
        }
    }

    /// Whether the backend can be located. Cached until
    /// [`invalidate_availability`](Self::invalidate_availability).
    pub fn is_available(&self) -> bool {
        let mut cached = lock(&self.availability);
        if let Some(available) = *cached {
            return available;
        }
        let available = self.clients.factory().probe();
        debug!("Copilot availability probe: {}", available);
        *cached = Some(available);
        available
    }

    pub fn invalidate_availability(&self) {
        *lock(&self.availability) = None;
    }

    /// IDs of the sessions currently running a send.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active_sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one prompt. Never fails; errors are reported in the result.
    pub async fn send_message(&self, options: SendOptions) -> ServiceResult {
        if options.prompt.trim().is_empty() {
            return ServiceResult::failure(DomainError::EmptyPrompt.to_string());
        }
        if let Some(dir) = &options.working_directory
            && !dir.is_dir()
        {
            return ServiceResult::failure(
                DomainError::InvalidWorkingDirectory(dir.display().to_string()).to_string(),
            );
        }
        if !self.is_available() {
            return ServiceResult::failure(
                GatewayError::NotAvailable("copilot CLI could not be located".to_string())
                    .to_string(),
            );
        }

        let started = Instant::now();
        let result = if options.is_cancelled() {
            ServiceResult::failure(DomainError::Cancelled.to_string())
        } else if options.use_pool {
            self.send_pooled(&options).await
        } else {
            self.send_direct(&options).await
        };

        if let Some(error) = &result.error {
            warn!("Send failed: {}", error);
        }
        self.conversation_logger.log(ConversationEvent::new(
            event_names::SEND_RESULT,
            serde_json::json!({
                "session_id": result.session_id,
                "success": result.success,
                "error": result.error,
                "response_bytes": result.response.len(),
                "duration_ms": duration_ms(started.elapsed()),
                "pooled": options.use_pool,
            }),
        ));
        result
    }

    async fn send_direct(&self, options: &SendOptions) -> ServiceResult {
        let connect = self.ensure_client(options.working_directory.as_deref());
        let client = tokio::select! {
            client = connect => match client {
                Ok(client) => client,
                Err(e) => {
                    return ServiceResult::failure(format!("Failed to start Copilot client: {}", e));
                }
            },
            _ = options.cancelled() => return Self::cancelled_before_start(),
        };

        let session_config = self.session_config(options);
        debug!("Creating session: {:?}", session_config);
        let session = match client.create_session(session_config).await {
            Ok(session) => session,
            Err(e) => return ServiceResult::failure(format!("Failed to create session: {}", e)),
        };
        let session_id = session.session_id().to_string();
        self.register(&session, None);

        let outcome = self.complete_or_abort(session.as_ref(), options).await;

        let still_active = self.unregister(&session_id);
        if still_active && let Err(e) = session.destroy().await {
            warn!("Failed to destroy session {}: {}", session_id, e);
        }

        Self::service_result(outcome, still_active, session_id)
    }

    async fn send_pooled(&self, options: &SendOptions) -> ServiceResult {
        if options.model.is_some() || options.working_directory.is_some() {
            debug!("Pooled send: per-request model and working directory are ignored");
        }

        let pool = self.pool();
        let acquire = pool.acquire(self.config.pool.acquire_timeout);
        let entry = tokio::select! {
            entry = acquire => match entry {
                Ok(entry) => entry,
                Err(e) => return ServiceResult::failure(e.to_string()),
            },
            _ = options.cancelled() => return Self::cancelled_before_start(),
        };
        let session = Arc::clone(entry.session());
        let session_id = session.session_id().to_string();
        self.register(&session, Some((Arc::clone(&pool), entry.id())));

        let outcome = self.complete_or_abort(session.as_ref(), options).await;

        let still_active = self.unregister(&session_id);
        match (&outcome, still_active) {
            (_, false) => pool.discard(entry),
            (Ok(_), true) => pool.release(entry).await,
            (Err(_), true) => pool.destroy(entry).await,
        }

        Self::service_result(outcome, still_active, session_id)
    }

    /// Run the completion, aborting the session if the send is cancelled
    /// first.
    async fn complete_or_abort(
        &self,
        session: &dyn EventSession,
        options: &SendOptions,
    ) -> Result<Completion, CompletionError> {
        tokio::select! {
            outcome = self.complete(session, options) => outcome,
            _ = options.cancelled() => {
                self.abort_session(session.session_id()).await;
                Err(CompletionError::StreamClosed)
            }
        }
    }

    fn cancelled_before_start() -> ServiceResult {
        debug!("Send cancelled before a session was ready");
        ServiceResult::failure(DomainError::Cancelled.to_string())
    }

    async fn complete(
        &self,
        session: &dyn EventSession,
        options: &SendOptions,
    ) -> Result<Completion, CompletionError> {
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);

        if requires_streaming(
            timeout,
            self.config.blocking_call_ceiling,
            options.streaming,
            options.on_chunk.is_some(),
        ) {
            let engine = StreamingCompletion::new(self.config.grace_period)
                .with_mode(options.mode)
                .with_conversation_logger(Arc::clone(&self.conversation_logger));
            let result = engine
                .run(session, &options.prompt, timeout, options.on_chunk.clone())
                .await?;
            return Ok(Completion {
                response: result.response,
                token_usage: result.token_usage,
                raw_response: None,
            });
        }

        let reply = session
            .send_and_wait(&options.prompt, timeout)
            .await
            .map_err(|e| match e {
                GatewayError::Timeout(ms) => CompletionError::Timeout(ms),
                other => CompletionError::SendFailed(other.to_string()),
            })?;
        let Some(reply) = reply else {
            return Err(CompletionError::NoResponse);
        };
        let response = reply
            .data
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        if response.is_empty() {
            return Err(CompletionError::NoResponse);
        }
        Ok(Completion {
            response,
            token_usage: None,
            raw_response: serde_json::to_value(&reply).ok(),
        })
    }

    fn service_result(
        outcome: Result<Completion, CompletionError>,
        still_active: bool,
        session_id: String,
    ) -> ServiceResult {
        match outcome {
            Ok(completion) => {
                let mut result = ServiceResult::success(completion.response)
                    .with_session_id(session_id)
                    .with_token_usage(completion.token_usage);
                if let Some(raw) = completion.raw_response {
                    result = result.with_raw_response(raw);
                }
                result
            }
            Err(_) if !still_active => {
                ServiceResult::failure(DomainError::Cancelled.to_string()).with_session_id(session_id)
            }
            Err(e) => ServiceResult::failure(e.to_string()).with_session_id(session_id),
        }
    }

    /// Destroy a running session. Reports `Aborted` even when the backend
    /// fails to destroy it; the session is no longer tracked either way.
    ///
    /// A pooled session is detached from its pool first. If the pool no
    /// longer tracks it, the pool has already destroyed it.
    pub async fn abort_session(&self, session_id: &str) -> AbortOutcome {
        let Some(active) = lock(&self.active_sessions).remove(session_id) else {
            debug!("Abort requested for unknown session {}", session_id);
            return AbortOutcome::NotFound;
        };
        info!("Aborting session {}", session_id);
        if let Some((pool, entry_id)) = &active.pooled
            && !pool.detach(*entry_id)
        {
            debug!("Pooled session {} already torn down by its pool", session_id);
            return AbortOutcome::Aborted;
        }
        if let Err(e) = active.session.destroy().await {
            warn!("Failed to destroy aborted session {}: {}", session_id, e);
        }
        AbortOutcome::Aborted
    }

    /// Abort running sessions, dispose the pool and stop the client.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        let sessions: Vec<String> = self.active_sessions();
        for session_id in sessions {
            self.abort_session(&session_id).await;
        }

        let pool = lock(&self.pool).take();
        if let Some(pool) = pool {
            pool.dispose().await;
        }

        self.clients.stop().await;
        self.invalidate_availability();
    }

    fn register(&self, session: &Arc<dyn EventSession>, pooled: Option<(Arc<SessionPool>, u64)>) {
        lock(&self.active_sessions).insert(
            session.session_id().to_string(),
            ActiveSession {
                session: Arc::clone(session),
                pooled,
            },
        );
    }

    /// Returns `false` if the session was aborted meanwhile.
    fn unregister(&self, session_id: &str) -> bool {
        lock(&self.active_sessions).remove(session_id).is_some()
    }

    fn pool(&self) -> Arc<SessionPool> {
        let mut slot = lock(&self.pool);
        if let Some(pool) = slot.as_ref() {
            return Arc::clone(pool);
        }

        let factory = PooledSessionFactory {
            clients: Arc::clone(&self.clients),
            config: self.pooled_session_config(),
        };
        let pool = Arc::new(SessionPool::new(Arc::new(factory), self.config.pool.clone()));
        pool.spawn_reaper();
        info!(
            "Session pool started (max {} sessions)",
            self.config.pool.max_sessions
        );
        *slot = Some(Arc::clone(&pool));
        pool
    }

    fn session_config(&self, options: &SendOptions) -> SessionConfig {
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let load_default = options
            .load_default_mcp_config
            .unwrap_or(self.config.load_default_mcp_config);

        SessionConfig {
            model: options
                .model
                .clone()
                .or_else(|| self.config.default_model.clone()),
            working_directory: options.working_directory.clone(),
            available_tools: options.available_tools.clone(),
            excluded_tools: options.excluded_tools.clone(),
            mcp_servers: self.mcp_servers(options.mcp_servers.as_ref(), load_default),
            streaming: requires_streaming(
                timeout,
                self.config.blocking_call_ceiling,
                options.streaming,
                options.on_chunk.is_some(),
            ),
            permission_handler: self.permission_handler(options.permission_handler.clone()),
        }
    }

    fn pooled_session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.config.default_model.clone(),
            working_directory: None,
            available_tools: None,
            excluded_tools: None,
            mcp_servers: self.mcp_servers(None, self.config.load_default_mcp_config),
            streaming: true,
            permission_handler: self.permission_handler(None),
        }
    }

    fn mcp_servers(&self, explicit: Option<&McpServers>, load_default: bool) -> Option<McpServers> {
        let defaults = load_default.then(|| self.mcp_source.load_default());
        let merged = merge_mcp_servers(explicit, defaults.as_ref());
        if let Some(servers) = &merged {
            debug!(
                "MCP servers for session: {:?}",
                servers.keys().collect::<Vec<_>>()
            );
        }
        merged
    }

    fn permission_handler(
        &self,
        requested: Option<Arc<dyn PermissionHandler>>,
    ) -> Option<Arc<dyn PermissionHandler>> {
        requested
            .or_else(|| self.default_permission_handler.clone())
            .map(|inner| {
                Arc::new(LoggingPermissionHandler::new(
                    inner,
                    Arc::clone(&self.conversation_logger),
                )) as Arc<dyn PermissionHandler>
            })
    }
}
