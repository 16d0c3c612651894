//! In-memory fakes of the backend ports.
//!
//! A [`FakeSession`] replays a script of [`Step`]s on a spawned task every
//! time `send` is called. Waits use `tokio::time::sleep`, so tests running
//! with a paused clock advance deterministically.

#![allow(dead_code)]

use crate::ports::backend::{
    BackendClient, BackendClientFactory, EventHandler, EventSession, GatewayError, SessionConfig,
    Subscription,
};
use async_trait::async_trait;
use pilot_domain::{RawSessionEvent, SessionEvent};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(SessionEvent),
    Wait(Duration),
}

pub fn emit(event: SessionEvent) -> Step {
    Step::Emit(event)
}

pub fn wait_ms(ms: u64) -> Step {
    Step::Wait(Duration::from_millis(ms))
}

type HandlerList = Arc<Mutex<Vec<(u64, EventHandler)>>>;

pub struct FakeSession {
    id: String,
    script: Vec<Step>,
    handlers: HandlerList,
    next_handler: AtomicU64,
    send_error: Option<String>,
    wait_reply: Option<String>,
    pub sends: AtomicUsize,
    pub blocking_sends: AtomicUsize,
    pub destroys: AtomicUsize,
}

impl FakeSession {
    pub fn new(id: impl Into<String>, script: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            script,
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_handler: AtomicU64::new(1),
            send_error: None,
            wait_reply: None,
            sends: AtomicUsize::new(0),
            blocking_sends: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    pub fn failing_send(mut self, message: impl Into<String>) -> Self {
        self.send_error = Some(message.into());
        self
    }

    pub fn with_wait_reply(mut self, reply: impl Into<String>) -> Self {
        self.wait_reply = Some(reply.into());
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    fn dispatch(handlers: &HandlerList, event: &SessionEvent) {
        let snapshot: Vec<EventHandler> = handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

#[async_trait]
impl EventSession for FakeSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        let id = self.next_handler.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().push((id, handler));
        let handlers = Arc::clone(&self.handlers);
        Subscription::new(move || {
            handlers.lock().unwrap().retain(|(other, _)| *other != id);
        })
    }

    async fn send(&self, _prompt: &str) -> Result<(), GatewayError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.send_error {
            return Err(GatewayError::RequestFailed(message.clone()));
        }
        let handlers = Arc::clone(&self.handlers);
        let script = self.script.clone();
        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Emit(event) => Self::dispatch(&handlers, &event),
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                }
            }
        });
        Ok(())
    }

    async fn send_and_wait(
        &self,
        _prompt: &str,
        timeout: Duration,
    ) -> Result<Option<RawSessionEvent>, GatewayError> {
        self.blocking_sends.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.send_error {
            return Err(GatewayError::RequestFailed(message.clone()));
        }
        match &self.wait_reply {
            Some(reply) => Ok(Some(RawSessionEvent::new(
                "assistant.message",
                serde_json::json!({ "content": reply }),
            ))),
            None => Err(GatewayError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn destroy(&self) -> Result<(), GatewayError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().clear();
        Ok(())
    }
}

pub struct FakeClient {
    cwd: Option<PathBuf>,
    script: Vec<Step>,
    wait_reply: Option<String>,
    fail_create: bool,
    next_session: AtomicU64,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub configs: Mutex<Vec<SessionConfig>>,
    pub stops: AtomicUsize,
}

impl FakeClient {
    pub fn new(cwd: Option<PathBuf>, script: Vec<Step>) -> Self {
        Self {
            cwd,
            script,
            wait_reply: None,
            fail_create: false,
            next_session: AtomicU64::new(1),
            sessions: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        self.configs.lock().unwrap().last().cloned()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for FakeClient {
    fn working_directory(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn EventSession>, GatewayError> {
        if self.fail_create {
            return Err(GatewayError::SessionError("create refused".to_string()));
        }
        self.configs.lock().unwrap().push(config);
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let mut session = FakeSession::new(format!("session-{}", n), self.script.clone());
        if let Some(reply) = &self.wait_reply {
            session = session.with_wait_reply(reply.clone());
        }
        let session = Arc::new(session);
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeFactory {
    available: bool,
    script: Vec<Step>,
    wait_reply: Option<String>,
    fail_create: bool,
    connect_delay: Duration,
    pub probes: AtomicUsize,
    pub connects: AtomicUsize,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeFactory {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            available: true,
            script,
            wait_reply: None,
            fail_create: false,
            connect_delay: Duration::ZERO,
            probes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_wait_reply(mut self, reply: impl Into<String>) -> Self {
        self.wait_reply = Some(reply.into());
        self
    }

    pub fn with_failing_sessions(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn client(&self, index: usize) -> Arc<FakeClient> {
        Arc::clone(&self.clients.lock().unwrap()[index])
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

#[async_trait]
impl BackendClientFactory for FakeFactory {
    fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.available
    }

    async fn connect(
        &self,
        working_directory: Option<&Path>,
    ) -> Result<Arc<dyn BackendClient>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let mut client = FakeClient::new(
            working_directory.map(Path::to_path_buf),
            self.script.clone(),
        );
        client.wait_reply = self.wait_reply.clone();
        client.fail_create = self.fail_create;
        let client = Arc::new(client);
        self.clients.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }
}
