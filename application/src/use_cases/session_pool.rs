//! Session pool
//!
//! Reuses backend sessions across short-lived requests. The pool bounds the
//! number of live sessions (idle + busy + being created) to
//! [`PoolConfig::max_sessions`]; acquirers beyond that wait in FIFO order
//! until a session is released or destroyed, or their timeout elapses.
//!
//! All bookkeeping happens under one `std::sync::Mutex` that is never held
//! across an `.await`: checking for capacity and claiming it is a single
//! critical section. Session creation and destruction run outside it.

use crate::config::PoolConfig;
use crate::ports::backend::{EventSession, GatewayError};
use crate::use_cases::streaming_completion::duration_ms;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Creates the sessions the pool hands out.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn EventSession>, GatewayError>;
}

/// Errors returned by [`SessionPool::acquire`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Session pool has been disposed")]
    Disposed,

    #[error("Timed out after {0}ms waiting for a pooled session")]
    AcquireTimeout(u64),

    #[error("Failed to create pooled session: {0}")]
    Factory(String),
}

/// A session checked out of the pool.
///
/// Hand it back with [`SessionPool::release`] when the session is healthy,
/// or [`SessionPool::destroy`] after a failed request.
pub struct PoolEntry {
    id: u64,
    session: Arc<dyn EventSession>,
}

impl PoolEntry {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Arc<dyn EventSession> {
        &self.session
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("session_id", &self.session.session_id())
            .finish()
    }
}

/// Point-in-time counts for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub busy: usize,
    /// `idle + busy`.
    pub total: usize,
    pub max: usize,
    /// Acquirers queued for capacity.
    pub waiting: usize,
}

struct IdleEntry {
    entry: PoolEntry,
    last_used: Instant,
}

struct PoolState {
    max: usize,
    /// LIFO: the most recently released session is reused first.
    idle: Vec<IdleEntry>,
    busy: HashMap<u64, Arc<dyn EventSession>>,
    creating: usize,
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    disposed: bool,
    next_id: u64,
}

type SharedState = Arc<Mutex<PoolState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.busy.len() + self.creating
    }

    /// Give a returned entry to the oldest live waiter, or park it idle.
    fn check_in(&mut self, shared: &SharedState, mut entry: PoolEntry) {
        while let Some(waiter) = self.waiters.pop_front() {
            self.busy.insert(entry.id, Arc::clone(&entry.session));
            match waiter.send(Handoff::new(shared, Grant::Entry(entry))) {
                Ok(()) => return,
                Err(mut handoff) => {
                    let Some(Grant::Entry(returned)) = handoff.grant.take() else {
                        return;
                    };
                    self.busy.remove(&returned.id);
                    entry = returned;
                }
            }
        }
        self.idle.push(IdleEntry {
            entry,
            last_used: Instant::now(),
        });
    }

    /// Hand creation slots to waiters while there is spare capacity.
    fn offer_capacity(&mut self, shared: &SharedState) {
        while self.live() < self.max {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            self.creating += 1;
            if let Err(mut handoff) = waiter.send(Handoff::new(shared, Grant::Slot)) {
                handoff.grant = None;
                self.creating -= 1;
            }
        }
    }
}

enum Grant {
    /// An existing session, already recorded as busy.
    Entry(PoolEntry),
    /// Permission to create a session; `creating` is already counted.
    Slot,
}

/// A grant in flight to a waiter.
///
/// If the waiter goes away before claiming it, dropping the handoff gives
/// the capacity back to the pool.
struct Handoff {
    grant: Option<Grant>,
    state: SharedState,
}

impl Handoff {
    fn new(state: &SharedState, grant: Grant) -> Self {
        Self {
            grant: Some(grant),
            state: Arc::clone(state),
        }
    }

    fn claim(mut self) -> Option<Grant> {
        self.grant.take()
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        let Some(grant) = self.grant.take() else {
            return;
        };
        let mut state = lock(&self.state);
        match grant {
            Grant::Entry(entry) => {
                if state.busy.remove(&entry.id).is_some() && !state.disposed {
                    state.check_in(&self.state, entry);
                }
            }
            Grant::Slot => {
                state.creating -= 1;
                if !state.disposed {
                    state.offer_capacity(&self.state);
                }
            }
        }
    }
}

/// Releases a counted creation slot if creation never completes.
struct CreationSlot {
    state: SharedState,
    armed: bool,
}

impl CreationSlot {
    fn new(state: &SharedState) -> Self {
        Self {
            state: Arc::clone(state),
            armed: true,
        }
    }
}

impl Drop for CreationSlot {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.state);
        state.creating -= 1;
        if !state.disposed {
            state.offer_capacity(&self.state);
        }
    }
}

/// Bounded pool of reusable backend sessions.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    state: SharedState,
    shutdown: CancellationToken,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Self {
        let max = config.max_sessions.max(1);
        Self {
            factory,
            config,
            state: Arc::new(Mutex::new(PoolState {
                max,
                idle: Vec::new(),
                busy: HashMap::new(),
                creating: 0,
                waiters: VecDeque::new(),
                disposed: false,
                next_id: 1,
            })),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a session, creating one if under capacity, otherwise
    /// waiting up to `timeout` for one to be released.
    pub async fn acquire(&self, timeout: Duration) -> Result<PoolEntry, PoolError> {
        self.reap_idle().await;

        let waiter = {
            let mut state = lock(&self.state);
            if state.disposed {
                return Err(PoolError::Disposed);
            }
            if let Some(idle) = state.idle.pop() {
                let entry = idle.entry;
                state.busy.insert(entry.id, Arc::clone(&entry.session));
                debug!("Pool: reusing session {}", entry.session.session_id());
                return Ok(entry);
            }
            if state.live() < state.max {
                state.creating += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(
                    "Pool: at capacity ({}), queued acquirer #{}",
                    state.max,
                    state.waiters.len()
                );
                Some(rx)
            }
        };

        let Some(mut rx) = waiter else {
            return self.create_entry(CreationSlot::new(&self.state)).await;
        };

        let handoff = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(handoff)) => handoff,
            Ok(Err(_)) => return Err(PoolError::Disposed),
            Err(_) => {
                rx.close();
                match rx.try_recv() {
                    Ok(handoff) => handoff,
                    Err(_) => {
                        debug!("Pool: acquire timed out after {:?}", timeout);
                        return Err(PoolError::AcquireTimeout(duration_ms(timeout)));
                    }
                }
            }
        };

        if lock(&self.state).disposed {
            return Err(PoolError::Disposed);
        }
        match handoff.claim() {
            Some(Grant::Entry(entry)) => {
                debug!(
                    "Pool: waiter received released session {}",
                    entry.session.session_id()
                );
                Ok(entry)
            }
            Some(Grant::Slot) => self.create_entry(CreationSlot::new(&self.state)).await,
            None => Err(PoolError::Disposed),
        }
    }

    async fn create_entry(&self, mut slot: CreationSlot) -> Result<PoolEntry, PoolError> {
        let session = match self.factory.create().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Pool: session factory failed: {}", e);
                return Err(PoolError::Factory(e.to_string()));
            }
        };

        let entry = {
            let mut state = lock(&self.state);
            slot.armed = false;
            state.creating -= 1;
            if state.disposed {
                None
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.busy.insert(id, Arc::clone(&session));
                Some(PoolEntry {
                    id,
                    session: Arc::clone(&session),
                })
            }
        };

        match entry {
            Some(entry) => {
                debug!("Pool: created session {}", session.session_id());
                Ok(entry)
            }
            None => {
                destroy_quietly(session.as_ref()).await;
                Err(PoolError::Disposed)
            }
        }
    }

    /// Return a healthy session for reuse.
    pub async fn release(&self, entry: PoolEntry) {
        let orphan = {
            let mut state = lock(&self.state);
            let tracked = state.busy.remove(&entry.id).is_some();
            if state.disposed {
                tracked.then_some(entry)
            } else if tracked {
                state.check_in(&self.state, entry);
                None
            } else {
                warn!(
                    "Pool: released session {} is not checked out",
                    entry.session.session_id()
                );
                None
            }
        };
        if let Some(entry) = orphan {
            destroy_quietly(entry.session.as_ref()).await;
        }
    }

    /// Remove a session from the pool and tear it down.
    pub async fn destroy(&self, entry: PoolEntry) {
        let tracked = {
            let mut state = lock(&self.state);
            let tracked = state.busy.remove(&entry.id).is_some();
            if !state.disposed {
                state.offer_capacity(&self.state);
            }
            tracked
        };
        if tracked {
            debug!("Pool: destroying session {}", entry.session.session_id());
            destroy_quietly(entry.session.as_ref()).await;
        }
    }

    /// Forget a session that was already torn down elsewhere (e.g. aborted).
    pub fn discard(&self, entry: PoolEntry) {
        self.detach(entry.id);
    }

    /// Stop tracking a checked-out session so that neither the pool nor
    /// [`dispose`](Self::dispose) destroys it.
    ///
    /// Returns `false` when the pool no longer tracks the entry, in which
    /// case the pool has already torn the session down.
    pub fn detach(&self, entry_id: u64) -> bool {
        let mut state = lock(&self.state);
        let tracked = state.busy.remove(&entry_id).is_some();
        if tracked && !state.disposed {
            state.offer_capacity(&self.state);
        }
        tracked
    }

    /// Destroy idle sessions unused for longer than the idle timeout.
    ///
    /// Busy sessions are never touched. Returns the number evicted.
    pub async fn reap_idle(&self) -> usize {
        let expired: Vec<PoolEntry> = {
            let mut state = lock(&self.state);
            if state.disposed || state.idle.is_empty() {
                return 0;
            }
            let idle_timeout = self.config.idle_timeout;
            let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|idle| idle.last_used.elapsed() >= idle_timeout);
            state.idle = kept;
            if !expired.is_empty() {
                state.offer_capacity(&self.state);
            }
            expired.into_iter().map(|idle| idle.entry).collect()
        };

        for entry in &expired {
            debug!("Pool: evicting idle session {}", entry.session.session_id());
            destroy_quietly(entry.session.as_ref()).await;
        }
        expired.len()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `reap_interval` until the
    /// pool is disposed or dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.reap_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else {
                            break;
                        };
                        let evicted = pool.reap_idle().await;
                        if evicted > 0 {
                            info!("Pool reaper evicted {} idle session(s)", evicted);
                        }
                    }
                }
            }
            debug!("Pool reaper stopped");
        })
    }

    /// Destroy every session and reject queued acquirers. Idempotent.
    pub async fn dispose(&self) {
        let sessions: Vec<Arc<dyn EventSession>> = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.waiters.clear();
            let idle = std::mem::take(&mut state.idle);
            let busy = std::mem::take(&mut state.busy);
            idle.into_iter()
                .map(|idle| idle.entry.session)
                .chain(busy.into_values())
                .collect()
        };
        self.shutdown.cancel();

        info!("Disposing session pool ({} session(s))", sessions.len());
        futures::future::join_all(
            sessions
                .iter()
                .map(|session| destroy_quietly(session.as_ref())),
        )
        .await;
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        PoolStats {
            idle: state.idle.len(),
            busy: state.busy.len(),
            total: state.idle.len() + state.busy.len(),
            max: state.max,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }
}

async fn destroy_quietly(session: &dyn EventSession) {
    if let Err(e) = session.destroy().await {
        warn!("Failed to destroy session {}: {}", session.session_id(), e);
    }
}
