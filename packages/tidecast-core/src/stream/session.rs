//! Listener sessions and the registry shared by fan-out and lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::DeliveryError;

use super::icy;

/// Stable identifier of one listener session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The outbound side of one listener's HTTP reply.
///
/// Implementations must never block: `send_chunk` queues the bytes for the
/// transport and returns.
pub trait StreamConnection: Send + Sync {
    /// Peer description for logging.
    fn peer(&self) -> String;

    /// Queues one body chunk.
    fn send_chunk(&self, chunk: Bytes) -> Result<(), DeliveryError>;

    /// Ends the reply from the server side.
    ///
    /// Marks the connection as ended before terminating the body so that the
    /// close notification that follows is recognised as server-initiated.
    fn end(&self);

    /// Returns `true` once [`end`](Self::end) has been called.
    fn is_ended(&self) -> bool;
}

/// One connected listener.
pub struct StreamSession {
    pub id: SessionId,
    pub connection: Arc<dyn StreamConnection>,
    /// Fixed at creation from the `Icy-MetaData` request header.
    pub wants_metadata: bool,
    /// Audio bytes sent since the last metadata block.
    pub bytes_since_metadata: u64,
}

impl StreamSession {
    pub fn new(connection: Arc<dyn StreamConnection>, wants_metadata: bool) -> Self {
        Self {
            id: SessionId::new(),
            connection,
            wants_metadata,
            bytes_since_metadata: 0,
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("peer", &self.connection.peer())
            .field("wants_metadata", &self.wants_metadata)
            .field("bytes_since_metadata", &self.bytes_since_metadata)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: Vec<StreamSession>,
    icy_count: usize,
}

/// All connected listeners behind one lock.
///
/// The lock guards membership and the per-session ICY counters. It is never
/// held across a connection write: fan-out computes every session's bytes
/// under the lock and delivers after releasing it.
///
/// The registry also owns the dispatcher's armed flag. It flips to `true`
/// when the first session is inserted and to `false` when the last one
/// leaves, always while the lock is held so the flag cannot disagree with
/// membership.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    armed: watch::Sender<bool>,
    /// Lock-free session count for the producer's fast path.
    active: Arc<AtomicUsize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (armed, _) = watch::channel(false);
        Self {
            inner: Mutex::new(RegistryInner::default()),
            armed,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared session counter, read by the producer without locking.
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    /// Subscribes to the armed/disarmed state.
    pub fn subscribe_armed(&self) -> watch::Receiver<bool> {
        self.armed.subscribe()
    }

    /// Returns whether the dispatcher is currently armed.
    pub fn is_armed(&self) -> bool {
        *self.armed.borrow()
    }

    /// Registers a new session and returns its id.
    pub fn insert(&self, connection: Arc<dyn StreamConnection>, wants_metadata: bool) -> SessionId {
        let mut inner = self.inner.lock();
        self.push(&mut inner, connection, wants_metadata)
    }

    /// Registers a new session unless `refuse` is set.
    ///
    /// The flag is read under the registry lock. A writer that sets it and
    /// then calls [`force_end_all`](Self::force_end_all) either sees this
    /// session in the drain or makes this call return `None`.
    pub fn insert_unless(
        &self,
        refuse: &AtomicBool,
        connection: Arc<dyn StreamConnection>,
        wants_metadata: bool,
    ) -> Option<SessionId> {
        let mut inner = self.inner.lock();
        if refuse.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.push(&mut inner, connection, wants_metadata))
    }

    fn push(
        &self,
        inner: &mut RegistryInner,
        connection: Arc<dyn StreamConnection>,
        wants_metadata: bool,
    ) -> SessionId {
        let session = StreamSession::new(connection, wants_metadata);
        let id = session.id;

        if wants_metadata {
            inner.icy_count += 1;
        }
        inner.sessions.push(session);
        self.active.store(inner.sessions.len(), Ordering::SeqCst);

        if inner.sessions.len() == 1 {
            log::debug!("[Stream] First listener connected, arming dispatcher");
            self.armed.send_replace(true);
        }
        id
    }

    /// Removes a session. Returns `None` if it is not registered.
    pub fn remove(&self, id: SessionId) -> Option<StreamSession> {
        let mut inner = self.inner.lock();
        let index = inner.sessions.iter().position(|s| s.id == id)?;
        let session = inner.sessions.swap_remove(index);
        if session.wants_metadata {
            inner.icy_count -= 1;
        }
        self.active.store(inner.sessions.len(), Ordering::SeqCst);

        if inner.sessions.is_empty() {
            log::debug!("[Stream] Last listener gone, disarming dispatcher");
            self.armed.send_replace(false);
        }
        Some(session)
    }

    /// Removes every session and disarms the dispatcher.
    pub fn drain(&self) -> Vec<StreamSession> {
        let mut inner = self.inner.lock();
        inner.icy_count = 0;
        self.active.store(0, Ordering::SeqCst);
        self.armed.send_replace(false);
        std::mem::take(&mut inner.sessions)
    }

    /// Drains the registry and ends every connection from the server side.
    ///
    /// Returns the number of sessions ended. Connections are ended after the
    /// lock is released; each is ended exactly once because a drained session
    /// can no longer be found by a concurrent close.
    pub fn force_end_all(&self) -> usize {
        let sessions = self.drain();
        for session in &sessions {
            log::info!(
                "[Stream] Ending session {} ({})",
                session.id,
                session.connection.peer()
            );
            session.connection.end();
        }
        sessions.len()
    }

    /// Delivers one encoded chunk to every session.
    ///
    /// Each session receives `raw` with `block` spliced in according to its
    /// own ICY counter. Plain sessions share `raw` without copying. Returns
    /// the number of sessions the chunk was handed to.
    pub fn fan_out(&self, raw: &Bytes, block: &[u8]) -> usize {
        let deliveries: Vec<(SessionId, Arc<dyn StreamConnection>, Bytes)> = {
            let mut inner = self.inner.lock();
            inner
                .sessions
                .iter_mut()
                .filter_map(|session| match icy::splice(session, raw, block) {
                    Ok(bytes) => Some((session.id, Arc::clone(&session.connection), bytes)),
                    Err(e) => {
                        log::warn!(
                            "[Stream] Skipping chunk for session {}: {}",
                            session.id,
                            e
                        );
                        None
                    }
                })
                .collect()
        };

        let mut delivered = 0;
        for (id, connection, bytes) in deliveries {
            let len = bytes.len();
            match connection.send_chunk(bytes) {
                Ok(()) => {
                    delivered += 1;
                    log::trace!("[Stream] Sent {} bytes to session {}", len, id);
                }
                // The close notification removes the session
                Err(e) => log::debug!("[Stream] Session {} not writable: {}", id, e),
            }
        }
        delivered
    }

    /// Runs `f` under the registry lock if no session is registered.
    pub fn if_empty<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.sessions.is_empty().then(f)
    }

    /// Number of sessions that asked for ICY metadata.
    pub fn icy_count(&self) -> usize {
        self.inner.lock().icy_count
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a session with this id is registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().sessions.iter().any(|s| s.id == id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
