//! Stateful transport sessions.
//!
//! A session is created by the SSE stream open or by a streamable
//! `initialize`, and lives until it is removed explicitly, its SSE stream
//! ends, or it sits idle past the configured timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::JsonRpcNotification;

/// Buffered outbound messages per session.
const OUTBOUND_BUFFER: usize = 64;

pub type SessionHandle = Arc<Session>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Session {
    id: String,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    last_seen: Mutex<Instant>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            outbound: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    /// Attaches the server-to-client stream.
    ///
    /// Returns `None` while another stream is still attached.
    pub fn attach(&self) -> Option<mpsc::Receiver<String>> {
        let mut outbound = lock(&self.outbound);
        if outbound.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        *outbound = Some(tx);
        self.touch();
        Some(rx)
    }

    pub fn has_stream(&self) -> bool {
        lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Drops the outbound sender, ending any attached stream.
    pub fn detach(&self) {
        lock(&self.outbound).take();
        self.touch();
    }

    /// Queues a message on the attached stream.
    ///
    /// Returns `false` when no stream is attached or it has gone away.
    pub async fn send<T: Serialize>(&self, message: &T) -> bool {
        let Some(tx) = lock(&self.outbound).clone() else {
            return false;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "failed to encode outbound message");
                return false;
            }
        };
        tx.send(text).await.is_ok()
    }

    /// Sends a server-initiated notification to the client.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> bool {
        self.send(&JsonRpcNotification::new(method, params)).await
    }
}

/// All live sessions of one provider.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    idle_timeout: Option<Duration>,
}

impl SessionStore {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Issues a new session with a fresh UUID v4 identifier.
    pub fn create(&self) -> SessionHandle {
        let session = Arc::new(Session::new(uuid::Uuid::new_v4().to_string()));
        lock(&self.sessions).insert(session.id.clone(), session.clone());
        tracing::info!(session = %session.id, "session opened");
        session
    }

    /// Looks up a live session and marks it as used.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let session = lock(&self.sessions).get(id).cloned()?;
        if self.is_expired(&session) {
            self.remove(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = lock(&self.sessions).remove(id);
        match removed {
            Some(session) => {
                session.detach();
                tracing::info!(session = %id, "session closed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions with a live stream never expire; keep-alives police those.
    fn is_expired(&self, session: &Session) -> bool {
        !session.has_stream()
            && self
                .idle_timeout
                .is_some_and(|timeout| session.idle_for() >= timeout)
    }

    /// Removes sessions idle past the timeout; returns how many went.
    pub fn reap_idle(&self) -> usize {
        let expired: Vec<String> = lock(&self.sessions)
            .values()
            .filter(|s| self.is_expired(s))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            tracing::debug!(session = %id, "session idle timeout");
            self.remove(id);
        }
        expired.len()
    }

    /// Periodically reaps idle sessions until the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let timeout = self.idle_timeout?;
        let period = (timeout / 4).max(Duration::from_secs(1));
        let store: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else { break };
                store.reap_idle();
            }
        }))
    }
}

/// Restarts the idle clock of a session when its stream is dropped.
pub(crate) struct StreamLease(SessionHandle);

impl StreamLease {
    pub(crate) fn new(session: SessionHandle) -> Self {
        Self(session)
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.0.touch();
    }
}

/// Removes a session when the stream holding it is dropped.
pub(crate) struct SessionGuard {
    store: Arc<SessionStore>,
    id: String,
}

impl SessionGuard {
    pub(crate) fn new(store: Arc<SessionStore>, id: String) -> Self {
        Self { store, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.store.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_get_remove() {
        let store = SessionStore::new(None);
        let session = store.create();
        assert!(uuid::Uuid::parse_str(session.id()).is_ok());
        assert!(store.get(session.id()).is_some());
        assert!(store.remove(session.id()));
        assert!(store.get(session.id()).is_none());
        assert!(!store.remove(session.id()));
    }

    #[test]
    fn test_ids_are_unique() {
        let store = SessionStore::new(None);
        let a = store.create();
        let b = store.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_idle_sessions_are_reaped() {
        let store = SessionStore::new(Some(Duration::ZERO));
        let session = store.create();
        assert_eq!(store.reap_idle(), 1);
        assert!(store.is_empty());
        assert!(store.get(session.id()).is_none());
    }

    #[tokio::test]
    async fn test_single_attached_stream() {
        let store = SessionStore::new(None);
        let session = store.create();
        assert!(!session.send(&json!({"x": 1})).await);

        let mut rx = session.attach().unwrap();
        assert!(session.attach().is_none());
        assert!(session.notify("notifications/progress", None).await);
        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "notifications/progress");

        drop(rx);
        assert!(!session.has_stream());
        assert!(session.attach().is_some());
    }

    #[tokio::test]
    async fn test_removal_ends_the_stream() {
        let store = SessionStore::new(None);
        let session = store.create();
        let mut rx = session.attach().unwrap();
        store.remove(session.id());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_attached_stream_survives_reaping() {
        let store = SessionStore::new(Some(Duration::ZERO));
        let session = store.create();
        let rx = session.attach().unwrap();
        assert_eq!(store.reap_idle(), 0);
        assert!(store.get(session.id()).is_some());

        drop(rx);
        assert_eq!(store.reap_idle(), 1);
        assert!(store.get(session.id()).is_none());
    }

    #[test]
    fn test_lease_restarts_idle_clock() {
        let store = SessionStore::new(None);
        let session = store.create();
        std::thread::sleep(Duration::from_millis(20));
        drop(StreamLease::new(session.clone()));
        assert!(session.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let store = Arc::new(SessionStore::new(None));
        let session = store.create();
        drop(SessionGuard::new(store.clone(), session.id().to_string()));
        assert!(store.is_empty());
    }
}
