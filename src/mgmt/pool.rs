//! Connection pool with per-key single-flight
//!
//! One live session per (address, port) key at most. Concurrent acquirers
//! of the same key serialize on that key's own lock, so exactly one
//! connect attempt happens no matter how many callers race - while
//! different keys stay fully independent (no global lock across devices).
//!
//! Eviction is eager: a watcher task subscribes to each session's close
//! channel and removes the key the moment the session reports closed, so
//! a dead handle is never served again.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::DeviceConfig;

use super::session::{Connector, ManagedSession, SessionError};

/// Pool key: the management endpoint of a device.
pub type PoolKey = (IpAddr, u16);

/// Lifecycle of a pooled handle, for logging/introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

#[derive(Default)]
struct Entry {
    session: Option<Arc<dyn ManagedSession>>,
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,

    /// Outer map guarded by a plain mutex (held only to clone the per-key
    /// lock, never across an await). The per-key `tokio::sync::Mutex` is
    /// what serializes connect attempts for one key.
    entries: StdMutex<HashMap<PoolKey, Arc<Mutex<Entry>>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            entries: StdMutex::new(HashMap::new()),
        }
    }

    fn entry_lock(&self, key: PoolKey) -> Arc<Mutex<Entry>> {
        let mut entries = self.entries.lock().expect("pool map poisoned");
        entries.entry(key).or_default().clone()
    }

    /// Get the Ready session for this device, connecting if necessary.
    ///
    /// Exactly one connect attempt happens per key even under concurrent
    /// callers; the losers of the race wait on the key lock and then find
    /// the fresh session. On timeout or error nothing is cached, and the
    /// cancelled connect future drops any partially-opened socket.
    pub async fn acquire(
        self: &Arc<Self>,
        device: &DeviceConfig,
    ) -> Result<Arc<dyn ManagedSession>, SessionError> {
        let key = device.endpoint();
        let entry_lock = self.entry_lock(key);
        let mut entry = entry_lock.lock().await;

        if let Some(session) = &entry.session {
            if !*session.closed().borrow() {
                trace!("pool: {key:?} state {:?}, reusing", ConnState::Ready);
                return Ok(session.clone());
            }
            // Closed under us before the watcher ran - drop it now.
            entry.session = None;
        }

        trace!("pool: {key:?} state {:?}", ConnState::Connecting);

        let session = match timeout(self.connect_timeout, self.connector.connect(device)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                debug!("pool: {key:?} state {:?}: {e}", ConnState::Failed);
                return Err(e);
            }
            Err(_) => {
                debug!("pool: {key:?} state {:?}: timeout", ConnState::Failed);
                return Err(SessionError::Timeout);
            }
        };

        entry.session = Some(session.clone());
        debug!("pool: {key:?} state {:?}", ConnState::Ready);

        // An eviction may have raced us and dropped the key while we were
        // connecting; make sure the map points at this entry again.
        {
            let mut entries = self.entries.lock().expect("pool map poisoned");
            entries.insert(key, entry_lock.clone());
        }

        self.watch_session(key, &session);

        Ok(session)
    }

    /// Spawn the close observer that evicts the key once the session
    /// signals closed.
    fn watch_session(self: &Arc<Self>, key: PoolKey, session: &Arc<dyn ManagedSession>) {
        let mut closed = session.closed();
        let pool: Weak<ConnectionPool> = Arc::downgrade(self);
        let session = session.clone();

        tokio::spawn(async move {
            loop {
                if *closed.borrow() {
                    break;
                }
                if closed.changed().await.is_err() {
                    // Session dropped entirely; evict anyway.
                    break;
                }
            }

            if let Some(pool) = pool.upgrade() {
                warn!("pool: session for {key:?} reported closed, evicting");
                pool.evict_session(key, &session).await;
            }
        });
    }

    /// Evict `key` only while it still holds this exact session. A stale
    /// watcher firing after the key was reconnected must not tear down
    /// the replacement session.
    async fn evict_session(&self, key: PoolKey, session: &Arc<dyn ManagedSession>) {
        let entry_lock = {
            let entries = self.entries.lock().expect("pool map poisoned");
            entries.get(&key).cloned()
        };

        let Some(entry_lock) = entry_lock else {
            return;
        };

        let mut entry = entry_lock.lock().await;
        let current = entry
            .session
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if current {
            entry.session = None;
            let mut entries = self.entries.lock().expect("pool map poisoned");
            entries.remove(&key);
        }
    }

    /// Close the key's session, if any, and remove the key. The next
    /// acquire for the key reconnects from scratch.
    ///
    /// The key's lock stays in the map until it is held here, so an
    /// acquire already connecting under it serializes with the eviction
    /// instead of racing a second connect on a fresh lock.
    pub async fn evict(&self, key: PoolKey) {
        let entry_lock = {
            let entries = self.entries.lock().expect("pool map poisoned");
            entries.get(&key).cloned()
        };

        if let Some(entry_lock) = entry_lock {
            let mut entry = entry_lock.lock().await;
            if let Some(session) = entry.session.take() {
                session.close().await;
                trace!("pool: {key:?} state {:?}", ConnState::Disconnected);
            }

            // Drop the key only while it still maps to this entry; a
            // replacement inserted meanwhile must survive.
            let mut entries = self.entries.lock().expect("pool map poisoned");
            if entries
                .get(&key)
                .is_some_and(|e| Arc::ptr_eq(e, &entry_lock))
            {
                entries.remove(&key);
            }
        }
    }

    /// Whether a (possibly stale) entry exists for this key.
    pub fn contains(&self, key: &PoolKey) -> bool {
        self.entries
            .lock()
            .expect("pool map poisoned")
            .contains_key(key)
    }
}
