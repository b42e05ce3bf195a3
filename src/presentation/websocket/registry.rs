//! Connection Registry
//!
//! The authoritative mapping from identity to its one live connection.
//! Insertions and removals take the write lock; fan-out iterates under the
//! read lock, so broadcasts run in parallel with each other but never
//! interleave with a mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::connection::{CloseReason, ConnectionHandle};
use crate::domain::UserId;
use crate::infrastructure::metrics;

/// How long a registration waits for the connection it replaces to close
pub const DEFAULT_EVICTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of live connections, one per identity.
pub struct Registry {
    connections: RwLock<HashMap<UserId, Arc<ConnectionHandle>>>,
    /// Per-identity registration locks so evict-then-insert is atomic for
    /// one identity without holding up the others. Entries live only while
    /// a registration for that identity is in flight.
    registrations: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
    eviction_timeout: Duration,
}

/// Held for the duration of one registration. Dropping it releases the
/// identity and removes the lock entry once nobody else is waiting on it.
struct RegistrationGuard<'a> {
    registry: &'a Registry,
    user_id: UserId,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut registrations = self.registry.registrations.lock();
        // Clones are only taken under this lock: the table's and ours.
        if Arc::strong_count(&self.lock) == 2 {
            registrations.remove(&self.user_id);
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_eviction_timeout(DEFAULT_EVICTION_TIMEOUT)
    }

    pub fn with_eviction_timeout(eviction_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registrations: Mutex::new(HashMap::new()),
            eviction_timeout,
        }
    }

    /// Register a connection for its identity.
    ///
    /// A connection already registered for the same identity is torn down
    /// and awaited until closed before the new one becomes visible.
    /// Registrations for other identities are not blocked by that wait.
    pub async fn register(&self, connection: Arc<ConnectionHandle>) {
        let user_id = connection.user_id();
        let _registration = self.lock_registration(user_id).await;

        if let Some(previous) = self.lookup(user_id) {
            self.evict(&previous, CloseReason::Replaced);

            if tokio::time::timeout(self.eviction_timeout, previous.closed())
                .await
                .is_err()
            {
                tracing::warn!(
                    user_id = user_id,
                    connection_id = %previous.id(),
                    timeout_ms = self.eviction_timeout.as_millis() as u64,
                    "Replaced connection did not close in time"
                );
            }
        }

        if !connection.activate() {
            tracing::debug!(
                user_id = user_id,
                connection_id = %connection.id(),
                "Connection closed before registration"
            );
            return;
        }

        self.connections.write().insert(user_id, Arc::clone(&connection));
        metrics::HUB_CONNECTIONS_ACTIVE.inc();

        tracing::info!(
            user_id = user_id,
            connection_id = %connection.id(),
            "Connection registered"
        );
    }

    async fn lock_registration(&self, user_id: UserId) -> RegistrationGuard<'_> {
        let lock = Arc::clone(
            self.registrations
                .lock()
                .entry(user_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        let mut registration = RegistrationGuard {
            registry: self,
            user_id,
            lock,
            guard: None,
        };
        registration.guard = Some(Arc::clone(&registration.lock).lock_owned().await);
        registration
    }

    /// Remove and close the connection for `user_id`, if any.
    ///
    /// Returns `false` when nothing was registered.
    pub fn unregister(&self, user_id: UserId) -> bool {
        match self.lookup(user_id) {
            Some(connection) => self.evict(&connection, CloseReason::Unregistered),
            None => false,
        }
    }

    /// Tear a connection down: remove its entry, close its outbound queue and
    /// stop its loops. Runs once per connection; later calls return `false`.
    ///
    /// Must not be called from inside [`Registry::for_each`] or
    /// [`Registry::for_each_connection`].
    pub fn evict(&self, connection: &ConnectionHandle, reason: CloseReason) -> bool {
        if !connection.begin_close() {
            return false;
        }

        let removed = {
            let mut connections = self.connections.write();
            match connections.get(&connection.user_id()) {
                Some(current) if current.id() == connection.id() => {
                    connections.remove(&connection.user_id());
                    true
                }
                _ => false,
            }
        };
        if removed {
            metrics::HUB_CONNECTIONS_ACTIVE.dec();
        }

        connection.close_outbound();
        connection.publish_closing();
        metrics::record_connection_closed(reason);

        if reason.is_forced() {
            tracing::warn!(
                user_id = connection.user_id(),
                connection_id = %connection.id(),
                reason = %reason,
                duration_ms = connection.uptime().num_milliseconds(),
                "Connection evicted"
            );
        } else {
            tracing::info!(
                user_id = connection.user_id(),
                connection_id = %connection.id(),
                reason = %reason,
                duration_ms = connection.uptime().num_milliseconds(),
                "Connection closing"
            );
        }

        true
    }

    pub fn lookup(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(&user_id).cloned()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.connections.read().contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Visit every registered connection under the read lock.
    pub fn for_each_connection<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<ConnectionHandle>),
    {
        for connection in self.connections.read().values() {
            f(connection);
        }
    }

    /// Visit the registered connections among `user_ids` under the read lock.
    /// Identities without a connection are skipped.
    pub fn for_each<I, F>(&self, user_ids: I, mut f: F)
    where
        I: IntoIterator<Item = UserId>,
        F: FnMut(&Arc<ConnectionHandle>),
    {
        let connections = self.connections.read();
        for user_id in user_ids {
            if let Some(connection) = connections.get(&user_id) {
                f(connection);
            }
        }
    }

    /// Close every connection. Returns how many were torn down.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut all = Vec::with_capacity(self.len());
        self.for_each_connection(|connection| all.push(Arc::clone(connection)));

        all.iter()
            .filter(|connection| self.evict(connection, reason))
            .count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
