//! Live connection tracking, admission control and ttl eviction.
//!
//! One [`ConnectionRegistry`] exists per server. It owns the authoritative
//! map of live connections keyed by slot index, enforces the concurrency
//! ceiling at admission time, and evicts connections past their ttl when
//! the server's sweep timer fires.
//!
//! Admission hands out a [`ConnectionPermit`]: an RAII guard that
//! deregisters its slot on drop. The permit carries a cancellation token
//! standing in for the socket's destroy primitive; the sweep cancels it to
//! make the owning connection task drop its socket. Exactly one of the two
//! (permit drop or sweep) removes the entry for any given connection.
//!
//! All three mutators (admit, release, sweep) serialize on one mutex and
//! each critical section is a single step, so no rollback is ever needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

pub mod slot;

use slot::{SlotAllocator, SlotsExhausted};

/// Why a connection was refused at admission. Either way the socket is
/// destroyed without a response; the client sees an abrupt close.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("connection ceiling reached, live connections: {count}")]
    CeilingExceeded { count: usize },

    #[error(transparent)]
    SlotsExhausted(#[from] SlotsExhausted),
}

/// A tracked connection: when it arrived, and the handle to destroy it.
#[derive(Debug)]
pub struct ConnectionEntry {
    created: Instant,
    token: CancellationToken,
}

impl ConnectionEntry {
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

#[derive(Debug)]
struct RegistryInner {
    allocator: SlotAllocator,
    clients: HashMap<u32, ConnectionEntry>,
    count: usize,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    max_connections: usize,
    ttl: Duration,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_connections,
            ttl,
            inner: Mutex::new(RegistryInner { allocator: SlotAllocator::new(), clients: HashMap::new(), count: 0 }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admits a new connection, or rejects it when the registry is full.
    ///
    /// The ceiling check is `count >= max_connections`: with a ceiling of N,
    /// connection N+1 is the first one rejected.
    pub fn admit(self: &Arc<Self>) -> Result<ConnectionPermit, AdmitError> {
        let mut inner = self.lock();

        if inner.count >= self.max_connections {
            error!(count = inner.count, max_connections = self.max_connections, "connection ceiling reached");
            return Err(AdmitError::CeilingExceeded { count: inner.count });
        }

        let RegistryInner { allocator, clients, count } = &mut *inner;
        let index = allocator.allocate(|candidate| clients.contains_key(&candidate)).inspect_err(|e| {
            error!(cause = %e, "slot allocation failed, rejecting connection");
        })?;

        let token = CancellationToken::new();
        clients.insert(index, ConnectionEntry { created: Instant::now(), token: token.clone() });
        *count += 1;
        trace!(index, count = *count, "connection admitted");

        Ok(ConnectionPermit { index, token, registry: Arc::downgrade(self) })
    }

    /// Deregisters a slot, if the sweep has not already evicted it.
    fn release(&self, index: u32) {
        let mut inner = self.lock();
        if inner.clients.remove(&index).is_some() {
            inner.count -= 1;
            trace!(index, count = inner.count, "connection released");
        }
    }

    /// Evicts every connection the predicate rejects, cancelling its token
    /// and deregistering it. With no predicate, evicts everything.
    pub fn sweep(&self, predicate: Option<&dyn Fn(&ConnectionEntry) -> bool>) {
        let mut inner = self.lock();

        let doomed: Vec<u32> = inner
            .clients
            .iter()
            .filter(|(_, entry)| predicate.is_none_or(|keep| !keep(entry)))
            .map(|(index, _)| *index)
            .collect();

        for index in doomed {
            if let Some(entry) = inner.clients.remove(&index) {
                entry.token.cancel();
                inner.count -= 1;
                info!(index, age = ?entry.age(), count = inner.count, "connection evicted");
            }
        }
    }

    /// The ttl sweep: keeps connections younger than the configured ttl.
    pub fn sweep_expired(&self) {
        self.sweep(Some(&|entry: &ConnectionEntry| entry.age() < self.ttl));
    }

    /// The maintained live-connection counter.
    pub fn count(&self) -> usize {
        self.lock().count
    }

    /// The number of tracked entries. Always equals [`Self::count`].
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// RAII admission guard for one connection.
///
/// Dropping the permit deregisters the slot (the connection's close path).
/// The token is cancelled by the sweep when the connection outlives its
/// ttl; the task holding the permit must stop and drop its socket then.
#[derive(Debug)]
pub struct ConnectionPermit {
    index: u32,
    token: CancellationToken,
    registry: Weak<ConnectionRegistry>,
}

impl ConnectionPermit {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.index);
        }
    }
}
