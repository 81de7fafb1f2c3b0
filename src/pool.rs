//! A lazily-connecting pool of connections, routed by a stable hash of the
//! key rather than a single shared connection. Grounded on the client/server
//! pairing idiom of selecting a backend by key before delegating the
//! operation to it, simplified to a single address with `N` local slots
//! instead of a consistent-hash ring across distinct servers.
use crate::connection::Connection;
use crate::error::{Error, Result};

use smol::lock::Mutex;
use smol::Timer;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A pool of up to `max_connections` lazily-opened connections to a single
/// memcached address, with per-key slot routing and dead-connection
/// replacement.
pub struct Pool {
    addr: SocketAddr,
    default_timeout: Duration,
    slots: Vec<Mutex<Option<Arc<Connection>>>>,
}

impl Pool {
    /// Build a pool that opens connections on first use. `default_timeout`
    /// bounds how long [`Pool::close`] waits for each connection to drain.
    pub fn connect(addr: SocketAddr, max_connections: usize, default_timeout: Duration) -> Self {
        assert!(max_connections > 0, "pool needs at least one connection slot");
        let slots = (0..max_connections).map(|_| Mutex::new(None)).collect();
        Self {
            addr,
            default_timeout,
            slots,
        }
    }

    /// Deterministic, non-consistent routing: an empty key round-robins via
    /// `fastrand`, a non-empty key hashes modulo the slot count. Neither
    /// survives a change in `max_connections` without reshuffling every
    /// key's slot. This pool targets one address, not a resizable
    /// multi-node cluster.
    fn slot_for(&self, key: &[u8]) -> usize {
        if self.slots.len() == 1 {
            return 0;
        }
        if key.is_empty() {
            return fastrand::usize(..self.slots.len());
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    async fn connection_for(&self, slot_idx: usize) -> Result<Arc<Connection>> {
        let mut guard = self.slots[slot_idx].lock().await;
        if let Some(conn) = &*guard {
            if !conn.is_terminal() {
                return Ok(conn.clone());
            }
        }
        let conn = Arc::new(Connection::connect(self.addr).await?);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Route `key` to a connection and run `op` against it. On a dead or
    /// closed connection (a terminal or closed error), the slot is dropped
    /// and reconnected once before giving up.
    pub async fn call<F, Fut, T>(&self, key: &[u8], op: F) -> Result<T>
    where
        F: Fn(&Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot_idx = self.slot_for(key);
        const MAX_ATTEMPTS: u32 = 2;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let conn = self.connection_for(slot_idx).await?;
            match op(&conn).await {
                Err(Error::Terminal(_)) | Err(Error::Closed) if attempt < MAX_ATTEMPTS => {
                    let mut guard = self.slots[slot_idx].lock().await;
                    if let Some(existing) = &*guard {
                        if Arc::ptr_eq(existing, &conn) {
                            *guard = None;
                        }
                    }
                    continue;
                }
                result => return result,
            }
        }
    }

    /// Send `quit` on every open connection, waiting up to
    /// `default_timeout` per connection, then drop every slot.
    pub async fn close(&self) {
        for slot in &self.slots {
            let mut guard = slot.lock().await;
            if let Some(conn) = guard.take() {
                let default_timeout = self.default_timeout;
                let _ = futures_lite::future::or(
                    async move {
                        let _ = conn.close().await;
                    },
                    async move {
                        Timer::after(default_timeout).await;
                    },
                )
                .await;
            }
        }
    }
}
