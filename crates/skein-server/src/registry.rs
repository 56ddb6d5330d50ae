//! Connection table and id allocation.
//!
//! All mutation goes through one mutex; writes never hold it. `push` clones
//! the connection out of the table, releases the lock, then waits on that
//! connection's own write lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use parking_lot::Mutex;
use skein_core::{BoxSink, Codec, WireMessage};
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionId};
use crate::errors::{PushError, RegistryError};
use crate::metrics::PUSH_FAILURES_TOTAL;

/// Default per-push write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

struct Table {
    next_id: ConnectionId,
    max_id: ConnectionId,
    conns: HashMap<ConnectionId, Arc<Connection>>,
}

impl Table {
    /// Advance the wrapping counter, skipping 0. On collision fall back to
    /// the lowest free id.
    fn allocate(&mut self) -> Option<ConnectionId> {
        if self.conns.len() >= self.max_id as usize {
            return None;
        }
        let mut candidate = self.next_id.wrapping_add(1);
        if candidate == 0 || candidate > self.max_id {
            candidate = 1;
        }
        self.next_id = candidate;
        if !self.conns.contains_key(&candidate) {
            return Some(candidate);
        }
        (1..=self.max_id).find(|id| !self.conns.contains_key(id))
    }
}

/// Live connections of one server.
pub struct ConnectionRegistry {
    table: Mutex<Table>,
    write_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl ConnectionRegistry {
    /// Registry using the full `u32` id space.
    pub fn new(write_timeout: Duration) -> Self {
        Self::with_max_id(ConnectionId::MAX, write_timeout)
    }

    /// Registry whose ids run from 1 to `max_id`.
    pub fn with_max_id(max_id: ConnectionId, write_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: 0,
                max_id: max_id.max(1),
                conns: HashMap::new(),
            }),
            write_timeout,
        }
    }

    /// Per-push write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Register a new connection around `sink` and assign it an id.
    pub fn open(
        &self,
        sink: BoxSink,
        peer: Option<SocketAddr>,
        codec: Codec,
    ) -> Result<Arc<Connection>, RegistryError> {
        let mut table = self.table.lock();
        let Some(id) = table.allocate() else {
            error!(live = table.conns.len(), "connections overflow");
            return Err(RegistryError::Exhausted(table.max_id));
        };
        let conn = Arc::new(Connection::new(id, sink, peer, codec));
        let _ = table.conns.insert(id, Arc::clone(&conn));
        debug!(conn_id = id, ?peer, live = table.conns.len(), "connection registered");
        Ok(conn)
    }

    /// Unregister `id`. Closing an unknown or already closed id is a no-op.
    pub fn close(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.table.lock().conns.remove(&id);
        if removed.is_some() {
            debug!(conn_id = id, "connection unregistered");
        }
        removed
    }

    /// Look up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.table.lock().conns.get(&id).cloned()
    }

    /// Snapshot of every live connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.table.lock().conns.values().cloned().collect()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.table.lock().conns.len()
    }

    /// Write `message` to connection `id` and return the write's outcome.
    pub async fn push(&self, id: ConnectionId, message: WireMessage) -> Result<(), PushError> {
        let Some(conn) = self.get(id) else {
            counter!(PUSH_FAILURES_TOTAL, "reason" => "not_found").increment(1);
            return Err(PushError::NotFound(id));
        };
        let result = conn.write(message, self.write_timeout).await;
        if result.is_err() {
            counter!(PUSH_FAILURES_TOTAL, "reason" => "write").increment(1);
        }
        result
    }

    /// Encode a data frame with the destination's negotiated codec and push it.
    pub async fn push_event(
        &self,
        id: ConnectionId,
        correlation: i64,
        event: &str,
        body: &[u8],
    ) -> Result<(), PushError> {
        let Some(conn) = self.get(id) else {
            counter!(PUSH_FAILURES_TOTAL, "reason" => "not_found").increment(1);
            return Err(PushError::NotFound(id));
        };
        let message = conn.codec().data(correlation, event, body)?;
        let result = conn.write(message, self.write_timeout).await;
        if result.is_err() {
            counter!(PUSH_FAILURES_TOTAL, "reason" => "write").increment(1);
        }
        result
    }

    /// Push an event to every live connection concurrently.
    ///
    /// Returns how many deliveries succeeded; failures are logged.
    pub async fn emit_all(&self, event: &str, body: &[u8]) -> usize {
        let conns = self.all();
        let results = join_all(
            conns
                .iter()
                .map(|conn| self.push_event(conn.id(), 0, event, body)),
        )
        .await;
        let mut delivered = 0;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(event, error = %e, "broadcast delivery failed"),
            }
        }
        delivered
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use skein_core::transport::memory;
    use skein_core::{Frame, MessageSource};

    fn sink() -> (BoxSink, memory::Endpoint) {
        let (local, remote) = memory::pair(16);
        (Box::new(local.sink), remote)
    }

    fn open(reg: &ConnectionRegistry) -> (Arc<Connection>, memory::Endpoint) {
        let (s, remote) = sink();
        (reg.open(s, None, Codec::current()).unwrap(), remote)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let reg = ConnectionRegistry::default();
        let (a, _ra) = open(&reg);
        let (b, _rb) = open(&reg);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn counter_wraps_and_skips_zero() {
        let reg = ConnectionRegistry::with_max_id(3, DEFAULT_WRITE_TIMEOUT);
        let mut ids = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (c, r) = open(&reg);
            ids.push(c.id());
            keep.push(r);
        }
        assert_eq!(ids, vec![1, 2, 3]);
        let _ = reg.close(1);
        let (c, _r) = open(&reg);
        assert_eq!(c.id(), 1);
    }

    #[test]
    fn collision_takes_lowest_free_id() {
        let reg = ConnectionRegistry::with_max_id(4, DEFAULT_WRITE_TIMEOUT);
        let opened: Vec<_> = (0..4).map(|_| open(&reg)).collect();
        let _ = reg.close(3);
        let _ = reg.close(2);
        // counter wraps to 1, which is live; lowest free is 2
        let (c, _r) = open(&reg);
        assert_eq!(c.id(), 2);
        drop(opened);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let reg = ConnectionRegistry::with_max_id(2, DEFAULT_WRITE_TIMEOUT);
        let _a = open(&reg);
        let _b = open(&reg);
        let (s, _r) = sink();
        assert_matches!(
            reg.open(s, None, Codec::current()),
            Err(RegistryError::Exhausted(2))
        );
    }

    #[test]
    fn never_yields_live_id() {
        let reg = ConnectionRegistry::with_max_id(16, DEFAULT_WRITE_TIMEOUT);
        let mut live: HashMap<ConnectionId, memory::Endpoint> = HashMap::new();
        for round in 0..200u32 {
            if round % 3 == 2 {
                let victim = *live.keys().min().unwrap();
                let _ = live.remove(&victim);
                let _ = reg.close(victim);
            }
            if live.len() < 16 {
                let (c, r) = open(&reg);
                assert_ne!(c.id(), 0);
                assert!(!live.contains_key(&c.id()));
                let _ = live.insert(c.id(), r);
            }
        }
    }

    #[test]
    fn close_is_idempotent() {
        let reg = ConnectionRegistry::default();
        let (c, _r) = open(&reg);
        assert!(reg.close(c.id()).is_some());
        assert!(reg.close(c.id()).is_none());
        assert!(reg.get(c.id()).is_none());
        assert_eq!(reg.count(), 0);
    }

    #[tokio::test]
    async fn push_to_unknown_id_fails_fast() {
        let reg = ConnectionRegistry::default();
        assert_matches!(
            reg.push(99, WireMessage::Close).await,
            Err(PushError::NotFound(99))
        );
    }

    #[tokio::test]
    async fn push_returns_write_error() {
        let reg = ConnectionRegistry::default();
        let (c, remote) = open(&reg);
        drop(remote);
        assert_matches!(
            reg.push(c.id(), WireMessage::Close).await,
            Err(PushError::Transport { .. })
        );
    }

    #[tokio::test]
    async fn push_event_encodes_frame() {
        let reg = ConnectionRegistry::default();
        let (c, mut remote) = open(&reg);
        reg.push_event(c.id(), 11, "chat.msg", b"hey").await.unwrap();
        let WireMessage::Binary(bytes) = remote.source.recv().await.unwrap().unwrap() else {
            panic!("expected binary");
        };
        let frame = Frame::decode(bytes).unwrap();
        assert_eq!(frame.id, 11);
        assert_eq!(frame.event(), "chat.msg");
    }

    #[tokio::test]
    async fn concurrent_pushes_are_all_delivered() {
        let reg = Arc::new(ConnectionRegistry::default());
        let (c, mut remote) = open(&reg);
        let mut tasks = Vec::new();
        for i in 0..8i64 {
            let reg = Arc::clone(&reg);
            let id = c.id();
            tasks.push(tokio::spawn(async move {
                reg.push_event(id, i, "n", b"").await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..8 {
            let WireMessage::Binary(b) = remote.source.recv().await.unwrap().unwrap() else {
                panic!("expected binary");
            };
            seen.push(Frame::decode(b).unwrap().id);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn emit_all_counts_successes() {
        let reg = ConnectionRegistry::default();
        let (_a, mut ra) = open(&reg);
        let (_b, rb) = open(&reg);
        drop(rb);
        assert_eq!(reg.emit_all("news", b"!").await, 1);
        assert!(ra.source.recv().await.is_some());
    }
}
