//! One-shot reply waits for `async_emit`.
//!
//! Each wait is registered under a correlation id (or, for legacy peers
//! that cannot echo ids, the event name) and removed when its guard drops,
//! whether the reply arrived, the deadline passed or the caller gave up.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use skein_core::Frame;
use tokio::sync::oneshot;

use crate::errors::ClientError;

/// What a reply is matched on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// Correlation id echoed by the server.
    Id(i64),
    /// Event name, for legacy frames without ids.
    Event(String),
}

#[derive(Debug)]
struct Waiter {
    serial: u64,
    tx: oneshot::Sender<Frame>,
}

/// Table of outstanding reply waits.
#[derive(Debug)]
pub struct PendingReplies {
    waiters: DashMap<PendingKey, Waiter>,
    next_id: AtomicI64,
    serial: AtomicU64,
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self {
            waiters: DashMap::new(),
            next_id: AtomicI64::new(1),
            serial: AtomicU64::new(0),
        }
    }
}

/// Removes its own registration on drop, leaving any later wait under the
/// same key alone.
#[derive(Debug)]
pub struct PendingGuard<'a> {
    table: &'a PendingReplies,
    key: PendingKey,
    serial: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .table
            .waiters
            .remove_if(&self.key, |_, waiter| waiter.serial == self.serial);
    }
}

impl PendingReplies {
    /// Fresh non-zero correlation id.
    pub fn next_id(&self) -> i64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id > 0 {
                return id;
            }
            self.next_id.store(1, Ordering::Relaxed);
        }
    }

    /// Register a wait under `key`.
    pub fn register(
        &self,
        key: PendingKey,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<Frame>), ClientError> {
        let (tx, rx) = oneshot::channel();
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        match self.waiters.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(ClientError::ReplyPending(match key {
                    PendingKey::Event(event) => event,
                    PendingKey::Id(id) => id.to_string(),
                }));
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(Waiter { serial, tx });
            }
        }
        Ok((
            PendingGuard {
                table: self,
                key,
                serial,
            },
            rx,
        ))
    }

    /// Hand `frame` to the wait it answers. Returns the frame back when no
    /// wait matches.
    pub fn resolve(&self, frame: Frame) -> Result<(), Frame> {
        let key = if frame.id != 0 && self.waiters.contains_key(&PendingKey::Id(frame.id)) {
            PendingKey::Id(frame.id)
        } else {
            PendingKey::Event(frame.event().into_owned())
        };
        match self.waiters.remove(&key) {
            Some((_, waiter)) => waiter.tx.send(frame),
            None => Err(frame),
        }
    }

    /// Number of outstanding waits.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no wait is outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Fail every outstanding wait.
    pub fn clear(&self) {
        self.waiters.clear();
    }
}
