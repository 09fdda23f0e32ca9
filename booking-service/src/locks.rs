//! Single-writer-per-key primitive.
//!
//! Every mutating operation on an event runs while holding that event's slot.
//! Slots are fair (waiters are served in arrival order), waiting is bounded
//! by a timeout, and a slot is dropped from the table once nobody holds or
//! waits for it. Different events never share a slot.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("event {event_id} stayed locked for more than {waited:?}")]
pub struct LockTimeout {
    pub event_id: Uuid,
    pub waited: Duration,
}

type Slots = DashMap<Uuid, Arc<Mutex<()>>>;

#[derive(Debug, Clone)]
pub struct EventLocks {
    slots: Arc<Slots>,
    timeout: Duration,
}

impl EventLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub async fn acquire(&self, event_id: Uuid) -> Result<EventLockGuard, LockTimeout> {
        let slot = self
            .slots
            .entry(event_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(EventLockGuard {
                event_id,
                guard: Some(guard),
                slots: Arc::clone(&self.slots),
            }),
            Err(_) => {
                self.reclaim(event_id);
                Err(LockTimeout {
                    event_id,
                    waited: self.timeout,
                })
            }
        }
    }

    /// Number of events with a live slot.
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    fn reclaim(&self, event_id: Uuid) {
        reclaim(&self.slots, event_id);
    }
}

fn reclaim(slots: &Slots, event_id: Uuid) {
    // Only the table itself references an idle slot.
    slots.remove_if(&event_id, |_, slot| Arc::strong_count(slot) == 1);
}

/// Exclusive hold on one event; released on drop.
#[derive(Debug)]
pub struct EventLockGuard {
    event_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Slots>,
}

impl EventLockGuard {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }
}

impl Drop for EventLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        reclaim(&self.slots, self.event_id);
    }
}
