use async_trait::async_trait;
use parking_lot::RwLock;
use shared::{Booking, BookingStatus, Event};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{BookingStore, NewBooking, NewEvent, StoreError, StoreTx};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    bookings: HashMap<Uuid, Booking>,
}

/// In-process store. Transactions stage their writes and apply them on
/// commit; exclusive access per event comes from the manager's
/// [`EventLocks`](crate::locks::EventLocks), not from this store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    next_seq: Arc<AtomicI64>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with [`StoreError::Unavailable`].
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn event(&self, event_id: Uuid) -> Option<Event> {
        self.tables.read().events.get(&event_id).cloned()
    }

    fn sorted_bookings(tables: &Tables, event_id: Uuid) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect();
        bookings.sort_by_key(Booking::fifo_key);
        bookings
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            events: HashMap::new(),
            bookings: HashMap::new(),
            deleted: HashSet::new(),
        }))
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.read().bookings.get(&booking_id).cloned())
    }

    async fn event_snapshot(&self, event_id: Uuid) -> Result<Option<(Event, i64)>, StoreError> {
        let tables = self.tables.read();
        let Some(event) = tables.events.get(&event_id).cloned() else {
            return Ok(None);
        };
        let waiting = tables
            .bookings
            .values()
            .filter(|b| b.event_id == event_id && b.status == BookingStatus::Waiting)
            .count();
        Ok(Some((event, waiting as i64)))
    }

    async fn bookings_for_event(&self, event_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(Self::sorted_bookings(&self.tables.read(), event_id))
    }
}

struct MemoryTx {
    store: MemoryStore,
    events: HashMap<Uuid, Event>,
    bookings: HashMap<Uuid, Booking>,
    deleted: HashSet<Uuid>,
}

impl MemoryTx {
    fn event(&self, event_id: Uuid) -> Option<Event> {
        self.events
            .get(&event_id)
            .cloned()
            .or_else(|| self.store.event(event_id))
    }

    fn booking(&self, booking_id: Uuid) -> Option<Booking> {
        if self.deleted.contains(&booking_id) {
            return None;
        }
        self.bookings
            .get(&booking_id)
            .cloned()
            .or_else(|| self.store.tables.read().bookings.get(&booking_id).cloned())
    }

    /// Bookings of the event as this transaction sees them.
    fn visible_bookings(&self, event_id: Uuid) -> Vec<Booking> {
        let tables = self.store.tables.read();
        let committed = tables.bookings.values().filter(|b| {
            b.event_id == event_id && !self.deleted.contains(&b.id) && !self.bookings.contains_key(&b.id)
        });
        let staged = self.bookings.values().filter(|b| b.event_id == event_id);
        committed.chain(staged).cloned().collect()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError> {
        if event.total_tickets <= 0 {
            return Err(StoreError::Constraint(format!(
                "total_tickets must be positive, got {}",
                event.total_tickets
            )));
        }
        if self.event(event.id).is_some() {
            return Err(StoreError::Constraint(format!("duplicate event id {}", event.id)));
        }
        let row = Event {
            id: event.id,
            name: event.name.clone(),
            total_tickets: event.total_tickets,
            available_tickets: event.total_tickets,
            created_at: chrono::Utc::now(),
        };
        self.events.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_event(
        &mut self,
        event_id: Uuid,
        _timeout: Duration,
    ) -> Result<Option<Event>, StoreError> {
        Ok(self.event(event_id))
    }

    async fn set_available_tickets(&mut self, event_id: Uuid, available: i32) -> Result<(), StoreError> {
        let mut event = self
            .event(event_id)
            .ok_or_else(|| StoreError::Constraint(format!("event {} does not exist", event_id)))?;
        if available < 0 || available > event.total_tickets {
            return Err(StoreError::Constraint(format!(
                "available_tickets {} outside 0..={} for event {}",
                available, event.total_tickets, event_id
            )));
        }
        event.available_tickets = available;
        self.events.insert(event_id, event);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError> {
        if self.event(booking.event_id).is_none() {
            return Err(StoreError::Constraint(format!(
                "booking references unknown event {}",
                booking.event_id
            )));
        }
        if self.booking(booking.id).is_some() {
            return Err(StoreError::Constraint(format!("duplicate booking id {}", booking.id)));
        }
        let row = Booking {
            id: booking.id,
            event_id: booking.event_id,
            user_id: booking.user_id.clone(),
            status: booking.status,
            seq: self.store.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
            created_at: booking.created_at,
        };
        self.deleted.remove(&row.id);
        self.bookings.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.booking(booking_id))
    }

    async fn delete_booking(&mut self, booking_id: Uuid) -> Result<(), StoreError> {
        self.bookings.remove(&booking_id);
        self.deleted.insert(booking_id);
        Ok(())
    }

    async fn set_booking_status(&mut self, booking_id: Uuid, status: BookingStatus) -> Result<(), StoreError> {
        let mut booking = self
            .booking(booking_id)
            .ok_or_else(|| StoreError::Constraint(format!("booking {} does not exist", booking_id)))?;
        booking.status = status;
        self.bookings.insert(booking_id, booking);
        Ok(())
    }

    async fn earliest_waiting(&mut self, event_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .visible_bookings(event_id)
            .into_iter()
            .filter(|b| b.status == BookingStatus::Waiting)
            .min_by_key(Booking::fifo_key))
    }

    async fn count_waiting(&mut self, event_id: Uuid) -> Result<i64, StoreError> {
        let waiting = self
            .visible_bookings(event_id)
            .iter()
            .filter(|b| b.status == BookingStatus::Waiting)
            .count();
        Ok(waiting as i64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let failing = &self.store.failing_commits;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let MemoryTx {
            store,
            events,
            bookings,
            deleted,
        } = *self;
        let mut tables = store.tables.write();
        tables.events.extend(events);
        for id in deleted {
            tables.bookings.remove(&id);
        }
        tables.bookings.extend(bookings);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
