//! Durable store for events and bookings.
//!
//! The inventory manager only talks to [`BookingStore`] and the transaction
//! handle it hands out, [`StoreTx`]. A transaction that is neither committed
//! nor rolled back leaves no visible state behind.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{run_migrations, DbPool, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Booking, BookingStatus, Event};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock on event {0} not acquired in time")]
    LockTimeout(Uuid),

    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_)
                | StoreError::Serialization(_)
                | StoreError::Pool(_)
                | StoreError::Unavailable(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Uuid,
    pub name: String,
    pub total_tickets: i32,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Event row together with its waiting-list size, read from one snapshot.
    async fn event_snapshot(&self, event_id: Uuid) -> Result<Option<(Event, i64)>, StoreError>;

    /// All bookings of an event in FIFO order.
    async fn bookings_for_event(&self, event_id: Uuid) -> Result<Vec<Booking>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError>;

    /// Loads the event and holds its row exclusively until commit or rollback.
    async fn lock_event(
        &mut self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<Event>, StoreError>;

    async fn set_available_tickets(&mut self, event_id: Uuid, available: i32) -> Result<(), StoreError>;

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError>;

    async fn find_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn delete_booking(&mut self, booking_id: Uuid) -> Result<(), StoreError>;

    async fn set_booking_status(&mut self, booking_id: Uuid, status: BookingStatus) -> Result<(), StoreError>;

    /// Earliest WAITING booking of the event by insertion sequence.
    async fn earliest_waiting(&mut self, event_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn count_waiting(&mut self, event_id: Uuid) -> Result<i64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
