//! Concurrent access to the same and to different events.

mod common;

use async_trait::async_trait;
use booking_service::config::ManagerConfig;
use booking_service::store::{BookingStore, MemoryStore, NewBooking, NewEvent, StoreError, StoreTx};
use booking_service::BookingError;
use common::Harness;
use futures::future::join_all;
use proptest::prelude::*;
use shared::{Booking, BookingStatus, Event};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_never_oversell() {
    let h = Harness::new();
    let event = h.manager.create_event("Hot Tickets", 10).await.unwrap();

    let attempts = (0..15).map(|i| {
        let manager = Arc::clone(&h.manager);
        async move { manager.book_ticket(event.id, &format!("user-{i}")).await }
    });
    let results: Vec<_> = join_all(attempts.map(tokio::spawn)).await;

    let outcomes: Vec<_> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|b| b.confirmed).count(), 10);
    assert_eq!(outcomes.iter().filter(|b| !b.confirmed).count(), 5);

    let status = h.manager.get_status(event.id).await.unwrap();
    assert_eq!(status.available_tickets, 0);
    assert_eq!(status.waiting_list_count, 5);
    h.assert_conserved(event.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_seat_has_exactly_one_winner() {
    let h = Harness::new();
    let event = h.manager.create_event("Front Row", 1).await.unwrap();

    let attempts = (0..50).map(|i| {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.book_ticket(event.id, &format!("fan-{i}")).await })
    });
    let confirmed = join_all(attempts)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().as_ref().unwrap().confirmed)
        .count();

    assert_eq!(confirmed, 1);
    assert_eq!(h.manager.get_status(event.id).await.unwrap().waiting_list_count, 49);
    h.assert_conserved(event.id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_books_and_cancels_conserve_capacity() {
    let h = Harness::new();
    let event = h.manager.create_event("Busy Night", 5).await.unwrap();

    let mut existing = Vec::new();
    for i in 0..20 {
        let user = format!("early-{i}");
        let booking = h.manager.book_ticket(event.id, &user).await.unwrap();
        existing.push((booking.booking_id, user));
    }

    let mut tasks = Vec::new();
    for (booking_id, user) in existing.into_iter().take(10) {
        let manager = Arc::clone(&h.manager);
        tasks.push(tokio::spawn(async move {
            manager.cancel_ticket(booking_id, &user).await.map(|_| ())
        }));
    }
    for i in 0..10 {
        let manager = Arc::clone(&h.manager);
        tasks.push(tokio::spawn(async move {
            manager.book_ticket(event.id, &format!("late-{i}")).await.map(|_| ())
        }));
    }
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let bookings = h.bookings(event.id).await;
    assert_eq!(bookings.len(), 20);
    let confirmed = bookings.iter().filter(|b| b.is_confirmed()).count();
    assert_eq!(confirmed, 5);
    h.assert_conserved(event.id).await;
}

/// Delays `lock_event` for one event so tests can hold its lock on demand.
struct SlowStore {
    inner: MemoryStore,
    slow_event: Uuid,
    hold: Duration,
}

struct SlowTx {
    inner: Box<dyn StoreTx>,
    slow_event: Uuid,
    hold: Duration,
}

#[async_trait]
impl BookingStore for SlowStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(SlowTx {
            inner: self.inner.begin().await?,
            slow_event: self.slow_event,
            hold: self.hold,
        }))
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.find_booking(booking_id).await
    }

    async fn event_snapshot(&self, event_id: Uuid) -> Result<Option<(Event, i64)>, StoreError> {
        self.inner.event_snapshot(event_id).await
    }

    async fn bookings_for_event(&self, event_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        self.inner.bookings_for_event(event_id).await
    }
}

#[async_trait]
impl StoreTx for SlowTx {
    async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError> {
        self.inner.insert_event(event).await
    }

    async fn lock_event(&mut self, event_id: Uuid, timeout: Duration) -> Result<Option<Event>, StoreError> {
        if event_id == self.slow_event {
            tokio::time::sleep(self.hold).await;
        }
        self.inner.lock_event(event_id, timeout).await
    }

    async fn set_available_tickets(&mut self, event_id: Uuid, available: i32) -> Result<(), StoreError> {
        self.inner.set_available_tickets(event_id, available).await
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError> {
        self.inner.insert_booking(booking).await
    }

    async fn find_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.find_booking(booking_id).await
    }

    async fn delete_booking(&mut self, booking_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_booking(booking_id).await
    }

    async fn set_booking_status(&mut self, booking_id: Uuid, status: BookingStatus) -> Result<(), StoreError> {
        self.inner.set_booking_status(booking_id, status).await
    }

    async fn earliest_waiting(&mut self, event_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.earliest_waiting(event_id).await
    }

    async fn count_waiting(&mut self, event_id: Uuid) -> Result<i64, StoreError> {
        self.inner.count_waiting(event_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Seeds two events directly in the memory store, then builds a manager
/// whose store stalls while holding the first event's lock.
async fn stalled_harness() -> (Harness, Uuid, Uuid) {
    let slow_event = Uuid::new_v4();
    let fast_event = Uuid::new_v4();
    let h = Harness::custom(
        ManagerConfig {
            lock_timeout: Duration::from_millis(50),
            ..ManagerConfig::default()
        },
        None,
        move |store| -> Arc<dyn BookingStore> {
            Arc::new(SlowStore {
                inner: store,
                slow_event,
                hold: Duration::from_millis(400),
            })
        },
    );

    let mut tx = h.store.begin().await.unwrap();
    for (id, name) in [(slow_event, "Slow Event"), (fast_event, "Fast Event")] {
        tx.insert_event(&NewEvent {
            id,
            name: name.to_string(),
            total_tickets: 3,
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();
    (h, slow_event, fast_event)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_event_times_out_as_retryable_conflict() {
    let (h, slow_event, _) = stalled_harness().await;

    let holder = {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.book_ticket(slow_event, "holder").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = h.manager.book_ticket(slow_event, "latecomer").await.unwrap_err();
    assert!(matches!(err, BookingError::Conflict { operation: "book_ticket", .. }), "{err:?}");
    assert!(err.is_retryable());

    assert!(holder.await.unwrap().unwrap().confirmed);
    let bookings = h.bookings(slow_event).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].user_id, "holder");
    h.assert_conserved(slow_event).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn other_events_proceed_while_one_is_locked() {
    let (h, slow_event, fast_event) = stalled_harness().await;

    let holder = {
        let manager = Arc::clone(&h.manager);
        tokio::spawn(async move { manager.book_ticket(slow_event, "holder").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // would time out after 50ms if it shared the slow event's lock
    let booked = h.manager.book_ticket(fast_event, "bystander").await.unwrap();
    assert!(booked.confirmed);

    holder.await.unwrap().unwrap();
    h.assert_conserved(slow_event).await;
    h.assert_conserved(fast_event).await;
}

#[derive(Debug, Clone)]
enum Op {
    Book(u8),
    Cancel { pick: usize, wrong_user: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..20).prop_map(Op::Book),
        2 => (any::<usize>(), prop::bool::weighted(0.2))
            .prop_map(|(pick, wrong_user)| Op::Cancel { pick, wrong_user }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn capacity_is_conserved_across_operation_sequences(
        total in 1i32..6,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            let event = h.manager.create_event("Property Night", total).await.unwrap();
            let mut live: Vec<(Uuid, String)> = Vec::new();

            for op in ops {
                match op {
                    Op::Book(user) => {
                        let user = format!("user-{user}");
                        let booking = h.manager.book_ticket(event.id, &user).await.unwrap();
                        live.push((booking.booking_id, user));
                    }
                    Op::Cancel { .. } if live.is_empty() => {}
                    Op::Cancel { pick, wrong_user } => {
                        let (booking_id, user) = live[pick % live.len()].clone();
                        if wrong_user {
                            let err = h.manager.cancel_ticket(booking_id, "intruder").await.unwrap_err();
                            assert!(matches!(err, BookingError::Authorization { .. }));
                        } else {
                            h.manager.cancel_ticket(booking_id, &user).await.unwrap();
                            live.retain(|(id, _)| *id != booking_id);
                        }
                    }
                }

                h.assert_conserved(event.id).await;
                let confirmed = h
                    .bookings(event.id)
                    .await
                    .iter()
                    .filter(|b| b.is_confirmed())
                    .count();
                assert_eq!(confirmed, live.len().min(total as usize));
            }
        });
    }
}
