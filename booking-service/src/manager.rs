//! Inventory manager: the only writer of event capacity.
//!
//! Every write to an event happens while holding that event's slot in
//! [`EventLocks`] and, inside the store transaction, the event row lock.
//! Within that critical section the manager keeps
//! `available_tickets == total_tickets - confirmed bookings`.

use chrono::Utc;
use shared::{
    Booking, BookingNotification, BookingResult, BookingStatus, CancellationResult, Event, EventStatus,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::config::{CacheConfig, ManagerConfig};
use crate::error::BookingError;
use crate::locks::{EventLockGuard, EventLocks};
use crate::notify::NotificationSink;
use crate::projector::{project, StatusProjector};
use crate::store::{BookingStore, NewBooking, NewEvent, StoreTx};
use crate::validation::total_tickets_in_range;
use crate::waiting_list::{Reconciliation, WaitingListPolicy};

pub struct InventoryManager {
    store: Arc<dyn BookingStore>,
    locks: EventLocks,
    projector: StatusProjector,
    notifier: Arc<dyn NotificationSink>,
    config: ManagerConfig,
}

impl InventoryManager {
    pub fn new(
        store: Arc<dyn BookingStore>,
        cache: Arc<dyn StatusCache>,
        notifier: Arc<dyn NotificationSink>,
        config: ManagerConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            store,
            locks: EventLocks::new(config.lock_timeout),
            projector: StatusProjector::new(cache, cache_config),
            notifier,
            config,
        }
    }

    #[instrument(skip(self), fields(event_id = tracing::field::Empty))]
    pub async fn create_event(&self, name: &str, total_tickets: i32) -> Result<Event, BookingError> {
        let name = name.trim();
        if name.is_empty() {
            let err = BookingError::Validation("event name must not be empty".into());
            return Err(self.failed("create_event", None, None, err));
        }
        total_tickets_in_range(i64::from(total_tickets), self.config.max_tickets)
            .map_err(|e| self.failed("create_event", None, None, e))?;

        let new_event = NewEvent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            total_tickets,
        };
        tracing::Span::current().record("event_id", tracing::field::display(new_event.id));

        let event = match self.create_in_tx(&new_event).await {
            Ok(event) => event,
            Err(e) => return Err(self.failed("create_event", Some(new_event.id), None, e)),
        };

        self.projector.publish(&project(&event, 0)).await;
        info!(event_id = %event.id, total_tickets, "Event created");
        self.notifier.publish(BookingNotification::EventCreated {
            event_id: event.id,
            name: event.name.clone(),
            total_tickets: event.total_tickets,
        });
        Ok(event)
    }

    async fn create_in_tx(&self, new_event: &NewEvent) -> Result<Event, BookingError> {
        let mut tx = self.begin("create_event", new_event.id).await?;
        let outcome = tx
            .insert_event(new_event)
            .await
            .map_err(|e| BookingError::from_store("create_event", new_event.id, e));
        finish(tx, outcome, "create_event", new_event.id).await
    }

    #[instrument(skip(self))]
    pub async fn book_ticket(&self, event_id: Uuid, user_id: &str) -> Result<BookingResult, BookingError> {
        match self.book_locked(event_id, user_id).await {
            Ok((booking, status, _guard)) => {
                self.projector.publish(&status).await;
                let confirmed = booking.is_confirmed();
                if confirmed {
                    info!(%event_id, booking_id = %booking.id, user_id, "Ticket booked");
                    self.notifier.publish(BookingNotification::TicketBooked {
                        event_id,
                        booking_id: booking.id,
                        user_id: booking.user_id,
                    });
                } else {
                    info!(%event_id, booking_id = %booking.id, user_id, "Added to waiting list");
                    self.notifier.publish(BookingNotification::Waitlisted {
                        event_id,
                        booking_id: booking.id,
                        user_id: booking.user_id,
                    });
                }
                Ok(BookingResult {
                    booking_id: booking.id,
                    confirmed,
                })
            }
            Err(e) => Err(self.failed("book_ticket", Some(event_id), None, e)),
        }
    }

    /// Runs the booking transaction and returns with the event lock still
    /// held, so the cache write that follows is ordered with other writers.
    async fn book_locked(
        &self,
        event_id: Uuid,
        user_id: &str,
    ) -> Result<(Booking, EventStatus, EventLockGuard), BookingError> {
        let guard = self.lock("book_ticket", event_id).await?;
        let mut tx = self.begin("book_ticket", event_id).await?;
        let outcome = self.book_in_tx(tx.as_mut(), event_id, user_id).await;
        let (booking, status) = finish(tx, outcome, "book_ticket", event_id).await?;
        Ok((booking, status, guard))
    }

    async fn book_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        event_id: Uuid,
        user_id: &str,
    ) -> Result<(Booking, EventStatus), BookingError> {
        let op = "book_ticket";
        let mut event = tx
            .lock_event(event_id, self.config.lock_timeout)
            .await
            .map_err(|e| BookingError::from_store(op, event_id, e))?
            .ok_or_else(|| BookingError::event_not_found(event_id))?;

        let status = if event.available_tickets > 0 {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Waiting
        };
        let booking = tx
            .insert_booking(&NewBooking {
                id: Uuid::new_v4(),
                event_id,
                user_id: user_id.to_string(),
                status,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| BookingError::from_store(op, event_id, e))?;

        if booking.is_confirmed() {
            event.available_tickets -= 1;
            tx.set_available_tickets(event_id, event.available_tickets)
                .await
                .map_err(|e| BookingError::from_store(op, event_id, e))?;
        }

        let waiting = tx
            .count_waiting(event_id)
            .await
            .map_err(|e| BookingError::from_store(op, event_id, e))?;
        Ok((booking, project(&event, waiting)))
    }

    #[instrument(skip(self))]
    pub async fn cancel_ticket(
        &self,
        booking_id: Uuid,
        user_id: &str,
    ) -> Result<CancellationResult, BookingError> {
        match self.cancel_locked(booking_id, user_id).await {
            Ok((cancelled, reconciliation, status, _guard)) => {
                self.projector.publish(&status).await;
                info!(
                    event_id = %cancelled.event_id,
                    %booking_id,
                    user_id,
                    status = %cancelled.status,
                    "Ticket cancelled"
                );
                self.notifier.publish(BookingNotification::TicketCancelled {
                    event_id: cancelled.event_id,
                    booking_id,
                    user_id: cancelled.user_id.clone(),
                    status: cancelled.status,
                });

                match reconciliation {
                    Reconciliation::Promote(promoted) => {
                        info!(
                            event_id = %promoted.event_id,
                            booking_id = %promoted.id,
                            user_id = %promoted.user_id,
                            "Waiting booking promoted"
                        );
                        self.notifier.publish(BookingNotification::BookingPromoted {
                            event_id: promoted.event_id,
                            booking_id: promoted.id,
                            user_id: promoted.user_id,
                        });
                        Ok(CancellationResult::promoted(promoted.id))
                    }
                    Reconciliation::ReleaseSeat | Reconciliation::Withdraw => {
                        Ok(CancellationResult::released())
                    }
                }
            }
            Err((event_id, e)) => Err(self.failed("cancel_ticket", event_id, Some(booking_id), e)),
        }
    }

    async fn cancel_locked(
        &self,
        booking_id: Uuid,
        user_id: &str,
    ) -> Result<(Booking, Reconciliation, EventStatus, EventLockGuard), (Option<Uuid>, BookingError)> {
        let op = "cancel_ticket";
        let booking = self
            .store
            .find_booking(booking_id)
            .await
            .map_err(|source| (None, BookingError::Persistence { operation: op, source }))?
            .ok_or_else(|| (None, BookingError::booking_not_found(booking_id)))?;
        let event_id = booking.event_id;

        // user ids never change, so ownership can be checked before locking
        if booking.user_id != user_id {
            return Err((
                Some(event_id),
                BookingError::Authorization {
                    booking_id,
                    user_id: user_id.to_string(),
                },
            ));
        }

        let with_event = |e| (Some(event_id), e);
        let guard = self.lock(op, event_id).await.map_err(with_event)?;
        let mut tx = self.begin(op, event_id).await.map_err(with_event)?;
        let outcome = self.cancel_in_tx(tx.as_mut(), event_id, booking_id).await;
        let (cancelled, reconciliation, status) =
            finish(tx, outcome, op, event_id).await.map_err(with_event)?;
        Ok((cancelled, reconciliation, status, guard))
    }

    async fn cancel_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        event_id: Uuid,
        booking_id: Uuid,
    ) -> Result<(Booking, Reconciliation, EventStatus), BookingError> {
        let op = "cancel_ticket";
        let store_err = |e| BookingError::from_store(op, event_id, e);

        let mut event = tx
            .lock_event(event_id, self.config.lock_timeout)
            .await
            .map_err(store_err)?
            .ok_or_else(|| BookingError::event_not_found(event_id))?;

        // re-read under the lock: a concurrent cancel may have won
        let booking = tx
            .find_booking(booking_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| BookingError::booking_not_found(booking_id))?;

        tx.delete_booking(booking_id).await.map_err(store_err)?;

        let reconciliation = WaitingListPolicy::reconcile(tx, &booking)
            .await
            .map_err(store_err)?;
        match &reconciliation {
            Reconciliation::Promote(next) => {
                tx.set_booking_status(next.id, BookingStatus::Confirmed)
                    .await
                    .map_err(store_err)?;
            }
            Reconciliation::ReleaseSeat => {
                event.available_tickets += 1;
                tx.set_available_tickets(event_id, event.available_tickets)
                    .await
                    .map_err(store_err)?;
            }
            Reconciliation::Withdraw => {}
        }

        let waiting = tx.count_waiting(event_id).await.map_err(store_err)?;
        Ok((booking, reconciliation, project(&event, waiting)))
    }

    #[instrument(skip(self))]
    pub async fn get_status(&self, event_id: Uuid) -> Result<EventStatus, BookingError> {
        if let Some(status) = self.projector.cached(event_id).await {
            return Ok(status);
        }

        // Read and publish under the event lock so this snapshot cannot
        // overwrite a newer projection from a concurrent writer.
        let guard = match self.locks.acquire(event_id).await {
            Ok(guard) => Some(guard),
            Err(e) => {
                debug!(%event_id, error = %e, "Serving status without refreshing the cache");
                None
            }
        };

        let snapshot = self
            .store
            .event_snapshot(event_id)
            .await
            .map_err(|source| BookingError::Persistence {
                operation: "get_status",
                source,
            });
        let (event, waiting) = match snapshot {
            Ok(Some(found)) => found,
            Ok(None) => {
                return Err(self.failed(
                    "get_status",
                    Some(event_id),
                    None,
                    BookingError::event_not_found(event_id),
                ))
            }
            Err(e) => return Err(self.failed("get_status", Some(event_id), None, e)),
        };

        let status = project(&event, waiting);
        if guard.is_some() {
            self.projector.publish(&status).await;
        }
        Ok(status)
    }

    async fn lock(&self, operation: &'static str, event_id: Uuid) -> Result<EventLockGuard, BookingError> {
        self.locks
            .acquire(event_id)
            .await
            .map_err(|e| BookingError::Conflict {
                operation,
                event_id,
                reason: e.to_string(),
            })
    }

    async fn begin(&self, operation: &'static str, event_id: Uuid) -> Result<Box<dyn StoreTx>, BookingError> {
        self.store
            .begin()
            .await
            .map_err(|e| BookingError::from_store(operation, event_id, e))
    }

    /// Logs and reports a failed operation, handing the error back.
    fn failed(
        &self,
        operation: &'static str,
        event_id: Option<Uuid>,
        booking_id: Option<Uuid>,
        err: BookingError,
    ) -> BookingError {
        let event = event_id.map(|id| id.to_string()).unwrap_or_default();
        let booking = booking_id.map(|id| id.to_string()).unwrap_or_default();
        if err.is_client_error() {
            warn!(operation, event_id = %event, booking_id = %booking, error = %err, "Operation rejected");
        } else {
            error!(operation, event_id = %event, booking_id = %booking, error = %err, "Operation failed");
        }
        self.notifier.publish(BookingNotification::OperationFailed {
            operation: operation.to_string(),
            event_id,
            booking_id,
            error: err.to_string(),
        });
        err
    }
}

/// Commits on success; otherwise rolls back and returns the operation error.
async fn finish<T>(
    tx: Box<dyn StoreTx>,
    outcome: Result<T, BookingError>,
    operation: &'static str,
    event_id: Uuid,
) -> Result<T, BookingError> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| BookingError::from_store(operation, event_id, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(operation, %event_id, error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}
