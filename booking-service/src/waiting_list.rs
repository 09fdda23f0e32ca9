//! FIFO promotion of waiting bookings when a confirmed seat is freed.

use shared::{Booking, BookingStatus};
use uuid::Uuid;

use crate::store::{StoreError, StoreTx};

/// What a cancellation does to the rest of the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The freed seat goes to this waiting booking; capacity is unchanged.
    Promote(Booking),
    /// Nobody is waiting; the seat returns to the pool.
    ReleaseSeat,
    /// A waiting booking left the queue; no seat was freed.
    Withdraw,
}

pub struct WaitingListPolicy;

impl WaitingListPolicy {
    /// Earliest WAITING booking of the event in insertion order.
    /// Must run inside the cancelling transaction, after the cancelled
    /// booking was removed.
    pub async fn select_promotion_candidate(
        tx: &mut dyn StoreTx,
        event_id: Uuid,
    ) -> Result<Option<Booking>, StoreError> {
        tx.earliest_waiting(event_id).await
    }

    pub fn decide(cancelled: BookingStatus, candidate: Option<Booking>) -> Reconciliation {
        match (cancelled, candidate) {
            (BookingStatus::Waiting, _) => Reconciliation::Withdraw,
            (BookingStatus::Confirmed, Some(next)) => Reconciliation::Promote(next),
            (BookingStatus::Confirmed, None) => Reconciliation::ReleaseSeat,
        }
    }

    /// Consults the waiting list only when a confirmed seat was freed.
    pub async fn reconcile(
        tx: &mut dyn StoreTx,
        cancelled: &Booking,
    ) -> Result<Reconciliation, StoreError> {
        let candidate = match cancelled.status {
            BookingStatus::Confirmed => {
                Self::select_promotion_candidate(tx, cancelled.event_id).await?
            }
            BookingStatus::Waiting => None,
        };
        Ok(Self::decide(cancelled.status, candidate))
    }
}
