use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Waiting,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Waiting => "WAITING",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBookingStatus(pub String);

impl fmt::Display for UnknownBookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown booking status: {}", self.0)
    }
}

impl std::error::Error for UnknownBookingStatus {}

impl FromStr for BookingStatus {
    type Err = UnknownBookingStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "WAITING" => Ok(BookingStatus::Waiting),
            other => Err(UnknownBookingStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub total_tickets: i32,
    pub available_tickets: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub status: BookingStatus,
    /// Insertion sequence assigned by the store. Bookings of one event are
    /// inserted under its lock, so this is the waiting-list order.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// Waiting-list position. Wall-clock time is not used: a clock step
    /// backwards must not reorder the queue.
    pub fn fifo_key(&self) -> i64 {
        self.seq
    }
}

/// Externally visible capacity view of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatus {
    pub event_id: Uuid,
    pub available_tickets: i32,
    pub total_tickets: i32,
    pub waiting_list_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub booking_id: Uuid,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResult {
    #[serde(rename = "waitingListAssigned")]
    pub promoted: bool,
    #[serde(rename = "nextBookingId")]
    pub promoted_booking_id: Option<Uuid>,
}

impl CancellationResult {
    pub fn released() -> Self {
        Self {
            promoted: false,
            promoted_booking_id: None,
        }
    }

    pub fn promoted(booking_id: Uuid) -> Self {
        Self {
            promoted: true,
            promoted_booking_id: Some(booking_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BookingNotification {
    EventCreated {
        event_id: Uuid,
        name: String,
        total_tickets: i32,
    },
    TicketBooked {
        event_id: Uuid,
        booking_id: Uuid,
        user_id: String,
    },
    Waitlisted {
        event_id: Uuid,
        booking_id: Uuid,
        user_id: String,
    },
    TicketCancelled {
        event_id: Uuid,
        booking_id: Uuid,
        user_id: String,
        status: BookingStatus,
    },
    BookingPromoted {
        event_id: Uuid,
        booking_id: Uuid,
        user_id: String,
    },
    OperationFailed {
        operation: String,
        event_id: Option<Uuid>,
        booking_id: Option<Uuid>,
        error: String,
    },
}

impl BookingNotification {
    pub fn event_type(&self) -> &'static str {
        match self {
            BookingNotification::EventCreated { .. } => "EventCreated",
            BookingNotification::TicketBooked { .. } => "TicketBooked",
            BookingNotification::Waitlisted { .. } => "Waitlisted",
            BookingNotification::TicketCancelled { .. } => "TicketCancelled",
            BookingNotification::BookingPromoted { .. } => "BookingPromoted",
            BookingNotification::OperationFailed { .. } => "OperationFailed",
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            BookingNotification::EventCreated { event_id, .. }
            | BookingNotification::TicketBooked { event_id, .. }
            | BookingNotification::Waitlisted { event_id, .. }
            | BookingNotification::TicketCancelled { event_id, .. }
            | BookingNotification::BookingPromoted { event_id, .. } => Some(*event_id),
            BookingNotification::OperationFailed { event_id, .. } => *event_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub id: Uuid,
    pub notification: BookingNotification,
    pub created_at: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn new(notification: BookingNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification,
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_status_round_trips_through_storage_text() {
        for status in [BookingStatus::Confirmed, BookingStatus::Waiting] {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert!("WAITING_LIST".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn status_serializes_with_camel_case_fields() {
        let status = EventStatus {
            event_id: Uuid::nil(),
            available_tickets: 3,
            total_tickets: 10,
            waiting_list_count: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["availableTickets"], 3);
        assert_eq!(json["totalTickets"], 10);
        assert_eq!(json["waitingListCount"], 0);
    }

    #[test]
    fn cancellation_result_uses_wire_names() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(CancellationResult::promoted(id)).unwrap();
        assert_eq!(json["waitingListAssigned"], true);
        assert_eq!(json["nextBookingId"], id.to_string());

        let json = serde_json::to_value(CancellationResult::released()).unwrap();
        assert_eq!(json["waitingListAssigned"], false);
        assert!(json["nextBookingId"].is_null());
    }

    #[test]
    fn fifo_key_ignores_clock_steps() {
        let now = Utc::now();
        let booking = |seq, created_at| Booking {
            id: Uuid::new_v4(),
            event_id: Uuid::nil(),
            user_id: "user".to_string(),
            status: BookingStatus::Waiting,
            seq,
            created_at,
        };
        let first = booking(1, now);
        let second = booking(2, now - chrono::Duration::seconds(5));
        assert!(first.fifo_key() < second.fifo_key());
    }

    #[test]
    fn envelope_carries_notification_tag() {
        let envelope = NotificationEnvelope::new(BookingNotification::Waitlisted {
            event_id: Uuid::nil(),
            booking_id: Uuid::nil(),
            user_id: "alice".to_string(),
        });
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["notification"]["type"], "Waitlisted");
    }
}
