//! Request validation performed before the inventory manager is called.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::BookingError;

const EVENT_NAME_LEN: std::ops::RangeInclusive<usize> = 3..=100;
const USER_ID_LEN: std::ops::RangeInclusive<usize> = 3..=50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeEventRequest {
    pub event_name: Option<String>,
    pub total_tickets: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicketRequest {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTicketRequest {
    pub booking_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEvent {
    pub name: String,
    pub total_tickets: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub event_id: Uuid,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCancellation {
    pub booking_id: Uuid,
    pub user_id: String,
}

fn invalid(message: impl Into<String>) -> BookingError {
    BookingError::Validation(message.into())
}

fn bounded_text(
    value: Option<&str>,
    field: &str,
    len: std::ops::RangeInclusive<usize>,
) -> Result<String, BookingError> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    let chars = value.chars().count();
    if chars < *len.start() {
        return Err(invalid(format!("{} must be at least {} characters", field, len.start())));
    }
    if chars > *len.end() {
        return Err(invalid(format!("{} cannot exceed {} characters", field, len.end())));
    }
    Ok(value.to_string())
}

fn uuid_field(value: Option<&str>, field: &str) -> Result<Uuid, BookingError> {
    let value = value.ok_or_else(|| invalid(format!("{} is required", field)))?;
    Uuid::parse_str(value.trim()).map_err(|_| invalid(format!("Invalid {} format", field)))
}

pub fn total_tickets_in_range(total: i64, max_tickets: i32) -> Result<i32, BookingError> {
    if total < 1 {
        return Err(invalid("Total tickets must be at least 1"));
    }
    if total > i64::from(max_tickets) {
        return Err(invalid(format!("Total tickets cannot exceed {}", max_tickets)));
    }
    Ok(total as i32)
}

pub fn validate_event_initialization(
    request: &InitializeEventRequest,
    max_tickets: i32,
) -> Result<ValidEvent, BookingError> {
    let total = match &request.total_tickets {
        None | Some(serde_json::Value::Null) => return Err(invalid("Total tickets is required")),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| invalid("Total tickets must be an integer"))?,
    };
    let total_tickets = total_tickets_in_range(total, max_tickets)?;
    let name = bounded_text(request.event_name.as_deref(), "Event name", EVENT_NAME_LEN)?;
    Ok(ValidEvent { name, total_tickets })
}

pub fn validate_booking(request: &BookTicketRequest) -> Result<ValidBooking, BookingError> {
    let event_id = uuid_field(request.event_id.as_deref(), "event ID")?;
    let user_id = bounded_text(request.user_id.as_deref(), "User ID", USER_ID_LEN)?;
    Ok(ValidBooking { event_id, user_id })
}

pub fn validate_cancellation(request: &CancelTicketRequest) -> Result<ValidCancellation, BookingError> {
    let booking_id = uuid_field(request.booking_id.as_deref(), "booking ID")?;
    let user_id = bounded_text(request.user_id.as_deref(), "User ID", USER_ID_LEN)?;
    Ok(ValidCancellation { booking_id, user_id })
}
