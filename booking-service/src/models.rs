use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Booking, BookingStatus, Event};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = crate::schema::events)]
pub struct EventRow {
    pub id: Uuid,
    pub name: String,
    pub total_tickets: i32,
    pub available_tickets: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::events)]
pub struct NewEventRow<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub total_tickets: i32,
    pub available_tickets: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct BookingRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub status: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBookingRow<'a> {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: &'a str,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            total_tickets: row.total_tickets,
            available_tickets: row.available_tickets,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = shared::UnknownBookingStatus;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status: BookingStatus = row.status.parse()?;
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            status,
            seq: row.seq,
            created_at: row.created_at,
        })
    }
}
