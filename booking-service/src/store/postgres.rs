use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, TransactionManager};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Booking, BookingStatus, Event};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{BookingStore, NewBooking, NewEvent, StoreError, StoreTx};
use crate::models::*;
use crate::schema::*;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<AsyncPgConnection>;

type PgConn = bb8::PooledConnection<'static, AsyncDieselConnectionManager<AsyncPgConnection>>;
type PgTransactionManager = <AsyncPgConnection as AsyncConnection>::TransactionManager;

pub async fn run_migrations(database_url: &str) -> Result<()> {
    info!("Running database migrations...");
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        Ok(())
    })
    .await??;
    info!("Migrations completed successfully");
    Ok(())
}

fn classify(event_id: Option<Uuid>, err: DieselError) -> StoreError {
    match &err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
            StoreError::Serialization(info.message().to_string())
        }
        DieselError::DatabaseError(_, info) if info.message().contains("lock timeout") => {
            match event_id {
                Some(id) => StoreError::LockTimeout(id),
                None => StoreError::Serialization(info.message().to_string()),
            }
        }
        DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info)
        | DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
        | DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            StoreError::Constraint(info.message().to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn to_booking(row: BookingRow) -> Result<Booking, StoreError> {
    Booking::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().max_size(pool_size).build(config).await?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> Result<PgConn, StoreError> {
        self.pool
            .get_owned()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut conn = self.conn().await?;
        PgTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(|e| classify(None, e))?;
        Ok(Box::new(PgTx { conn }))
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let mut conn = self.conn().await?;
        bookings::table
            .find(booking_id)
            .select(BookingRow::as_select())
            .first(&mut *conn)
            .await
            .optional()
            .map_err(|e| classify(None, e))?
            .map(to_booking)
            .transpose()
    }

    async fn event_snapshot(&self, event_id: Uuid) -> Result<Option<(Event, i64)>, StoreError> {
        let mut conn = self.conn().await?;
        PgTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(|e| classify(None, e))?;
        let snapshot = read_snapshot(&mut conn, event_id).await;
        let finished = match snapshot {
            Ok(_) => PgTransactionManager::commit_transaction(&mut *conn).await,
            Err(_) => PgTransactionManager::rollback_transaction(&mut *conn).await,
        };
        let snapshot = snapshot.map_err(|e| classify(Some(event_id), e))?;
        finished.map_err(|e| classify(Some(event_id), e))?;
        Ok(snapshot)
    }

    async fn bookings_for_event(&self, event_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let mut conn = self.conn().await?;
        bookings::table
            .filter(bookings::event_id.eq(event_id))
            .order(bookings::seq.asc())
            .select(BookingRow::as_select())
            .load(&mut *conn)
            .await
            .map_err(|e| classify(Some(event_id), e))?
            .into_iter()
            .map(to_booking)
            .collect()
    }
}

/// Event row and waiting count from one read-only snapshot; the caller owns
/// the surrounding transaction.
async fn read_snapshot(conn: &mut PgConn, event_id: Uuid) -> Result<Option<(Event, i64)>, DieselError> {
    diesel::sql_query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut **conn)
        .await?;
    let event = events::table
        .find(event_id)
        .select(EventRow::as_select())
        .first(&mut **conn)
        .await
        .optional()?;
    let Some(event) = event else {
        return Ok(None);
    };
    let waiting = bookings::table
        .filter(bookings::event_id.eq(event_id))
        .filter(bookings::status.eq(BookingStatus::Waiting.as_str()))
        .count()
        .get_result::<i64>(&mut **conn)
        .await?;
    Ok(Some((Event::from(event), waiting)))
}

/// An open transaction pinned to one pooled connection. Dropping it without
/// commit leaves the transaction manager broken, so the pool discards the
/// connection and Postgres rolls the work back.
struct PgTx {
    conn: PgConn,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError> {
        let row = NewEventRow {
            id: event.id,
            name: &event.name,
            total_tickets: event.total_tickets,
            available_tickets: event.total_tickets,
        };
        let inserted = diesel::insert_into(events::table)
            .values(&row)
            .returning(EventRow::as_returning())
            .get_result(&mut *self.conn)
            .await
            .map_err(|e| classify(Some(event.id), e))?;
        Ok(inserted.into())
    }

    async fn lock_event(
        &mut self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<Event>, StoreError> {
        // SET does not accept bind parameters; the value is a plain integer.
        diesel::sql_query(format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify(Some(event_id), e))?;

        let event = events::table
            .find(event_id)
            .select(EventRow::as_select())
            .for_update()
            .first(&mut *self.conn)
            .await
            .optional()
            .map_err(|e| classify(Some(event_id), e))?;
        Ok(event.map(Event::from))
    }

    async fn set_available_tickets(&mut self, event_id: Uuid, available: i32) -> Result<(), StoreError> {
        diesel::update(events::table.find(event_id))
            .set((
                events::available_tickets.eq(available),
                events::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify(Some(event_id), e))?;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let row = NewBookingRow {
            id: booking.id,
            event_id: booking.event_id,
            user_id: &booking.user_id,
            status: booking.status.as_str(),
            created_at: booking.created_at,
        };
        let inserted = diesel::insert_into(bookings::table)
            .values(&row)
            .returning(BookingRow::as_returning())
            .get_result(&mut *self.conn)
            .await
            .map_err(|e| classify(Some(booking.event_id), e))?;
        to_booking(inserted)
    }

    async fn find_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        bookings::table
            .find(booking_id)
            .select(BookingRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()
            .map_err(|e| classify(None, e))?
            .map(to_booking)
            .transpose()
    }

    async fn delete_booking(&mut self, booking_id: Uuid) -> Result<(), StoreError> {
        diesel::delete(bookings::table.find(booking_id))
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify(None, e))?;
        Ok(())
    }

    async fn set_booking_status(&mut self, booking_id: Uuid, status: BookingStatus) -> Result<(), StoreError> {
        diesel::update(bookings::table.find(booking_id))
            .set(bookings::status.eq(status.as_str()))
            .execute(&mut *self.conn)
            .await
            .map_err(|e| classify(None, e))?;
        Ok(())
    }

    async fn earliest_waiting(&mut self, event_id: Uuid) -> Result<Option<Booking>, StoreError> {
        bookings::table
            .filter(bookings::event_id.eq(event_id))
            .filter(bookings::status.eq(BookingStatus::Waiting.as_str()))
            .order(bookings::seq.asc())
            .select(BookingRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()
            .map_err(|e| classify(Some(event_id), e))?
            .map(to_booking)
            .transpose()
    }

    async fn count_waiting(&mut self, event_id: Uuid) -> Result<i64, StoreError> {
        bookings::table
            .filter(bookings::event_id.eq(event_id))
            .filter(bookings::status.eq(BookingStatus::Waiting.as_str()))
            .count()
            .get_result::<i64>(&mut *self.conn)
            .await
            .map_err(|e| classify(Some(event_id), e))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        PgTransactionManager::commit_transaction(&mut *tx.conn)
            .await
            .map_err(|e| classify(None, e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        PgTransactionManager::rollback_transaction(&mut *tx.conn)
            .await
            .map_err(|e| classify(None, e))
    }
}
