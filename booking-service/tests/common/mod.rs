#![allow(dead_code)]

use booking_service::cache::{MemoryCache, StatusCache};
use booking_service::config::{CacheConfig, ManagerConfig};
use booking_service::notify::NotificationSink;
use booking_service::store::{BookingStore, MemoryStore};
use booking_service::InventoryManager;
use parking_lot::Mutex;
use shared::{Booking, BookingNotification, BookingStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<BookingNotification>>>);

impl RecordingSink {
    pub fn types(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(|n| n.event_type()).collect()
    }

    pub fn all(&self) -> Vec<BookingNotification> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, notification: BookingNotification) {
        self.0.lock().push(notification);
    }
}

pub struct Harness {
    pub manager: Arc<InventoryManager>,
    pub store: MemoryStore,
    pub cache: MemoryCache,
    pub sink: RecordingSink,
}

impl Harness {
    pub fn new() -> Self {
        Self::custom(ManagerConfig::default(), None, |store| -> Arc<dyn BookingStore> { Arc::new(store) })
    }

    /// `cache` replaces the default memory cache; `backend` may wrap the
    /// memory store the harness inspects.
    pub fn custom(
        config: ManagerConfig,
        cache: Option<Arc<dyn StatusCache>>,
        backend: impl FnOnce(MemoryStore) -> Arc<dyn BookingStore>,
    ) -> Self {
        let store = MemoryStore::new();
        let memory_cache = MemoryCache::new();
        let sink = RecordingSink::default();
        let status_cache: Arc<dyn StatusCache> = match cache {
            Some(cache) => cache,
            None => Arc::new(memory_cache.clone()),
        };
        let manager = InventoryManager::new(
            backend(store.clone()),
            status_cache,
            Arc::new(sink.clone()),
            config,
            CacheConfig {
                op_timeout: Duration::from_millis(50),
                ..CacheConfig::default()
            },
        );
        Self {
            manager: Arc::new(manager),
            store,
            cache: memory_cache,
            sink,
        }
    }

    pub async fn bookings(&self, event_id: Uuid) -> Vec<Booking> {
        self.store.bookings_for_event(event_id).await.unwrap()
    }

    pub async fn status_of(&self, booking_id: Uuid) -> Option<BookingStatus> {
        self.store
            .find_booking(booking_id)
            .await
            .unwrap()
            .map(|b| b.status)
    }

    /// Checks `available = total - confirmed`, non-negative capacity, and that
    /// a waiting list only exists while the event is sold out.
    pub async fn assert_conserved(&self, event_id: Uuid) {
        let (event, waiting) = self
            .store
            .event_snapshot(event_id)
            .await
            .unwrap()
            .expect("event exists");
        let confirmed = self
            .bookings(event_id)
            .await
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .count() as i32;
        assert_eq!(event.available_tickets, event.total_tickets - confirmed);
        assert!(event.available_tickets >= 0);
        if waiting > 0 {
            assert_eq!(event.available_tickets, 0);
        }
    }
}
