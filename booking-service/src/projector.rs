//! Status projection and its cache copy.
//!
//! The store is the only authority. The cache holds the last projection
//! written after a committed change, stamped with the time it was written;
//! readers ignore copies older than the configured staleness bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Event, EventStatus};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheError, StatusCache};
use crate::config::CacheConfig;

pub fn project(event: &Event, waiting_count: i64) -> EventStatus {
    EventStatus {
        event_id: event.id,
        available_tickets: event.available_tickets,
        total_tickets: event.total_tickets,
        waiting_list_count: waiting_count,
    }
}

pub fn cache_key(event_id: Uuid) -> String {
    format!("event:{}", event_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedStatus {
    #[serde(flatten)]
    status: EventStatus,
    refreshed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatusProjector {
    cache: Arc<dyn StatusCache>,
    config: CacheConfig,
}

impl StatusProjector {
    pub fn new(cache: Arc<dyn StatusCache>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    /// Writes the projection through to the cache. Failures are logged only.
    pub async fn publish(&self, status: &EventStatus) {
        let key = cache_key(status.event_id);
        let cached = CachedStatus {
            status: status.clone(),
            refreshed_at: Utc::now(),
        };
        let result = match serde_json::to_string(&cached) {
            Ok(json) => {
                self.bounded(self.cache.set(&key, json, Some(self.config.ttl)))
                    .await
            }
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(e) = result {
            warn!(event_id = %status.event_id, error = %e, "Failed to refresh status cache");
        }
    }

    /// Cached projection if present, decodable and fresh enough.
    pub async fn cached(&self, event_id: Uuid) -> Option<EventStatus> {
        let key = cache_key(event_id);
        let raw = match self.bounded(self.cache.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(%event_id, "Status cache miss");
                return None;
            }
            Err(e) => {
                warn!(%event_id, error = %e, "Status cache read failed, falling back to store");
                return None;
            }
        };

        let cached: CachedStatus = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(%event_id, error = %e, "Discarding undecodable status cache entry");
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(cached.refreshed_at);
        match age.to_std() {
            Ok(age) if age > self.config.max_staleness => {
                debug!(%event_id, ?age, "Cached status too old");
                None
            }
            _ => Some(cached.status),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.config.op_timeout, call)
            .await
            .unwrap_or(Err(CacheError::Timeout(self.config.op_timeout)))
    }
}

impl std::fmt::Debug for StatusProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusProjector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
