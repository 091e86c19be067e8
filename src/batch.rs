use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::resolver::CachedGeocoder;

/// Something observed upstream (a listener joining, for instance) that may
/// carry a free-text location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: Some(location.into()),
        }
    }

    pub fn without_location(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: None,
        }
    }

    pub fn geocodable_location(&self) -> Option<&str> {
        self.location
            .as_deref()
            .filter(|location| !location.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodingStatus {
    Pending,
    Success,
    Failed,
}

impl GeocodingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GeocodingStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// `[longitude, latitude]`, the order map layers expect.
    pub coordinates: [f64; 2],
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub entity_id: String,
    pub status: GeocodingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResolvedLocation>,
}

impl StatusUpdate {
    fn pending(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            status: GeocodingStatus::Pending,
            payload: None,
        }
    }

    fn success(entity_id: &str, resolved: ResolvedLocation) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            status: GeocodingStatus::Success,
            payload: Some(resolved),
        }
    }

    fn failed(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            status: GeocodingStatus::Failed,
            payload: None,
        }
    }
}

pub type StatusObserver = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Geocodes entities one at a time through the cache-aside resolver, pausing
/// between entities. Only one run may be in flight per driver; overlapping
/// calls are dropped, not queued.
pub struct BatchGeocoder {
    geocoder: Arc<CachedGeocoder>,
    delay: Duration,
    guard: AsyncMutex<()>,
}

impl BatchGeocoder {
    pub fn new(geocoder: Arc<CachedGeocoder>, delay: Duration) -> Self {
        Self {
            geocoder,
            delay,
            guard: AsyncMutex::new(()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn in_flight(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Returns `None` without emitting anything when another run holds the
    /// driver.
    pub async fn geocode_batch(
        &self,
        entities: &[TrackedEntity],
        observer: &StatusObserver,
    ) -> Option<BatchStats> {
        let Ok(_run) = self.guard.try_lock() else {
            debug!(
                target: "geocode_batch",
                dropped = entities.len(),
                "batch already in flight; dropping call"
            );
            return None;
        };

        let mut seen = HashSet::new();
        let queue: Vec<(&str, &str)> = entities
            .iter()
            .filter_map(|entity| {
                let location = entity.geocodable_location()?;
                seen.insert(entity.id.as_str())
                    .then_some((entity.id.as_str(), location))
            })
            .collect();

        let mut stats = BatchStats {
            submitted: queue.len(),
            ..BatchStats::default()
        };
        if queue.is_empty() {
            return Some(stats);
        }
        info!(target: "geocode_batch", entities = queue.len(), "geocoding batch started");

        for (index, (entity_id, location)) in queue.iter().enumerate() {
            observer(StatusUpdate::pending(entity_id));
            match self.geocode_one(location).await {
                Ok(Some(resolved)) => {
                    stats.succeeded += 1;
                    observer(StatusUpdate::success(entity_id, resolved));
                }
                Ok(None) => {
                    stats.failed += 1;
                    observer(StatusUpdate::failed(entity_id));
                }
                Err(err) => {
                    warn!(target: "geocode_batch", ?err, entity_id, "failed to geocode entity");
                    stats.failed += 1;
                    observer(StatusUpdate::failed(entity_id));
                }
            }

            if index + 1 < queue.len() {
                sleep(self.delay).await;
            }
        }

        info!(
            target: "geocode_batch",
            succeeded = stats.succeeded,
            failed = stats.failed,
            "geocoding batch finished"
        );
        Some(stats)
    }

    async fn geocode_one(&self, location: &str) -> AppResult<Option<ResolvedLocation>> {
        let candidates = self.geocoder.resolve(location).await?;
        Ok(candidates.first().and_then(|candidate| {
            let (latitude, longitude) = candidate.coordinates()?;
            Some(ResolvedLocation {
                coordinates: [longitude, latitude],
                country: derive_country(&candidate.display_name),
            })
        }))
    }
}

/// Last comma-separated segment of a display name. Names without a trailing
/// country segment yield whatever comes last.
pub fn derive_country(display_name: &str) -> Option<String> {
    display_name
        .rsplit(',')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
