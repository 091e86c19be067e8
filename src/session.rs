//! Long-lived tracking of entities seen on a live event stream.
//!
//! The batch driver only deduplicates within a single call. A session keeps
//! the set of identities that have already been handed to the driver so that
//! each identity is geocoded at most once for the session's lifetime, no
//! matter how often it reappears upstream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::{pin_mut, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::batch::{
    BatchGeocoder, BatchStats, GeocodingStatus, ResolvedLocation, StatusObserver, StatusUpdate,
    TrackedEntity,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedState {
    pub entity: TrackedEntity,
    /// `None` until the driver picks the entity up.
    pub status: Option<GeocodingStatus>,
    pub resolved: Option<ResolvedLocation>,
}

#[derive(Default)]
struct SessionState {
    order: Vec<String>,
    entities: HashMap<String, TrackedState>,
    submitted: HashSet<String>,
}

impl SessionState {
    fn remember(&mut self, entity: &TrackedEntity) {
        if let Some(known) = self.entities.get_mut(&entity.id) {
            if known.entity.geocodable_location().is_none()
                && entity.geocodable_location().is_some()
            {
                known.entity.location = entity.location.clone();
            }
            return;
        }
        self.order.push(entity.id.clone());
        self.entities.insert(
            entity.id.clone(),
            TrackedState {
                entity: entity.clone(),
                status: None,
                resolved: None,
            },
        );
    }

    fn apply(&mut self, update: &StatusUpdate) {
        if update.status == GeocodingStatus::Pending {
            self.submitted.insert(update.entity_id.clone());
        }
        let Some(state) = self.entities.get_mut(&update.entity_id) else {
            return;
        };
        if state.status.map(|s| s.is_terminal()).unwrap_or(false) {
            return;
        }
        state.status = Some(update.status);
        state.resolved = update.payload.clone();
    }
}

pub struct ListenerSession {
    driver: Arc<BatchGeocoder>,
    state: Arc<Mutex<SessionState>>,
    forward: Option<StatusObserver>,
}

impl ListenerSession {
    pub fn new(driver: Arc<BatchGeocoder>) -> Self {
        Self {
            driver,
            state: Arc::new(Mutex::new(SessionState::default())),
            forward: None,
        }
    }

    /// Every status update is passed on to `observer` after the session has
    /// recorded it.
    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.forward = Some(observer);
        self
    }

    /// Submits the entities this session has never handed to the driver.
    ///
    /// An identity only counts as submitted once the driver reports it
    /// `Pending`, so entities from a call the driver dropped stay eligible for
    /// the next call. Returns `None` when the driver dropped the call.
    pub async fn observe(&self, entities: &[TrackedEntity]) -> Option<BatchStats> {
        let fresh: Vec<TrackedEntity> = {
            let mut state = self.state.lock();
            let mut seen_now = HashSet::new();
            let mut fresh = Vec::new();
            for entity in entities {
                state.remember(entity);
                if entity.geocodable_location().is_none()
                    || state.submitted.contains(&entity.id)
                    || !seen_now.insert(entity.id.clone())
                {
                    continue;
                }
                fresh.push(entity.clone());
            }
            fresh
        };

        if fresh.is_empty() {
            return Some(BatchStats::default());
        }

        debug!(target: "listener_session", fresh = fresh.len(), "submitting newly seen entities");
        let observer = self.recording_observer();
        self.driver.geocode_batch(&fresh, &observer).await
    }

    /// Feeds each batch of the stream through [`observe`](Self::observe) in
    /// order until the stream ends. Batches never overlap, so none are
    /// dropped by the driver's in-flight guard unless another caller shares
    /// it.
    pub async fn run<S>(&self, events: S) -> BatchStats
    where
        S: Stream<Item = Vec<TrackedEntity>>,
    {
        pin_mut!(events);
        let mut totals = BatchStats::default();
        while let Some(batch) = events.next().await {
            if let Some(stats) = self.observe(&batch).await {
                totals.submitted += stats.submitted;
                totals.succeeded += stats.succeeded;
                totals.failed += stats.failed;
            }
        }
        totals
    }

    pub fn snapshot(&self) -> Vec<TrackedState> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect()
    }

    pub fn resolved_points(&self) -> Vec<(String, ResolvedLocation)> {
        self.snapshot()
            .into_iter()
            .filter_map(|tracked| tracked.resolved.map(|resolved| (tracked.entity.id, resolved)))
            .collect()
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    fn recording_observer(&self) -> StatusObserver {
        let state = Arc::clone(&self.state);
        let forward = self.forward.clone();
        Arc::new(move |update: StatusUpdate| {
            state.lock().apply(&update);
            if let Some(callback) = &forward {
                callback(update);
            }
        })
    }
}
