use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cache::{CacheRecord, CacheStore, LocationKey};
use crate::errors::{AppError, AppResult};
use crate::provider::{CandidateResult, GeocodeProvider, SearchOptions};

type Responder = dyn Fn(&str) -> AppResult<Vec<CandidateResult>> + Send + Sync;

/// Provider double that answers from a closure and records every query.
pub struct ScriptedProvider {
    respond: Box<Responder>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str) -> AppResult<Vec<CandidateResult>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl GeocodeProvider for ScriptedProvider {
    async fn fetch_candidates(
        &self,
        location: &str,
        _options: &SearchOptions,
    ) -> AppResult<Vec<CandidateResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(location.to_string());
        (self.respond)(location)
    }
}

/// Cache whose reads and/or writes always fail.
pub struct BrokenCache {
    pub fail_reads: bool,
}

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &LocationKey) -> AppResult<Option<CacheRecord>> {
        if self.fail_reads {
            Err(AppError::Cache("read refused".into()))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, _key: &LocationKey, _record: &CacheRecord) -> AppResult<()> {
        Err(AppError::Cache("write refused".into()))
    }
}

pub fn candidate(name: &str, lat: &str, lon: &str, display_name: &str) -> CandidateResult {
    CandidateResult {
        place_id: 1,
        lat: lat.into(),
        lon: lon.into(),
        display_name: display_name.into(),
        name: name.into(),
        location_type: "city".into(),
        ..CandidateResult::default()
    }
}

pub fn new_york() -> CandidateResult {
    candidate("New York", "40.7128", "-74.0060", "New York, NY, USA")
}

/// Provider that signals `entered` and then blocks until `release` fires.
pub struct GatedProvider {
    pub entered: Notify,
    pub release: Notify,
}

impl GatedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl GeocodeProvider for GatedProvider {
    async fn fetch_candidates(
        &self,
        _location: &str,
        _options: &SearchOptions,
    ) -> AppResult<Vec<CandidateResult>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(vec![new_york()])
    }
}
