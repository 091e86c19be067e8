use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::batch::{BatchStats, StatusObserver, TrackedEntity};
use crate::cache::{CacheStats, LocationKey};
use crate::config::PublicAppConfig;
use crate::errors::{AppError, AppResult};
use crate::provider::{CandidateResult, SearchOptions};
use crate::GeocodingContext;

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub db_path: String,
    pub db_recovered: bool,
    pub cache: CacheStats,
    pub config: PublicAppConfig,
}

impl CacheHealth {
    pub fn new(
        db_path: String,
        db_recovered: bool,
        cache: CacheStats,
        config: PublicAppConfig,
    ) -> Self {
        Self {
            db_path,
            db_recovered,
            cache,
            config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub location: String,
    pub candidates: Vec<CandidateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolves each location in turn. A provider error for one location is
/// reported in its entry and does not stop the others.
pub async fn resolve_locations(
    context: &GeocodingContext,
    locations: &[String],
    limit: Option<u32>,
) -> Vec<ResolveReport> {
    let geocoder = context.geocoder();
    let options = match limit {
        Some(limit) => SearchOptions::with_limit(limit),
        None => geocoder.defaults().clone(),
    };

    let mut reports = Vec::with_capacity(locations.len());
    for location in locations {
        let report = match geocoder.resolve_with(location, &options).await {
            Ok(candidates) => ResolveReport {
                location: location.clone(),
                candidates,
                error: None,
            },
            Err(err) => {
                warn!(?err, location = location.as_str(), "geocoding failed");
                ResolveReport {
                    location: location.clone(),
                    candidates: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        reports.push(report);
    }
    reports
}

pub fn load_entities(path: &Path) -> AppResult<Vec<TrackedEntity>> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        AppError::Path(format!("failed to read {}: {err}", path.display()))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Geocodes the entities listed in a JSON file through a fresh session, so
/// repeated identities in the file are only resolved once.
pub async fn run_batch_file(
    context: &GeocodingContext,
    path: &Path,
    observer: StatusObserver,
) -> AppResult<BatchStats> {
    let entities = load_entities(path)?;
    let session = context.session().with_observer(observer);
    session
        .observe(&entities)
        .await
        .ok_or_else(|| AppError::Config("another geocoding batch is already running".into()))
}

pub fn cache_stats(context: &GeocodingContext) -> AppResult<CacheStats> {
    context.store().stats()
}

pub fn forget_location(context: &GeocodingContext, location: &str) -> AppResult<bool> {
    context.store().forget(&LocationKey::new(location))
}

pub fn clear_invalid(context: &GeocodingContext) -> AppResult<usize> {
    context.store().clear_invalid()
}
