//! Cache-aside geocoding.
//!
//! [`CachedGeocoder::resolve_with`] consults the cache before the provider and
//! writes exactly one record back after every miss. Failures are remembered
//! forever as `Invalid` tombstones, so a location that failed once never
//! reaches the provider again until someone clears the cache by hand.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{now_epoch_ms, CacheRecord, CacheStore, LocationKey, ResolvedRecord};
use crate::errors::AppResult;
use crate::provider::{CandidateResult, GeocodeProvider, SearchOptions};

const NO_RESULTS: &str = "no results from API";
const NO_COORDINATES: &str = "no coordinates found";

pub struct CachedGeocoder {
    cache: Arc<dyn CacheStore>,
    provider: Arc<dyn GeocodeProvider>,
    defaults: SearchOptions,
}

impl CachedGeocoder {
    pub fn new(cache: Arc<dyn CacheStore>, provider: Arc<dyn GeocodeProvider>) -> Self {
        Self {
            cache,
            provider,
            defaults: SearchOptions::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: SearchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &SearchOptions {
        &self.defaults
    }

    pub async fn resolve(&self, location: &str) -> AppResult<Vec<CandidateResult>> {
        self.resolve_with(location, &self.defaults).await
    }

    /// Returns the provider's candidates for `location`, or a single candidate
    /// rebuilt from the cache. Provider errors are returned only on a genuine
    /// miss, after the tombstone write has been attempted.
    pub async fn resolve_with(
        &self,
        location: &str,
        options: &SearchOptions,
    ) -> AppResult<Vec<CandidateResult>> {
        if location.trim().is_empty() {
            return Ok(Vec::new());
        }

        let key = LocationKey::new(location);
        match self.lookup(&key).await {
            Some(CacheRecord::Invalid(record)) => {
                debug!(
                    target: "geocode_cache",
                    key = %key,
                    reason = %record.error_message,
                    "cached as unresolvable; skipping provider"
                );
                return Ok(Vec::new());
            }
            Some(CacheRecord::Resolved(record)) => {
                debug!(target: "geocode_cache", key = %key, "cache hit");
                return Ok(vec![candidate_from_record(&record)]);
            }
            None => {
                debug!(target: "geocode_cache", key = %key, "cache miss");
            }
        }

        let candidates = match self.provider.fetch_candidates(location, options).await {
            Ok(candidates) => candidates,
            Err(err) => {
                self.store(&key, CacheRecord::invalid(err.to_string())).await;
                return Err(err);
            }
        };

        let Some(first) = candidates.first() else {
            self.store(&key, CacheRecord::invalid(NO_RESULTS)).await;
            return Ok(Vec::new());
        };

        match first.coordinates() {
            Some((latitude, longitude)) => {
                let record = record_from_candidate(first, latitude, longitude);
                self.store(&key, CacheRecord::Resolved(record)).await;
                Ok(candidates)
            }
            None => {
                self.store(&key, CacheRecord::invalid(NO_COORDINATES)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn lookup(&self, key: &LocationKey) -> Option<CacheRecord> {
        match self.cache.get(key).await {
            Ok(record) => record,
            Err(err) => {
                warn!(target: "geocode_cache", ?err, key = %key, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &LocationKey, record: CacheRecord) {
        if let Err(err) = self.cache.set(key, &record).await {
            warn!(target: "geocode_cache", ?err, key = %key, "failed to write geocode cache entry");
        }
    }
}

fn record_from_candidate(candidate: &CandidateResult, latitude: f64, longitude: f64) -> ResolvedRecord {
    ResolvedRecord {
        latitude,
        longitude,
        display_name: candidate.display_name.clone(),
        place_id: candidate.place_id,
        location_type: candidate.location_type.clone(),
        canonical_name: candidate.name.clone(),
        cached_at_epoch_ms: now_epoch_ms(),
    }
}

fn candidate_from_record(record: &ResolvedRecord) -> CandidateResult {
    CandidateResult {
        place_id: record.place_id,
        lat: record.latitude.to_string(),
        lon: record.longitude.to_string(),
        display_name: record.display_name.clone(),
        name: record.canonical_name.clone(),
        location_type: record.location_type.clone(),
        ..CandidateResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::errors::AppError;
    use crate::testing::{candidate, new_york, BrokenCache, ScriptedProvider};

    fn geocoder(cache: Arc<MemoryCacheStore>, provider: Arc<ScriptedProvider>) -> CachedGeocoder {
        CachedGeocoder::new(cache, provider)
    }

    #[tokio::test]
    async fn caches_success_and_serves_repeat_from_cache() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider = ScriptedProvider::new(|_| Ok(vec![new_york()]));
        let geocoder = geocoder(cache.clone(), provider.clone());

        let first = geocoder.resolve("New York").await.unwrap();
        assert_eq!(first, vec![new_york()]);

        match cache.get(&LocationKey::new("new york")).await.unwrap() {
            Some(CacheRecord::Resolved(record)) => {
                assert_eq!(record.latitude, 40.7128);
                assert_eq!(record.longitude, -74.0060);
                assert_eq!(record.canonical_name, "New York");
                assert_eq!(record.location_type, "city");
            }
            other => panic!("expected resolved record, got {other:?}"),
        }

        let second = geocoder.resolve("New York").await.unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].coordinates(), Some((40.7128, -74.006)));
        assert_eq!(second[0].display_name, "New York, NY, USA");
        assert_eq!(second[0].place_id, 1);
    }

    #[tokio::test]
    async fn empty_response_is_tombstoned_and_never_retried() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider = ScriptedProvider::new(|_| Ok(Vec::new()));
        let geocoder = geocoder(cache.clone(), provider.clone());

        assert!(geocoder.resolve("Nonexistentplacexyz123").await.unwrap().is_empty());
        match cache
            .get(&LocationKey::new("nonexistentplacexyz123"))
            .await
            .unwrap()
        {
            Some(CacheRecord::Invalid(record)) => assert_eq!(record.error_message, NO_RESULTS),
            other => panic!("expected tombstone, got {other:?}"),
        }

        for _ in 0..3 {
            assert!(geocoder.resolve("Nonexistentplacexyz123").await.unwrap().is_empty());
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn case_variants_share_one_cache_entry() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider = ScriptedProvider::new(|_| {
            Ok(vec![candidate("Paris", "48.8566", "2.3522", "Paris, France")])
        });
        let geocoder = geocoder(cache.clone(), provider.clone());

        geocoder.resolve("Paris").await.unwrap();
        let again = geocoder.resolve("paris").await.unwrap();
        geocoder.resolve("PARIS").await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.queries(), vec!["Paris".to_string()]);
        assert_eq!(again[0].name, "Paris");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_recorded_and_surfaced() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider =
            ScriptedProvider::new(|_| Err(AppError::Config("provider returned 503".into())));
        let geocoder = geocoder(cache.clone(), provider.clone());

        let err = geocoder.resolve("Springfield").await.unwrap_err();
        assert!(err.to_string().contains("503"));
        match cache.get(&LocationKey::new("springfield")).await.unwrap() {
            Some(CacheRecord::Invalid(record)) => {
                assert_eq!(record.error_message, "provider returned 503");
            }
            other => panic!("expected tombstone, got {other:?}"),
        }

        assert!(geocoder.resolve("Springfield").await.unwrap().is_empty());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn coordinate_less_candidate_is_tombstoned() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider =
            ScriptedProvider::new(|_| Ok(vec![candidate("Mystery", "", "12.0", "Mystery")]));
        let geocoder = geocoder(cache.clone(), provider.clone());

        assert!(geocoder.resolve("Mystery").await.unwrap().is_empty());
        match cache.get(&LocationKey::new("mystery")).await.unwrap() {
            Some(CacheRecord::Invalid(record)) => assert_eq!(record.error_message, NO_COORDINATES),
            other => panic!("expected tombstone, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn returns_full_candidate_list_on_miss() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider = ScriptedProvider::new(|_| {
            Ok(vec![
                candidate("Portland", "45.5152", "-122.6784", "Portland, Oregon, USA"),
                candidate("Portland", "43.6591", "-70.2568", "Portland, Maine, USA"),
            ])
        });
        let geocoder = geocoder(cache.clone(), provider);

        let results = geocoder
            .resolve_with("Portland", &SearchOptions::with_limit(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        match cache.get(&LocationKey::new("portland")).await.unwrap() {
            Some(CacheRecord::Resolved(record)) => assert_eq!(record.latitude, 45.5152),
            other => panic!("expected resolved record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_cache_writes_do_not_fail_resolution() {
        let provider = ScriptedProvider::new(|_| Ok(vec![new_york()]));
        let geocoder =
            CachedGeocoder::new(Arc::new(BrokenCache { fail_reads: false }), provider.clone());

        assert_eq!(geocoder.resolve("New York").await.unwrap(), vec![new_york()]);
        assert_eq!(geocoder.resolve("New York").await.unwrap(), vec![new_york()]);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn unreadable_cache_falls_through_to_provider() {
        let provider = ScriptedProvider::new(|_| Ok(vec![new_york()]));
        let geocoder =
            CachedGeocoder::new(Arc::new(BrokenCache { fail_reads: true }), provider.clone());

        assert_eq!(geocoder.resolve("New York").await.unwrap().len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn blank_location_touches_nothing() {
        let cache = Arc::new(MemoryCacheStore::new());
        let provider = ScriptedProvider::new(|_| Ok(vec![new_york()]));
        let geocoder = geocoder(cache.clone(), provider.clone());

        assert!(geocoder.resolve("   ").await.unwrap().is_empty());
        assert_eq!(provider.calls(), 0);
        assert!(cache.is_empty());
    }
}
