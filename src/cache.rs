//! Persistent cache of geocoding outcomes keyed by case-folded location.
//!
//! A key holds at most one record. `Resolved` records carry the coordinates of
//! the provider's first candidate; `Invalid` records are permanent tombstones
//! that stop the resolver from ever querying the provider again for that key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Lower-cased location string. Whitespace and punctuation are kept as-is,
/// so `"New York"` and `"New  York"` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationKey(String);

impl LocationKey {
    pub fn new(location: &str) -> Self {
        Self(location.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub place_id: i64,
    pub location_type: String,
    pub canonical_name: String,
    pub cached_at_epoch_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidRecord {
    pub error_message: String,
    pub cached_at_epoch_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheRecord {
    Resolved(ResolvedRecord),
    Invalid(InvalidRecord),
}

impl CacheRecord {
    pub fn invalid(error_message: impl Into<String>) -> Self {
        CacheRecord::Invalid(InvalidRecord {
            error_message: error_message.into(),
            cached_at_epoch_ms: now_epoch_ms(),
        })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, CacheRecord::Invalid(_))
    }

    fn status_tag(&self) -> &'static str {
        match self {
            CacheRecord::Resolved(_) => "resolved",
            CacheRecord::Invalid(_) => "invalid",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub resolved: usize,
    pub invalid: usize,
}

pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &LocationKey) -> AppResult<Option<CacheRecord>>;

    /// Upserts the record for `key`. Concurrent writers race; the last one wins.
    async fn set(&self, key: &LocationKey, record: &CacheRecord) -> AppResult<()>;
}

pub struct SqliteCacheStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn stats(&self) -> AppResult<CacheStats> {
        let conn = self.db.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM geocode_cache GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = CacheStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "resolved" => stats.resolved = count as usize,
                "invalid" => stats.invalid = count as usize,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub fn forget(&self, key: &LocationKey) -> AppResult<bool> {
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM geocode_cache WHERE location_key = ?1",
            [key.as_str()],
        )?;
        Ok(removed > 0)
    }

    pub fn clear_invalid(&self) -> AppResult<usize> {
        let conn = self.db.lock();
        let removed = conn.execute("DELETE FROM geocode_cache WHERE status = 'invalid'", [])?;
        Ok(removed)
    }

    fn read_record(&self, key: &LocationKey) -> AppResult<Option<CacheRecord>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT status, latitude, longitude, display_name, place_id, location_type,
                canonical_name, error_message, cached_at_ms
            FROM geocode_cache
            WHERE location_key = ?1",
            [key.as_str()],
            |row| parse_cache_record(row),
        )
        .optional()
        .map_err(AppError::from)
    }

    fn write_record(&self, key: &LocationKey, record: &CacheRecord) -> AppResult<()> {
        let conn = self.db.lock();
        match record {
            CacheRecord::Resolved(resolved) => conn.execute(
                "INSERT INTO geocode_cache (location_key, status, latitude, longitude, display_name,
                    place_id, location_type, canonical_name, error_message, cached_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)
                ON CONFLICT(location_key) DO UPDATE SET
                    status = excluded.status,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    display_name = excluded.display_name,
                    place_id = excluded.place_id,
                    location_type = excluded.location_type,
                    canonical_name = excluded.canonical_name,
                    error_message = NULL,
                    cached_at_ms = excluded.cached_at_ms",
                (
                    key.as_str(),
                    record.status_tag(),
                    resolved.latitude,
                    resolved.longitude,
                    resolved.display_name.as_str(),
                    resolved.place_id,
                    resolved.location_type.as_str(),
                    resolved.canonical_name.as_str(),
                    resolved.cached_at_epoch_ms,
                ),
            )?,
            CacheRecord::Invalid(invalid) => conn.execute(
                "INSERT INTO geocode_cache (location_key, status, latitude, longitude, display_name,
                    place_id, location_type, canonical_name, error_message, cached_at_ms)
                VALUES (?1, ?2, NULL, NULL, NULL, NULL, NULL, NULL, ?3, ?4)
                ON CONFLICT(location_key) DO UPDATE SET
                    status = excluded.status,
                    latitude = NULL,
                    longitude = NULL,
                    display_name = NULL,
                    place_id = NULL,
                    location_type = NULL,
                    canonical_name = NULL,
                    error_message = excluded.error_message,
                    cached_at_ms = excluded.cached_at_ms",
                (
                    key.as_str(),
                    record.status_tag(),
                    invalid.error_message.as_str(),
                    invalid.cached_at_epoch_ms,
                ),
            )?,
        };
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &LocationKey) -> AppResult<Option<CacheRecord>> {
        self.read_record(key)
    }

    async fn set(&self, key: &LocationKey, record: &CacheRecord) -> AppResult<()> {
        self.write_record(key, record)
    }
}

fn parse_cache_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRecord> {
    let status: String = row.get(0)?;
    let cached_at_epoch_ms: i64 = row.get(8)?;
    if status == "invalid" {
        let error_message: Option<String> = row.get(7)?;
        return Ok(CacheRecord::Invalid(InvalidRecord {
            error_message: error_message.unwrap_or_default(),
            cached_at_epoch_ms,
        }));
    }

    let display_name: Option<String> = row.get(3)?;
    let place_id: Option<i64> = row.get(4)?;
    let location_type: Option<String> = row.get(5)?;
    let canonical_name: Option<String> = row.get(6)?;
    Ok(CacheRecord::Resolved(ResolvedRecord {
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        display_name: display_name.unwrap_or_default(),
        place_id: place_id.unwrap_or_default(),
        location_type: location_type.unwrap_or_default(),
        canonical_name: canonical_name.unwrap_or_default(),
        cached_at_epoch_ms,
    }))
}

#[derive(Default)]
pub struct MemoryCacheStore {
    records: Mutex<HashMap<LocationKey, CacheRecord>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let records = self.records.lock();
        let invalid = records.values().filter(|r| r.is_invalid()).count();
        CacheStats {
            resolved: records.len() - invalid,
            invalid,
        }
    }

    pub fn forget(&self, key: &LocationKey) -> bool {
        self.records.lock().remove(key).is_some()
    }

    pub fn clear_invalid(&self) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_invalid());
        before - records.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &LocationKey) -> AppResult<Option<CacheRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn set(&self, key: &LocationKey, record: &CacheRecord) -> AppResult<()> {
        self.records.lock().insert(key.clone(), record.clone());
        Ok(())
    }
}
