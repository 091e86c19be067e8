mod batch;
mod cache;
pub mod commands;
mod config;
mod db;
mod errors;
mod provider;
mod resolver;
mod session;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use batch::{
    derive_country, BatchGeocoder, BatchStats, GeocodingStatus, ResolvedLocation, StatusObserver,
    StatusUpdate, TrackedEntity,
};
pub use cache::{
    CacheRecord, CacheStats, CacheStore, InvalidRecord, LocationKey, MemoryCacheStore,
    ResolvedRecord, SqliteCacheStore,
};
pub use commands::CacheHealth;
pub use config::{AppConfig, PublicAppConfig};
pub use db::{bootstrap, DatabaseBootstrap, DatabaseContext};
pub use errors::{AppError, AppResult};
pub use provider::{CandidateResult, GeocodeProvider, NominatimClient, SearchOptions};
pub use resolver::CachedGeocoder;
pub use session::{ListenerSession, TrackedState};

/// Wires the persistent cache, the provider client, the resolver and the
/// batch driver together from one configuration.
pub struct GeocodingContext {
    config: AppConfig,
    db_path: PathBuf,
    db_recovered: bool,
    store: Arc<SqliteCacheStore>,
    geocoder: Arc<CachedGeocoder>,
    batch: Arc<BatchGeocoder>,
}

impl GeocodingContext {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        let provider = Arc::new(NominatimClient::new(&config)?);
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: AppConfig, provider: Arc<dyn GeocodeProvider>) -> AppResult<Self> {
        let DatabaseBootstrap {
            context: DatabaseContext { connection, path },
            recovered,
        } = bootstrap(&config.data_dir, &config.database_file_name)?;

        let store = Arc::new(SqliteCacheStore::new(Arc::new(Mutex::new(connection))));
        let geocoder = Arc::new(
            CachedGeocoder::new(store.clone(), provider)
                .with_defaults(SearchOptions::with_limit(config.result_limit)),
        );
        let batch = Arc::new(BatchGeocoder::new(
            Arc::clone(&geocoder),
            Duration::from_millis(config.batch_delay_ms),
        ));

        info!(
            path = %path.display(),
            recovered,
            provider = %config.geocoder_base_url,
            batch_delay_ms = batch.delay().as_millis() as u64,
            "geocoding context initialized"
        );

        Ok(Self {
            config,
            db_path: path,
            db_recovered: recovered,
            store,
            geocoder,
            batch,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn store(&self) -> &SqliteCacheStore {
        &self.store
    }

    pub fn geocoder(&self) -> Arc<CachedGeocoder> {
        Arc::clone(&self.geocoder)
    }

    pub fn batch(&self) -> Arc<BatchGeocoder> {
        Arc::clone(&self.batch)
    }

    /// A fresh session sharing this context's driver and its in-flight guard.
    pub fn session(&self) -> ListenerSession {
        ListenerSession::new(self.batch())
    }

    pub fn health(&self) -> AppResult<CacheHealth> {
        Ok(CacheHealth::new(
            self.db_path.to_string_lossy().to_string(),
            self.db_recovered,
            self.store.stats()?,
            self.config.public_profile(),
        ))
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,listener_geocache=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
