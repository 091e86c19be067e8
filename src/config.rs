use std::path::PathBuf;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_BATCH_DELAY_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_base_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_timeout_secs: Option<u64>,
    pub result_limit: u32,
    pub batch_delay_ms: u64,
    pub data_dir: PathBuf,
    pub database_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_base_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_timeout_secs: Option<u64>,
    pub result_limit: u32,
    pub batch_delay_ms: u64,
    pub data_dir: String,
    pub database_file_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            geocoder_base_url: DEFAULT_GEOCODER_BASE_URL.to_string(),
            geocoder_user_agent: default_user_agent(),
            geocoder_timeout_secs: None,
            result_limit: 1,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            data_dir: PathBuf::from("data"),
            database_file_name: "geocode-cache.db".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            geocoder_base_url: non_empty("GEOCODER_BASE_URL")
                .unwrap_or(defaults.geocoder_base_url),
            geocoder_user_agent: non_empty("GEOCODER_USER_AGENT")
                .unwrap_or(defaults.geocoder_user_agent),
            geocoder_timeout_secs: env::var("GEOCODER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0),
            result_limit: parse_u32("GEOCODER_RESULT_LIMIT", defaults.result_limit).max(1),
            batch_delay_ms: parse_u64("GEOCODE_BATCH_DELAY_MS", defaults.batch_delay_ms),
            data_dir: non_empty("GEOCACHE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            database_file_name: non_empty("DATABASE_FILE_NAME")
                .unwrap_or(defaults.database_file_name),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_base_url: self.geocoder_base_url.clone(),
            geocoder_user_agent: self.geocoder_user_agent.clone(),
            geocoder_timeout_secs: self.geocoder_timeout_secs,
            result_limit: self.result_limit,
            batch_delay_ms: self.batch_delay_ms,
            data_dir: self.data_dir.to_string_lossy().to_string(),
            database_file_name: self.database_file_name.clone(),
        }
    }
}

fn default_user_agent() -> String {
    format!("listener-geocache/{}", env!("CARGO_PKG_VERSION"))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_falls_back_on_garbage() {
        env::set_var("GEOCODER_BASE_URL", "http://localhost:8080");
        env::set_var("GEOCODER_USER_AGENT", "listener-dashboard-test");
        env::set_var("GEOCODER_RESULT_LIMIT", "0");
        env::set_var("GEOCODE_BATCH_DELAY_MS", "not-a-number");
        env::set_var("GEOCODER_TIMEOUT_SECS", "15");
        env::set_var("DATABASE_FILE_NAME", "custom.db");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.geocoder_base_url, "http://localhost:8080");
        assert_eq!(public.geocoder_user_agent, "listener-dashboard-test");
        assert_eq!(public.result_limit, 1);
        assert_eq!(public.batch_delay_ms, DEFAULT_BATCH_DELAY_MS);
        assert_eq!(public.geocoder_timeout_secs, Some(15));
        assert_eq!(public.database_file_name, "custom.db");
    }

    #[test]
    fn default_user_agent_identifies_the_crate() {
        let config = AppConfig::default();
        assert!(config.geocoder_user_agent.starts_with("listener-geocache/"));
        assert_eq!(config.batch_delay_ms, 1_000);
        assert!(config.geocoder_timeout_secs.is_none());
    }
}
