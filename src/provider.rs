use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const DEFAULT_LIMIT: u32 = 1;
const DEFAULT_FORMAT: &str = "json";

/// Query knobs for a provider search. Every field is optional and defaulted
/// on its own, so callers only spell out what they want to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    pub format: Option<String>,
    pub address_details: Option<bool>,
    pub extra_tags: Option<bool>,
    pub name_details: Option<bool>,
}

impl SearchOptions {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).max(1)
    }

    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_FORMAT)
    }

    pub fn address_details(&self) -> bool {
        self.address_details.unwrap_or(true)
    }

    pub fn extra_tags(&self) -> bool {
        self.extra_tags.unwrap_or(false)
    }

    pub fn name_details(&self) -> bool {
        self.name_details.unwrap_or(false)
    }

    fn query_pairs(&self, location: &str) -> Vec<(&'static str, String)> {
        vec![
            ("q", location.to_string()),
            ("format", self.format().to_string()),
            ("limit", self.limit().to_string()),
            ("addressdetails", flag(self.address_details())),
            ("extratags", flag(self.extra_tags())),
            ("namedetails", flag(self.name_details())),
        ]
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

/// One match returned by the geocoding provider. Coordinates normally arrive
/// as decimal strings; numbers are kept as their text and a missing value is
/// left empty so [`coordinates`](Self::coordinates) reports `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    #[serde(default)]
    pub place_id: i64,
    #[serde(default, deserialize_with = "coordinate_text")]
    pub lat: String,
    #[serde(default, deserialize_with = "coordinate_text")]
    pub lon: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub location_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extratags: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namedetails: Option<serde_json::Value>,
}

fn coordinate_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(text)) => text,
        Some(serde_json::Value::Number(number)) => number.to_string(),
        _ => String::new(),
    })
}

impl CandidateResult {
    /// Returns `(latitude, longitude)` when both parse as finite decimal
    /// degrees inside the valid ranges.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat = self.lat.trim().parse::<f64>().ok()?;
        let lon = self.lon.trim().parse::<f64>().ok()?;
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some((lat, lon))
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn fetch_candidates(
        &self,
        location: &str,
        options: &SearchOptions,
    ) -> AppResult<Vec<CandidateResult>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Many(Vec<CandidateResult>),
    One(CandidateResult),
}

impl SearchResponse {
    fn into_candidates(self) -> Vec<CandidateResult> {
        match self {
            SearchResponse::Many(list) => list,
            SearchResponse::One(single) => vec![single],
        }
    }
}

#[derive(Clone)]
pub struct NominatimClient {
    http: Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let mut builder = Client::builder().user_agent(config.geocoder_user_agent.clone());
        if let Some(secs) = config.geocoder_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            base_url: config.geocoder_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn search_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| AppError::Config(format!("invalid geocoder base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("geocoder base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push("search");
        Ok(url)
    }
}

#[async_trait]
impl GeocodeProvider for NominatimClient {
    async fn fetch_candidates(
        &self,
        location: &str,
        options: &SearchOptions,
    ) -> AppResult<Vec<CandidateResult>> {
        let url = self.search_url()?;
        debug!(target: "geocode_provider", location, "querying geocoding provider");

        let response = self
            .http
            .get(url)
            .query(&options.query_pairs(location))
            .send()
            .await?
            .error_for_status()?;

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.into_candidates())
    }
}
