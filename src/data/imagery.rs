//! NASA Earth imagery provider.
//!
//! API: `https://api.nasa.gov/planetary/earth/assets`
//! Auth: `api_key` query parameter (`DEMO_KEY` when none is configured).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::Upstream;
use crate::cache::CacheKey;
use crate::types::{
    Category, EchoError, EnvironmentalData, ImageryData, ProviderQuery, DEFAULT_IMAGERY_DIM,
};

const DEMO_KEY: &str = "DEMO_KEY";

#[derive(Debug, Deserialize)]
struct AssetResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    cloud_score: Option<f64>,
}

pub struct NasaImagery {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl NasaImagery {
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build NASA HTTP client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    fn normalise(resp: AssetResponse, dim: f64) -> Result<ImageryData> {
        if resp.url.is_none() && resp.id.is_none() {
            return Err(EchoError::Upstream {
                provider: "nasa".into(),
                message: "no imagery asset for this location".into(),
            }
            .into());
        }
        Ok(ImageryData {
            id: resp.id,
            url: resp.url,
            date: resp.date,
            dim,
            cloud_score: resp.cloud_score,
        })
    }
}

#[async_trait]
impl Upstream for NasaImagery {
    fn category(&self) -> Category {
        Category::Imagery
    }

    fn source(&self) -> String {
        "NASA Earth Imagery".into()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        let dim = query.option_f64("dim").unwrap_or(DEFAULT_IMAGERY_DIM);
        CacheKey::new("nasa_imagery")
            .coord("lat", query.location.lat)
            .coord("lng", query.location.lng)
            .param("dim", dim)
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        let dim = query.option_f64("dim").unwrap_or(DEFAULT_IMAGERY_DIM);
        let key = self
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .unwrap_or(DEMO_KEY);
        let url = format!(
            "{}/planetary/earth/assets?lat={}&lon={}&dim={dim}&api_key={}",
            self.base_url,
            query.location.lat,
            query.location.lng,
            urlencoding::encode(key)
        );

        let resp = self.http.get(&url).send().await.context("NASA imagery request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(EchoError::Upstream {
                provider: "nasa".into(),
                message: format!("HTTP {status}"),
            }
            .into());
        }

        let body: AssetResponse = resp.json().await.context("Failed to parse NASA imagery response")?;
        let data = Self::normalise(body, dim)?;
        debug!(lat = query.location.lat, lng = query.location.lng, date = ?data.date, "NASA imagery fetched");
        Ok(EnvironmentalData::Imagery(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use serde_json::json;

    #[test]
    fn test_normalise_asset() {
        let resp: AssetResponse = serde_json::from_value(json!({
            "id": "LC8_L1T_TOA/LC81270592016",
            "url": "https://earthengine.googleapis.com/thumb",
            "date": "2016-02-01T03:05:16",
            "resource": {"dataset": "LC8_L1T"}
        }))
        .unwrap();
        let data = NasaImagery::normalise(resp, 0.15).unwrap();
        assert_eq!(data.dim, 0.15);
        assert_eq!(data.date.as_deref(), Some("2016-02-01T03:05:16"));
        assert!(data.cloud_score.is_none());
    }

    #[test]
    fn test_normalise_empty_is_an_error() {
        let resp: AssetResponse = serde_json::from_value(json!({})).unwrap();
        assert!(NasaImagery::normalise(resp, 0.1).is_err());
    }

    #[test]
    fn test_cache_key_ignores_radius_but_not_dim() {
        let p = NasaImagery::new("https://api.nasa.gov", None, Duration::from_secs(1)).unwrap();
        let here = Coordinate { lat: 2.3, lng: 111.82 };
        let a = p.cache_key(&ProviderQuery::new(here, 5.0));
        let b = p.cache_key(&ProviderQuery::new(here, 10.0));
        let c = p.cache_key(&ProviderQuery::new(here, 5.0).with_option("dim", 0.3));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
