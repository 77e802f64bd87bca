//! Live climate provider.
//!
//! Uses the free Open-Meteo forecast API (no key required) for current
//! conditions plus the past 30 days of daily aggregates, normalised into
//! the climate schema.
//!
//! API: `https://api.open-meteo.com/v1/forecast`
//! Auth: None required.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::synthetic::climate_zone;
use super::{query_cache_key, Upstream};
use crate::cache::CacheKey;
use crate::types::{
    round1, Category, ClimateData, EchoError, EnvironmentalData, Humidity, Precipitation,
    ProviderQuery, Temperature, Wind,
};

/// Days of history averaged into the climate summary.
const PAST_DAYS: u32 = 30;

// ---------------------------------------------------------------------------
// Open-Meteo response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    current: Option<OpenMeteoCurrent>,
    #[serde(default)]
    daily: Option<OpenMeteoDaily>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    #[serde(default)]
    temperature_2m: Option<f64>,
    #[serde(default)]
    relative_humidity_2m: Option<f64>,
    #[serde(default)]
    wind_speed_10m: Option<f64>,
    #[serde(default)]
    wind_direction_10m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenMeteoClimate {
    http: Client,
    base_url: String,
}

impl OpenMeteoClimate {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("echosphere/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Open-Meteo HTTP client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// Normalise an Open-Meteo response. Missing current readings are an
    /// error; missing history falls back to the current temperature.
    fn normalise(query: &ProviderQuery, resp: OpenMeteoResponse) -> Result<ClimateData> {
        let current = resp.current.ok_or_else(|| EchoError::Upstream {
            provider: "open-meteo".into(),
            message: "response has no current conditions".into(),
        })?;
        let temp_now = current.temperature_2m.ok_or_else(|| EchoError::Upstream {
            provider: "open-meteo".into(),
            message: "response has no current temperature".into(),
        })?;

        let daily = resp.daily.unwrap_or(OpenMeteoDaily {
            temperature_2m_max: Vec::new(),
            temperature_2m_min: Vec::new(),
            temperature_2m_mean: Vec::new(),
            precipitation_sum: Vec::new(),
        });
        let maxes = present(&daily.temperature_2m_max);
        let mins = present(&daily.temperature_2m_min);
        let means = present(&daily.temperature_2m_mean);
        let rain = present(&daily.precipitation_sum);

        let average = mean(&means).unwrap_or(temp_now);
        let min = mins.iter().copied().fold(f64::INFINITY, f64::min);
        let max = maxes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Scale the observed window to a 30-day month.
        let monthly = if rain.is_empty() {
            0.0
        } else {
            rain.iter().sum::<f64>() * 30.0 / rain.len() as f64
        };

        Ok(ClimateData {
            temperature: Temperature {
                current: round1(temp_now),
                average: round1(average),
                min: round1(if min.is_finite() { min } else { temp_now }),
                max: round1(if max.is_finite() { max } else { temp_now }),
                unit: "°C".into(),
            },
            precipitation: Precipitation {
                monthly_avg: round1(monthly),
                annual: round1(monthly * 12.0),
                unit: "mm".into(),
            },
            humidity: Humidity {
                current: round1(current.relative_humidity_2m.unwrap_or(0.0)),
                unit: "%".into(),
            },
            wind: Wind {
                speed: round1(current.wind_speed_10m.unwrap_or(0.0)),
                direction: current.wind_direction_10m.unwrap_or(0.0).rem_euclid(360.0) as u16,
                unit: "m/s".into(),
            },
            climate_zone: climate_zone(query.location.lat).into(),
        })
    }
}

#[async_trait]
impl Upstream for OpenMeteoClimate {
    fn category(&self) -> Category {
        Category::Climate
    }

    fn source(&self) -> String {
        "Open-Meteo".into()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        // Climate does not depend on the radius.
        query_cache_key("open_meteo", &ProviderQuery::new(query.location, 0.0))
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        let url = format!(
            "{}/forecast?latitude={}&longitude={}\
             &current=temperature_2m,relative_humidity_2m,wind_speed_10m,wind_direction_10m\
             &daily=temperature_2m_max,temperature_2m_min,temperature_2m_mean,precipitation_sum\
             &past_days={PAST_DAYS}&forecast_days=1&wind_speed_unit=ms&timezone=UTC",
            self.base_url, query.location.lat, query.location.lng
        );

        let resp = self.http.get(&url).send().await.context("Open-Meteo request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(EchoError::Upstream {
                provider: "open-meteo".into(),
                message: format!("HTTP {status}"),
            }
            .into());
        }

        let data: OpenMeteoResponse =
            resp.json().await.context("Failed to parse Open-Meteo response")?;
        let climate = Self::normalise(query, data)?;

        debug!(
            lat = query.location.lat,
            lng = query.location.lng,
            temperature = climate.temperature.current,
            "Open-Meteo climate fetched"
        );
        Ok(EnvironmentalData::Climate(climate))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use serde_json::json;

    fn query() -> ProviderQuery {
        ProviderQuery::new(Coordinate { lat: 2.30, lng: 111.82 }, 5.0)
    }

    #[test]
    fn test_normalise_full_response() {
        let resp: OpenMeteoResponse = serde_json::from_value(json!({
            "current": {
                "temperature_2m": 31.46,
                "relative_humidity_2m": 78.0,
                "wind_speed_10m": 3.21,
                "wind_direction_10m": 370.0
            },
            "daily": {
                "temperature_2m_max": [33.0, 34.5, null],
                "temperature_2m_min": [24.0, 23.5, 25.0],
                "temperature_2m_mean": [28.0, 29.0, 27.0],
                "precipitation_sum": [10.0, 0.0, 5.0]
            }
        }))
        .unwrap();

        let c = OpenMeteoClimate::normalise(&query(), resp).unwrap();
        assert_eq!(c.temperature.current, 31.5);
        assert_eq!(c.temperature.average, 28.0);
        assert_eq!(c.temperature.min, 23.5);
        assert_eq!(c.temperature.max, 34.5);
        assert_eq!(c.precipitation.monthly_avg, 150.0);
        assert_eq!(c.precipitation.annual, 1800.0);
        assert_eq!(c.humidity.current, 78.0);
        assert_eq!(c.wind.direction, 10);
        assert_eq!(c.climate_zone, "tropical");
    }

    #[test]
    fn test_normalise_without_history() {
        let resp: OpenMeteoResponse =
            serde_json::from_value(json!({"current": {"temperature_2m": 20.0}})).unwrap();
        let c = OpenMeteoClimate::normalise(&query(), resp).unwrap();
        assert_eq!(c.temperature.min, 20.0);
        assert_eq!(c.temperature.max, 20.0);
        assert_eq!(c.precipitation.monthly_avg, 0.0);
    }

    #[test]
    fn test_normalise_requires_current_temperature() {
        let resp: OpenMeteoResponse = serde_json::from_value(json!({"current": {}})).unwrap();
        assert!(OpenMeteoClimate::normalise(&query(), resp).is_err());
        let resp: OpenMeteoResponse = serde_json::from_value(json!({})).unwrap();
        assert!(OpenMeteoClimate::normalise(&query(), resp).is_err());
    }

    #[test]
    fn test_cache_key_ignores_radius() {
        let p = OpenMeteoClimate::new("https://api.open-meteo.com/v1", Duration::from_secs(1)).unwrap();
        let a = p.cache_key(&query());
        let b = p.cache_key(&ProviderQuery::new(query().location, 20.0));
        assert_eq!(a, b);
    }
}
