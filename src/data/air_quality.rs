//! Live air-quality provider (OpenAQ).
//!
//! Fetches recent measurements near a coordinate, averages them per
//! pollutant and derives a US EPA AQI from PM2.5 (or PM10 when PM2.5 is
//! not reported).
//!
//! API: `https://api.openaq.org/v3/measurements`
//! Auth: optional `X-API-Key` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{query_cache_key, Upstream};
use crate::cache::CacheKey;
use crate::types::{
    round1, AirQualityData, Category, EchoError, EnvironmentalData, PollutantUnits, Pollutants,
    ProviderQuery,
};

/// Measurements requested per call.
const MEASUREMENT_LIMIT: u32 = 10;

/// OpenAQ caps the search radius at 25 km.
const MAX_RADIUS_M: f64 = 25_000.0;

/// AQI reported when no particulate reading is available.
const DEFAULT_AQI: u32 = 50;

// ---------------------------------------------------------------------------
// AQI
// ---------------------------------------------------------------------------

/// US EPA PM2.5 breakpoints: (conc_low, conc_high, aqi_low, aqi_high).
const PM25_BREAKPOINTS: [(f64, f64, f64, f64); 6] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.0, 35.4, 50.0, 100.0),
    (35.4, 55.4, 100.0, 150.0),
    (55.4, 150.4, 150.0, 200.0),
    (150.4, 250.4, 200.0, 300.0),
    (250.4, 500.0, 300.0, 500.0),
];

/// AQI for a PM2.5 concentration in µg/m³, capped at 500.
pub fn aqi_from_pm25(concentration: f64) -> u32 {
    if !concentration.is_finite() || concentration <= 0.0 {
        return 0;
    }
    for (c_lo, c_hi, a_lo, a_hi) in PM25_BREAKPOINTS {
        if concentration <= c_hi {
            let aqi = a_lo + (a_hi - a_lo) / (c_hi - c_lo) * (concentration - c_lo);
            return aqi.round() as u32;
        }
    }
    500
}

/// AQI from averaged readings: PM2.5 first, then PM10 × 0.5, else 50.
pub fn compute_aqi(pm25: Option<f64>, pm10: Option<f64>) -> u32 {
    let estimate = match (pm25, pm10) {
        (Some(p), _) if p > 0.0 => p,
        (_, Some(p)) if p > 0.0 => p * 0.5,
        _ => return DEFAULT_AQI,
    };
    aqi_from_pm25(estimate)
}

// ---------------------------------------------------------------------------
// OpenAQ response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParameterField {
    Name(String),
    Detail {
        name: String,
        #[serde(default)]
        units: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Measurement {
    parameter: ParameterField,
    value: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl Measurement {
    fn name(&self) -> String {
        let raw = match &self.parameter {
            ParameterField::Name(n) => n,
            ParameterField::Detail { name, .. } => name,
        };
        raw.to_lowercase().replace(['.', '_'], "")
    }

    fn unit(&self) -> Option<String> {
        self.unit.clone().or_else(|| match &self.parameter {
            ParameterField::Detail { units, .. } => units.clone(),
            ParameterField::Name(_) => None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MeasurementsResponse {
    #[serde(default)]
    results: Vec<Measurement>,
}

#[derive(Default)]
struct Average {
    sum: f64,
    count: u32,
    unit: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenAqProvider {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAqProvider {
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OpenAQ HTTP client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    fn normalise(resp: MeasurementsResponse) -> Result<AirQualityData> {
        let first = resp.results.first().ok_or_else(|| EchoError::Upstream {
            provider: "openaq".into(),
            message: "no measurements near this location".into(),
        })?;
        let city = first.city.clone().unwrap_or_else(|| "Unknown".into());
        let country = first.country.clone().unwrap_or_else(|| "Unknown".into());

        let mut averages: HashMap<String, Average> = HashMap::new();
        for m in &resp.results {
            if !m.value.is_finite() {
                continue;
            }
            let entry = averages.entry(m.name()).or_default();
            entry.sum += m.value;
            entry.count += 1;
            if entry.unit.is_none() {
                entry.unit = m.unit();
            }
        }

        let value = |name: &str| {
            averages
                .get(name)
                .filter(|a| a.count > 0)
                .map(|a| a.sum / f64::from(a.count))
        };
        let defaults = PollutantUnits::default();
        let unit = |name: &str, default: String| {
            averages.get(name).and_then(|a| a.unit.clone()).unwrap_or(default)
        };

        let pm25 = value("pm25");
        let pm10 = value("pm10");

        Ok(AirQualityData {
            aqi: compute_aqi(pm25, pm10),
            pollutants: Pollutants {
                pm25: round1(pm25.unwrap_or(0.0)),
                pm10: round1(pm10.unwrap_or(0.0)),
                no2: round1(value("no2").unwrap_or(0.0)),
                o3: round1(value("o3").unwrap_or(0.0)),
                so2: round1(value("so2").unwrap_or(0.0)),
                co: round1(value("co").unwrap_or(0.0)),
            },
            units: PollutantUnits {
                pm25: unit("pm25", defaults.pm25),
                pm10: unit("pm10", defaults.pm10),
                no2: unit("no2", defaults.no2),
                o3: unit("o3", defaults.o3),
                so2: unit("so2", defaults.so2),
                co: unit("co", defaults.co),
            },
            city,
            country,
            data_quality: "real".into(),
        })
    }
}

#[async_trait]
impl Upstream for OpenAqProvider {
    fn category(&self) -> Category {
        Category::AirQuality
    }

    fn source(&self) -> String {
        "OpenAQ".into()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        query_cache_key("openaq", query)
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        let radius_m = (query.radius_km * 1000.0).clamp(1.0, MAX_RADIUS_M).round();
        let url = format!(
            "{}/measurements?coordinates={},{}&radius={}&limit={MEASUREMENT_LIMIT}&sort=datetime&order=desc",
            self.base_url, query.location.lng, query.location.lat, radius_m
        );

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key.expose_secret());
        }

        let resp = request.send().await.context("OpenAQ request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(EchoError::Upstream {
                provider: "openaq".into(),
                message: format!("HTTP {status}"),
            }
            .into());
        }

        let body: MeasurementsResponse =
            resp.json().await.context("Failed to parse OpenAQ response")?;
        let data = Self::normalise(body)?;

        debug!(lat = query.location.lat, lng = query.location.lng, aqi = data.aqi, "OpenAQ fetched");
        Ok(EnvironmentalData::AirQuality(data))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aqi_breakpoints() {
        assert_eq!(aqi_from_pm25(0.0), 0);
        assert_eq!(aqi_from_pm25(12.0), 50);
        assert_eq!(aqi_from_pm25(35.4), 100);
        assert_eq!(aqi_from_pm25(55.4), 150);
        assert_eq!(aqi_from_pm25(150.4), 200);
        assert_eq!(aqi_from_pm25(250.4), 300);
        assert_eq!(aqi_from_pm25(500.0), 500);
        assert_eq!(aqi_from_pm25(900.0), 500);
    }

    #[test]
    fn test_aqi_is_monotonic() {
        let mut last = 0;
        for tenth in 0..5000 {
            let aqi = aqi_from_pm25(f64::from(tenth) / 10.0);
            assert!(aqi >= last, "AQI dropped at {}", f64::from(tenth) / 10.0);
            last = aqi;
        }
    }

    #[test]
    fn test_aqi_interpolates_within_segment() {
        // Midpoint of the 35.4–55.4 segment.
        assert_eq!(aqi_from_pm25(45.4), 125);
    }

    #[test]
    fn test_compute_aqi_fallbacks() {
        assert_eq!(compute_aqi(Some(12.0), Some(100.0)), 50);
        assert_eq!(compute_aqi(None, Some(24.0)), 50);
        assert_eq!(compute_aqi(Some(0.0), Some(70.8)), 100);
        assert_eq!(compute_aqi(None, None), DEFAULT_AQI);
    }

    #[test]
    fn test_normalise_averages_per_pollutant() {
        let resp: MeasurementsResponse = serde_json::from_value(json!({
            "results": [
                {"parameter": "pm25", "value": 10.0, "unit": "µg/m³", "city": "Sibu", "country": "MY"},
                {"parameter": "pm25", "value": 14.0, "unit": "µg/m³"},
                {"parameter": {"name": "no2", "units": "ppb"}, "value": 21.0},
                {"parameter": "PM10", "value": 30.0}
            ]
        }))
        .unwrap();
        let data = OpenAqProvider::normalise(resp).unwrap();
        assert_eq!(data.pollutants.pm25, 12.0);
        assert_eq!(data.aqi, 50);
        assert_eq!(data.pollutants.no2, 21.0);
        assert_eq!(data.units.no2, "ppb");
        assert_eq!(data.pollutants.pm10, 30.0);
        assert_eq!(data.units.co, "mg/m³");
        assert_eq!(data.city, "Sibu");
        assert_eq!(data.data_quality, "real");
    }

    #[test]
    fn test_normalise_empty_is_an_error() {
        let resp: MeasurementsResponse = serde_json::from_value(json!({"results": []})).unwrap();
        assert!(OpenAqProvider::normalise(resp).is_err());
    }
}
