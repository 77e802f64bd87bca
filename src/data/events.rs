//! NASA EONET natural-event provider.
//!
//! Lists wildfires, storms, floods and similar events inside a bounding
//! box around the query point.
//!
//! API: `https://eonet.gsfc.nasa.gov/api/v3/events`
//! Auth: None required.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{query_cache_key, Upstream};
use crate::cache::CacheKey;
use crate::types::{
    Category, Coordinate, DisasterEvent, DisasterEventsData, EchoError, EnvironmentalData,
    ProviderQuery,
};

pub const DEFAULT_STATUS: &str = "open";
pub const DEFAULT_LIMIT: u64 = 50;

/// Mean km per degree of latitude.
const KM_PER_DEG: f64 = 111.32;

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<EonetEvent>,
}

#[derive(Debug, Deserialize)]
struct EonetEvent {
    id: String,
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    categories: Vec<EonetCategory>,
    #[serde(default)]
    geometry: Vec<EonetGeometry>,
}

#[derive(Debug, Deserialize)]
struct EonetCategory {
    title: String,
}

#[derive(Debug, Deserialize)]
struct EonetGeometry {
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    coordinates: Value,
}

impl EonetGeometry {
    /// Only point geometries carry a single usable location.
    fn point(&self) -> Option<Coordinate> {
        if self.kind.as_deref() != Some("Point") {
            return None;
        }
        let lng = self.coordinates.get(0)?.as_f64()?;
        let lat = self.coordinates.get(1)?.as_f64()?;
        Coordinate::new(lat, lng).ok()
    }
}

/// `min_lon,max_lat,max_lon,min_lat` box covering the radius.
pub fn bounding_box(center: Coordinate, radius_km: f64) -> [f64; 4] {
    let dlat = radius_km / KM_PER_DEG;
    let cos = center.lat.to_radians().cos().max(0.01);
    let dlng = (radius_km / (KM_PER_DEG * cos)).min(180.0);
    [
        (center.lng - dlng).max(-180.0),
        (center.lat + dlat).min(90.0),
        (center.lng + dlng).min(180.0),
        (center.lat - dlat).max(-90.0),
    ]
}

pub struct EonetEvents {
    http: Client,
    base_url: String,
}

impl EonetEvents {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build EONET HTTP client")?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn normalise(resp: EventsResponse) -> DisasterEventsData {
        let events = resp
            .events
            .into_iter()
            .map(|e| {
                // Latest observation is last.
                let latest = e.geometry.last();
                DisasterEvent {
                    id: e.id,
                    title: e.title,
                    category: e
                        .categories
                        .first()
                        .map(|c| c.title.clone())
                        .unwrap_or_else(|| "Unknown".into()),
                    date: latest.and_then(|g| g.date.clone()),
                    coordinates: latest.and_then(EonetGeometry::point),
                    link: e.link,
                }
            })
            .collect();
        DisasterEventsData::new(events)
    }
}

#[async_trait]
impl Upstream for EonetEvents {
    fn category(&self) -> Category {
        Category::DisasterEvents
    }

    fn source(&self) -> String {
        "NASA EONET".into()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        query_cache_key("eonet_events", query)
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        let status = query.option_str("status").unwrap_or(DEFAULT_STATUS);
        let limit = query.option_u64("limit").unwrap_or(DEFAULT_LIMIT);
        let [w, n, e, s] = bounding_box(query.location, query.radius_km);
        let url = format!(
            "{}/events?status={}&limit={limit}&bbox={w:.4},{n:.4},{e:.4},{s:.4}",
            self.base_url,
            urlencoding::encode(status)
        );

        let resp = self.http.get(&url).send().await.context("EONET request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(EchoError::Upstream {
                provider: "eonet".into(),
                message: format!("HTTP {status}"),
            }
            .into());
        }

        let body: EventsResponse = resp.json().await.context("Failed to parse EONET response")?;
        let data = Self::normalise(body);
        debug!(count = data.count, status, "EONET events fetched");
        Ok(EnvironmentalData::DisasterEvents(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bounding_box_at_equator() {
        let [w, n, e, s] = bounding_box(Coordinate { lat: 0.0, lng: 0.0 }, 111.32);
        assert!((n - 1.0).abs() < 1e-9);
        assert!((s + 1.0).abs() < 1e-9);
        assert!((e - 1.0).abs() < 1e-9);
        assert!((w + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_is_clamped() {
        let [w, n, e, s] = bounding_box(Coordinate { lat: 89.9, lng: 179.9 }, 50.0);
        assert!(n <= 90.0 && s >= -90.0);
        assert!(e <= 180.0 && w >= -180.0);
    }

    #[test]
    fn test_normalise_events() {
        let resp: EventsResponse = serde_json::from_value(json!({
            "events": [
                {
                    "id": "EONET_1",
                    "title": "Wildfire near Sibu",
                    "link": "https://eonet.gsfc.nasa.gov/api/v3/events/EONET_1",
                    "categories": [{"id": "wildfires", "title": "Wildfires"}],
                    "geometry": [
                        {"date": "2026-01-01T00:00:00Z", "type": "Point", "coordinates": [111.0, 2.0]},
                        {"date": "2026-01-02T00:00:00Z", "type": "Point", "coordinates": [111.5, 2.1]}
                    ]
                },
                {
                    "id": "EONET_2",
                    "title": "Storm",
                    "categories": [],
                    "geometry": [{"type": "Polygon", "coordinates": [[[0, 0], [1, 1]]]}]
                }
            ]
        }))
        .unwrap();
        let data = EonetEvents::normalise(resp);
        assert_eq!(data.count, 2);
        let fire = &data.events[0];
        assert_eq!(fire.category, "Wildfires");
        assert_eq!(fire.date.as_deref(), Some("2026-01-02T00:00:00Z"));
        assert_eq!(fire.coordinates, Some(Coordinate { lat: 2.1, lng: 111.5 }));
        let storm = &data.events[1];
        assert_eq!(storm.category, "Unknown");
        assert!(storm.coordinates.is_none());
    }
}
