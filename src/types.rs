//! Shared types for the Echosphere backend.
//!
//! These types form the data model used across all modules: coordinates
//! and provider queries, the fixed per-category metric schemas, provider
//! results, the merged environmental snapshot, analysis summaries, and the
//! records handed to the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Default analysis radius around a coordinate.
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Accepted radius range for area queries.
pub const MIN_RADIUS_KM: f64 = 0.5;
pub const MAX_RADIUS_KM: f64 = 50.0;

/// A WGS84 point. Field names follow the frontend (`lat`/`lng`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting out-of-range or non-finite values.
    pub fn new(lat: f64, lng: f64) -> Result<Self, EchoError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EchoError::Validation(format!(
                "latitude must be within [-90, 90], got {lat}"
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(EchoError::Validation(format!(
                "longitude must be within [-180, 180], got {lng}"
            )));
        }
        Ok(Self { lat, lng })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}

/// Input to every provider adapter: a point plus a search radius, and
/// provider-specific options such as imagery tile size or event status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderQuery {
    pub location: Coordinate,
    pub radius_km: f64,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl ProviderQuery {
    pub fn new(location: Coordinate, radius_km: f64) -> Self {
        Self { location, radius_km, options: Map::new() }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn option_f64(&self, name: &str) -> Option<f64> {
        self.options.get(name).and_then(Value::as_f64)
    }

    pub fn option_u64(&self, name: &str) -> Option<u64> {
        self.options.get(name).and_then(Value::as_u64)
    }

    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }

    /// Validate a radius against the accepted area-query range.
    pub fn validated(location: Coordinate, radius_km: f64) -> Result<Self, EchoError> {
        if !radius_km.is_finite() || !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
            return Err(EchoError::Validation(format!(
                "radius_km must be within [{MIN_RADIUS_KM}, {MAX_RADIUS_KM}], got {radius_km}"
            )));
        }
        Ok(Self::new(location, radius_km))
    }
}

/// Round a coordinate component for cache keys (~11 m at the equator).
pub fn round_coord(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Round to one decimal place, the precision used by all metric schemas.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// One environmental data category, each served by one provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Climate,
    Vegetation,
    Water,
    FloodRisk,
    Population,
    AirQuality,
    Imagery,
    DisasterEvents,
}

impl Category {
    /// Categories merged into an [`EnvironmentalSnapshot`], in context order.
    pub const SNAPSHOT: [Category; 6] = [
        Category::Climate,
        Category::Vegetation,
        Category::Water,
        Category::FloodRisk,
        Category::Population,
        Category::AirQuality,
    ];

    /// Earth-observation categories served by the comprehensive endpoint.
    pub const EARTH_DATA: [Category; 5] = [
        Category::Climate,
        Category::Vegetation,
        Category::Water,
        Category::FloodRisk,
        Category::Population,
    ];

    pub const ALL: [Category; 8] = [
        Category::Climate,
        Category::Vegetation,
        Category::Water,
        Category::FloodRisk,
        Category::Population,
        Category::AirQuality,
        Category::Imagery,
        Category::DisasterEvents,
    ];

    /// Snake-case key used in JSON maps and cache identities.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Climate => "climate",
            Category::Vegetation => "vegetation",
            Category::Water => "water",
            Category::FloodRisk => "flood_risk",
            Category::Population => "population",
            Category::AirQuality => "air_quality",
            Category::Imagery => "imagery",
            Category::DisasterEvents => "disaster_events",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EchoError;

    /// Accepts snake-case keys as well as URL path segments (`flood-risk`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "climate" => Ok(Category::Climate),
            "vegetation" => Ok(Category::Vegetation),
            "water" => Ok(Category::Water),
            "flood_risk" | "flood" => Ok(Category::FloodRisk),
            "population" => Ok(Category::Population),
            "air_quality" | "aqi" => Ok(Category::AirQuality),
            "imagery" => Ok(Category::Imagery),
            "disaster_events" | "events" => Ok(Category::DisasterEvents),
            other => Err(EchoError::Validation(format!("unknown data category: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Flood risk level
// ---------------------------------------------------------------------------

/// Categorical flood risk. Serialised with the display labels the
/// frontend uses (`"Very High"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloodRiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl FloodRiskLevel {
    pub const ALL: [FloodRiskLevel; 4] = [
        FloodRiskLevel::Low,
        FloodRiskLevel::Medium,
        FloodRiskLevel::High,
        FloodRiskLevel::VeryHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FloodRiskLevel::Low => "Low",
            FloodRiskLevel::Medium => "Medium",
            FloodRiskLevel::High => "High",
            FloodRiskLevel::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for FloodRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FloodRiskLevel {
    type Err = EchoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalised.as_str() {
            "low" => Ok(FloodRiskLevel::Low),
            "medium" | "moderate" => Ok(FloodRiskLevel::Medium),
            "high" => Ok(FloodRiskLevel::High),
            "veryhigh" => Ok(FloodRiskLevel::VeryHigh),
            _ => Err(EchoError::Validation(format!("unknown flood risk level: {s}"))),
        }
    }
}

impl Serialize for FloodRiskLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FloodRiskLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Category schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precipitation {
    pub monthly_avg: f64,
    pub annual: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Humidity {
    pub current: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    pub direction: u16,
    pub unit: String,
}

/// Climate: temperature (°C), precipitation (mm), humidity (%), wind (m/s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateData {
    pub temperature: Temperature,
    pub precipitation: Precipitation,
    pub humidity: Humidity,
    pub wind: Wind,
    pub climate_zone: String,
}

impl ClimateData {
    pub fn fallback() -> Self {
        Self {
            temperature: Temperature {
                current: 22.0,
                average: 20.0,
                min: 15.0,
                max: 28.0,
                unit: "°C".into(),
            },
            precipitation: Precipitation {
                monthly_avg: 75.0,
                annual: 900.0,
                unit: "mm".into(),
            },
            humidity: Humidity { current: 65.0, unit: "%".into() },
            wind: Wind { speed: 8.0, direction: 180, unit: "m/s".into() },
            climate_zone: "temperate".into(),
        }
    }
}

/// Vegetation: coverage percentages plus NDVI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationData {
    pub green_coverage: f64,
    pub vegetation_index: f64,
    pub vegetation_type: String,
    pub forest_cover: f64,
    pub urban_green_space: f64,
    pub unit: String,
}

impl VegetationData {
    pub fn fallback() -> Self {
        Self {
            green_coverage: 35.0,
            vegetation_index: 0.45,
            vegetation_type: "Mixed Forest".into(),
            forest_cover: 25.0,
            urban_green_space: 20.0,
            unit: "%".into(),
        }
    }
}

/// Water: stress and storage indicators in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterData {
    pub water_stress_index: f64,
    pub groundwater_level: f64,
    pub surface_water: f64,
    pub drought_risk: String,
    pub unit: String,
}

impl WaterData {
    pub fn fallback() -> Self {
        Self {
            water_stress_index: 30.0,
            groundwater_level: 60.0,
            surface_water: 40.0,
            drought_risk: "Medium".into(),
            unit: "%".into(),
        }
    }
}

/// Flood risk: probability (%), elevation (m), distance to water (km).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRiskData {
    pub flood_risk: FloodRiskLevel,
    pub flood_probability: f64,
    pub elevation: f64,
    pub distance_to_water: f64,
    pub unit: String,
}

impl FloodRiskData {
    pub fn fallback() -> Self {
        Self {
            flood_risk: FloodRiskLevel::Medium,
            flood_probability: 25.0,
            elevation: 150.0,
            distance_to_water: 2.5,
            unit: "%".into(),
        }
    }
}

/// Population within the query radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationData {
    pub total_population: u64,
    pub population_density: f64,
    pub area_km2: f64,
    pub urban_percentage: f64,
    pub unit: String,
}

impl PopulationData {
    pub fn fallback(radius_km: f64) -> Self {
        Self {
            total_population: 50_000,
            population_density: 2000.0,
            area_km2: circle_area_km2(radius_km),
            urban_percentage: 70.0,
            unit: "people/km²".into(),
        }
    }
}

/// Area of a circle of the given radius, rounded to two decimals.
pub fn circle_area_km2(radius_km: f64) -> f64 {
    round2(std::f64::consts::PI * radius_km * radius_km)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pollutants {
    pub pm25: f64,
    pub pm10: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub co: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantUnits {
    pub pm25: String,
    pub pm10: String,
    pub no2: String,
    pub o3: String,
    pub so2: String,
    pub co: String,
}

impl Default for PollutantUnits {
    fn default() -> Self {
        Self {
            pm25: "µg/m³".into(),
            pm10: "µg/m³".into(),
            no2: "µg/m³".into(),
            o3: "µg/m³".into(),
            so2: "µg/m³".into(),
            co: "mg/m³".into(),
        }
    }
}

/// Air quality: US EPA AQI (0–500) plus pollutant concentrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityData {
    pub aqi: u32,
    pub pollutants: Pollutants,
    pub units: PollutantUnits,
    pub city: String,
    pub country: String,
    pub data_quality: String,
}

impl AirQualityData {
    pub fn fallback() -> Self {
        Self {
            aqi: 50,
            pollutants: Pollutants {
                pm25: 12.0,
                pm10: 25.0,
                no2: 20.0,
                o3: 30.0,
                so2: 5.0,
                co: 1.5,
            },
            units: PollutantUnits::default(),
            city: "Unknown".into(),
            country: "Unknown".into(),
            data_quality: "fallback".into(),
        }
    }
}

/// Default imagery tile width in degrees.
pub const DEFAULT_IMAGERY_DIM: f64 = 0.1;

/// Satellite imagery descriptor for a tile around the query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryData {
    pub id: Option<String>,
    pub url: Option<String>,
    pub date: Option<String>,
    pub dim: f64,
    pub cloud_score: Option<f64>,
}

impl ImageryData {
    pub fn fallback(dim: f64) -> Self {
        Self { id: None, url: None, date: None, dim, cloud_score: None }
    }
}

/// A natural event (wildfire, storm, flood...) reported near the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    pub id: String,
    pub title: String,
    pub category: String,
    pub date: Option<String>,
    pub coordinates: Option<Coordinate>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEventsData {
    pub events: Vec<DisasterEvent>,
    pub count: usize,
}

impl DisasterEventsData {
    pub fn new(events: Vec<DisasterEvent>) -> Self {
        let count = events.len();
        Self { events, count }
    }
}

/// Normalised payload of one provider, one variant per category.
///
/// Serialises as the bare category object. Deserialisation needs the
/// category, see [`EnvironmentalData::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvironmentalData {
    Climate(ClimateData),
    Vegetation(VegetationData),
    Water(WaterData),
    FloodRisk(FloodRiskData),
    Population(PopulationData),
    AirQuality(AirQualityData),
    Imagery(ImageryData),
    DisasterEvents(DisasterEventsData),
}

impl EnvironmentalData {
    pub fn category(&self) -> Category {
        match self {
            EnvironmentalData::Climate(_) => Category::Climate,
            EnvironmentalData::Vegetation(_) => Category::Vegetation,
            EnvironmentalData::Water(_) => Category::Water,
            EnvironmentalData::FloodRisk(_) => Category::FloodRisk,
            EnvironmentalData::Population(_) => Category::Population,
            EnvironmentalData::AirQuality(_) => Category::AirQuality,
            EnvironmentalData::Imagery(_) => Category::Imagery,
            EnvironmentalData::DisasterEvents(_) => Category::DisasterEvents,
        }
    }

    /// Decode a cached JSON object back into the schema of `category`.
    pub fn from_value(category: Category, value: Value) -> serde_json::Result<Self> {
        Ok(match category {
            Category::Climate => EnvironmentalData::Climate(serde_json::from_value(value)?),
            Category::Vegetation => EnvironmentalData::Vegetation(serde_json::from_value(value)?),
            Category::Water => EnvironmentalData::Water(serde_json::from_value(value)?),
            Category::FloodRisk => EnvironmentalData::FloodRisk(serde_json::from_value(value)?),
            Category::Population => EnvironmentalData::Population(serde_json::from_value(value)?),
            Category::AirQuality => EnvironmentalData::AirQuality(serde_json::from_value(value)?),
            Category::Imagery => EnvironmentalData::Imagery(serde_json::from_value(value)?),
            Category::DisasterEvents => {
                EnvironmentalData::DisasterEvents(serde_json::from_value(value)?)
            }
        })
    }

    /// The category's fixed fallback values, used when an upstream fails.
    pub fn fallback(category: Category, query: &ProviderQuery) -> Self {
        match category {
            Category::Climate => EnvironmentalData::Climate(ClimateData::fallback()),
            Category::Vegetation => EnvironmentalData::Vegetation(VegetationData::fallback()),
            Category::Water => EnvironmentalData::Water(WaterData::fallback()),
            Category::FloodRisk => EnvironmentalData::FloodRisk(FloodRiskData::fallback()),
            Category::Population => {
                EnvironmentalData::Population(PopulationData::fallback(query.radius_km))
            }
            Category::AirQuality => EnvironmentalData::AirQuality(AirQualityData::fallback()),
            Category::Imagery => EnvironmentalData::Imagery(ImageryData::fallback(
                query.option_f64("dim").unwrap_or(DEFAULT_IMAGERY_DIM),
            )),
            Category::DisasterEvents => {
                EnvironmentalData::DisasterEvents(DisasterEventsData::new(Vec::new()))
            }
        }
    }

    pub fn as_climate(&self) -> Option<&ClimateData> {
        match self {
            EnvironmentalData::Climate(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_vegetation(&self) -> Option<&VegetationData> {
        match self {
            EnvironmentalData::Vegetation(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_water(&self) -> Option<&WaterData> {
        match self {
            EnvironmentalData::Water(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_flood_risk(&self) -> Option<&FloodRiskData> {
        match self {
            EnvironmentalData::FloodRisk(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_population(&self) -> Option<&PopulationData> {
        match self {
            EnvironmentalData::Population(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_air_quality(&self) -> Option<&AirQualityData> {
        match self {
            EnvironmentalData::AirQuality(d) => Some(d),
            _ => None,
        }
    }
}

/// Source label attached to fallback results of a category.
pub fn fallback_source(category: Category) -> &'static str {
    match category {
        Category::AirQuality => "Fallback (OpenAQ API unavailable)",
        Category::Imagery | Category::DisasterEvents => "Fallback (NASA API unavailable)",
        _ => "Fallback (Earth Data API unavailable)",
    }
}

// ---------------------------------------------------------------------------
// Provider result
// ---------------------------------------------------------------------------

/// Outcome of one provider adapter invocation.
///
/// Never partially filled: a failed fetch still carries the category's
/// fallback data so consumers only branch on `success`/`source`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResult {
    #[serde(skip)]
    pub category: Category,
    pub success: bool,
    pub data: EnvironmentalData,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResult {
    pub fn ok(data: EnvironmentalData, source: impl Into<String>, cached: bool) -> Self {
        Self {
            category: data.category(),
            success: true,
            data,
            source: source.into(),
            timestamp: Utc::now(),
            cached,
            error: None,
        }
    }

    pub fn fallback(category: Category, query: &ProviderQuery, error: impl Into<String>) -> Self {
        Self {
            category,
            success: false,
            data: EnvironmentalData::fallback(category, query),
            source: fallback_source(category).to_string(),
            timestamp: Utc::now(),
            cached: false,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Scoring input: the handful of headline metrics for an area, either
/// sent by the frontend (`areaData`) or derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaMetrics {
    /// Area in km².
    pub area: f64,
    #[serde(default)]
    pub center: Option<Coordinate>,
    #[serde(default)]
    pub bounds: Option<Value>,
    /// Heat index in °C.
    pub heat_index: f64,
    /// US EPA AQI.
    pub air_quality: u32,
    /// Green coverage in percent.
    pub green_coverage: f64,
    /// Water stress in percent.
    #[serde(default)]
    pub water_stress: Option<f64>,
    pub flood_risk: FloodRiskLevel,
    pub population: u64,
    #[serde(default)]
    pub buildings: Option<u64>,
}

/// Per-category provider results merged for one coordinate + radius.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentalSnapshot {
    pub location: Coordinate,
    pub radius_km: f64,
    pub climate: ProviderResult,
    pub vegetation: ProviderResult,
    pub water: ProviderResult,
    pub flood_risk: ProviderResult,
    pub population: ProviderResult,
    pub air_quality: ProviderResult,
    pub fetched_at: DateTime<Utc>,
}

impl EnvironmentalSnapshot {
    /// Results in [`Category::SNAPSHOT`] order.
    pub fn results(&self) -> [&ProviderResult; 6] {
        [
            &self.climate,
            &self.vegetation,
            &self.water,
            &self.flood_risk,
            &self.population,
            &self.air_quality,
        ]
    }

    pub fn get(&self, category: Category) -> Option<&ProviderResult> {
        self.results().into_iter().find(|r| r.category == category)
    }

    /// Categories whose provider failed and which carry fallback data.
    pub fn failed_categories(&self) -> Vec<Category> {
        self.results()
            .into_iter()
            .filter(|r| !r.success)
            .map(|r| r.category)
            .collect()
    }

    pub fn sources(&self) -> BTreeMap<String, String> {
        self.results()
            .into_iter()
            .map(|r| (r.category.as_str().to_string(), r.source.clone()))
            .collect()
    }

    pub fn climate_data(&self) -> ClimateData {
        self.climate.data.as_climate().cloned().unwrap_or_else(ClimateData::fallback)
    }

    pub fn vegetation_data(&self) -> VegetationData {
        self.vegetation
            .data
            .as_vegetation()
            .cloned()
            .unwrap_or_else(VegetationData::fallback)
    }

    pub fn water_data(&self) -> WaterData {
        self.water.data.as_water().cloned().unwrap_or_else(WaterData::fallback)
    }

    pub fn flood_risk_data(&self) -> FloodRiskData {
        self.flood_risk
            .data
            .as_flood_risk()
            .cloned()
            .unwrap_or_else(FloodRiskData::fallback)
    }

    pub fn population_data(&self) -> PopulationData {
        self.population
            .data
            .as_population()
            .cloned()
            .unwrap_or_else(|| PopulationData::fallback(self.radius_km))
    }

    pub fn air_quality_data(&self) -> AirQualityData {
        self.air_quality
            .data
            .as_air_quality()
            .cloned()
            .unwrap_or_else(AirQualityData::fallback)
    }

    /// Headline metrics for scoring. The heat index is the current
    /// temperature reading.
    pub fn metrics(&self) -> AreaMetrics {
        let population = self.population_data();
        AreaMetrics {
            area: population.area_km2,
            center: Some(self.location),
            bounds: None,
            heat_index: self.climate_data().temperature.current,
            air_quality: self.air_quality_data().aqi,
            green_coverage: self.vegetation_data().green_coverage,
            water_stress: Some(self.water_data().water_stress_index),
            flood_risk: self.flood_risk_data().flood_risk,
            population: population.total_population,
            buildings: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "Low",
            PriorityLevel::Medium => "Medium",
            PriorityLevel::High => "High",
            PriorityLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = EchoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(PriorityLevel::Low),
            "medium" => Ok(PriorityLevel::Medium),
            "high" => Ok(PriorityLevel::High),
            "critical" => Ok(PriorityLevel::Critical),
            other => Err(EchoError::Validation(format!("unknown priority level: {other}"))),
        }
    }
}

/// Structured outcome of the threshold rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub priority_level: PriorityLevel,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// One persisted exchange: a user message and the AI response to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub session_id: String,
    pub area_id: Option<String>,
    pub user_message: String,
    pub ai_response: String,
    pub context: Option<Value>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            area_id: None,
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            context: None,
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    /// Expand into the user/assistant message pair it represents.
    pub fn messages(&self) -> [ChatMessage; 2] {
        [
            ChatMessage::user(self.user_message.clone()),
            ChatMessage::assistant(self.ai_response.clone()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Areas
// ---------------------------------------------------------------------------

/// GeoJSON polygon: `coordinates[0]` is the outer ring of `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

/// Mean km per degree of latitude.
const KM_PER_DEG_LAT: f64 = 110.574;
/// km per degree of longitude at the equator.
const KM_PER_DEG_LNG: f64 = 111.320;

impl Boundary {
    /// Check the polygon shape and that every vertex is a valid coordinate.
    pub fn validate(&self) -> Result<(), EchoError> {
        if self.kind != "Polygon" {
            return Err(EchoError::Validation(format!(
                "boundary must be a GeoJSON Polygon, got {}",
                self.kind
            )));
        }
        let ring = self.outer_ring()?;
        if ring.len() < 3 {
            return Err(EchoError::Validation(
                "boundary needs at least three distinct vertices".into(),
            ));
        }
        for [lng, lat] in &ring {
            Coordinate::new(*lat, *lng)?;
        }
        Ok(())
    }

    /// Outer ring vertices without the closing duplicate.
    fn outer_ring(&self) -> Result<Vec<[f64; 2]>, EchoError> {
        let ring = self
            .coordinates
            .first()
            .ok_or_else(|| EchoError::Validation("boundary has no rings".into()))?;
        let mut vertices = ring.clone();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        Ok(vertices)
    }

    /// Vertex centroid of the outer ring.
    pub fn center(&self) -> Result<Coordinate, EchoError> {
        let ring = self.outer_ring()?;
        if ring.is_empty() {
            return Err(EchoError::Validation("boundary has no vertices".into()));
        }
        let n = ring.len() as f64;
        let lng = ring.iter().map(|p| p[0]).sum::<f64>() / n;
        let lat = ring.iter().map(|p| p[1]).sum::<f64>() / n;
        Coordinate::new(lat, lng)
    }

    /// Planar area in km² using an equirectangular projection around the
    /// centroid latitude. Accurate enough for city-scale polygons.
    pub fn area_km2(&self) -> Result<f64, EchoError> {
        let ring = self.outer_ring()?;
        let center = self.center()?;
        let lng_scale = KM_PER_DEG_LNG * center.lat.to_radians().cos();
        let projected: Vec<(f64, f64)> = ring
            .iter()
            .map(|p| (p[0] * lng_scale, p[1] * KM_PER_DEG_LAT))
            .collect();
        let mut twice_area = 0.0;
        for i in 0..projected.len() {
            let (x1, y1) = projected[i];
            let (x2, y2) = projected[(i + 1) % projected.len()];
            twice_area += x1 * y2 - x2 * y1;
        }
        Ok(round2(twice_area.abs() / 2.0))
    }
}

/// Request to store a user-drawn area.
#[derive(Debug, Clone, Deserialize)]
pub struct NewArea {
    pub name: String,
    pub boundary: Boundary,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A stored, user-defined polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
    pub boundary: Boundary,
    pub center: Coordinate,
    pub area_km2: f64,
    pub city: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Area {
    /// Validate a request and derive center + size from its boundary.
    pub fn from_request(req: NewArea) -> Result<Self, EchoError> {
        if req.name.trim().is_empty() {
            return Err(EchoError::Validation("area name must not be empty".into()));
        }
        req.boundary.validate()?;
        let center = req.boundary.center()?;
        let area_km2 = req.boundary.area_km2()?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name.trim().to_string(),
            boundary: req.boundary,
            center,
            area_km2,
            city: req.city,
            country: req.country,
            description: req.description,
            created_at: Utc::now(),
        })
    }
}

/// Environmental metrics recorded for an area at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub id: String,
    pub area_id: String,
    pub heat_index: f64,
    pub air_quality_index: u32,
    pub green_coverage: f64,
    pub water_stress: Option<f64>,
    pub flood_risk: FloodRiskLevel,
    pub population_estimate: Option<u64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub precipitation: Option<f64>,
    pub data_source: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricsRecord {
    /// Capture the headline and supporting metrics of a snapshot.
    pub fn from_snapshot(area_id: &str, snapshot: &EnvironmentalSnapshot) -> Self {
        let metrics = snapshot.metrics();
        let climate = snapshot.climate_data();
        let sources: Vec<String> = snapshot.sources().into_values().collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            area_id: area_id.to_string(),
            heat_index: metrics.heat_index,
            air_quality_index: metrics.air_quality,
            green_coverage: metrics.green_coverage,
            water_stress: metrics.water_stress,
            flood_risk: metrics.flood_risk,
            population_estimate: Some(metrics.population),
            humidity: Some(climate.humidity.current),
            wind_speed: Some(climate.wind.speed),
            precipitation: Some(climate.precipitation.monthly_avg),
            data_source: Some(sources.join("; ")),
            recorded_at: snapshot.fetched_at,
        }
    }
}

/// A narrative analysis plus its structured summary, linked to an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub area_id: String,
    pub analysis: String,
    pub summary: AnalysisSummary,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Cache rows
// ---------------------------------------------------------------------------

/// DB-backed cache tier row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRow {
    pub id: String,
    pub cache_key: String,
    pub api_source: String,
    pub request_params: Value,
    pub response_data: Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_valid: bool,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for Echosphere.
#[derive(Debug, thiserror::Error)]
pub enum EchoError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream provider error ({provider}): {message}")]
    Upstream { provider: String, message: String },

    #[error("LLM error ({model}): {message}")]
    Llm { model: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_query() -> ProviderQuery {
        ProviderQuery::new(Coordinate { lat: 2.30, lng: 111.82 }, 5.0)
    }

    // -- Coordinate tests --

    #[test]
    fn test_coordinate_valid() {
        let c = Coordinate::new(2.30, 111.82).unwrap();
        assert_eq!(c.lat, 2.30);
        assert_eq!(c.lng, 111.82);
    }

    #[test]
    fn test_coordinate_rejects_out_of_range() {
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_radius_validation() {
        let c = Coordinate::new(0.0, 0.0).unwrap();
        assert!(ProviderQuery::validated(c, 5.0).is_ok());
        assert!(ProviderQuery::validated(c, 0.4).is_err());
        assert!(ProviderQuery::validated(c, 50.1).is_err());
    }

    #[test]
    fn test_round_coord() {
        assert_eq!(round_coord(2.123456), 2.1235);
        assert_eq!(round_coord(-111.00004), -111.0);
    }

    // -- Category tests --

    #[test]
    fn test_category_from_path_segment() {
        assert_eq!("flood-risk".parse::<Category>().unwrap(), Category::FloodRisk);
        assert_eq!("flood_risk".parse::<Category>().unwrap(), Category::FloodRisk);
        assert_eq!("Climate".parse::<Category>().unwrap(), Category::Climate);
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(serde_json::to_string(&Category::AirQuality).unwrap(), "\"air_quality\"");
    }

    // -- Flood risk tests --

    #[test]
    fn test_flood_risk_labels() {
        assert_eq!(serde_json::to_string(&FloodRiskLevel::VeryHigh).unwrap(), "\"Very High\"");
        let parsed: FloodRiskLevel = serde_json::from_str("\"very_high\"").unwrap();
        assert_eq!(parsed, FloodRiskLevel::VeryHigh);
        let parsed: FloodRiskLevel = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(parsed, FloodRiskLevel::Low);
        assert!(serde_json::from_str::<FloodRiskLevel>("\"extreme\"").is_err());
    }

    // -- Environmental data tests --

    #[test]
    fn test_environmental_data_serializes_flat() {
        let data = EnvironmentalData::Water(WaterData::fallback());
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["water_stress_index"], 30.0);
        assert_eq!(json["drought_risk"], "Medium");
    }

    #[test]
    fn test_from_value_uses_category_schema() {
        let original = EnvironmentalData::FloodRisk(FloodRiskData::fallback());
        let value = serde_json::to_value(&original).unwrap();
        let decoded = EnvironmentalData::from_value(Category::FloodRisk, value.clone()).unwrap();
        assert_eq!(decoded, original);
        assert!(EnvironmentalData::from_value(Category::Climate, value).is_err());
    }

    #[test]
    fn test_population_fallback_area_tracks_radius() {
        let data = PopulationData::fallback(5.0);
        assert_eq!(data.area_km2, 78.54);
        assert_eq!(data.total_population, 50_000);
    }

    #[test]
    fn test_provider_result_fallback_shape() {
        let result = ProviderResult::fallback(Category::Climate, &sample_query(), "boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.source, "Fallback (Earth Data API unavailable)");
        assert!(result.data.as_climate().is_some());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["data"]["temperature"]["current"], 22.0);
        assert!(json.get("category").is_none());
    }

    #[test]
    fn test_provider_result_ok_omits_error() {
        let result = ProviderResult::ok(
            EnvironmentalData::Vegetation(VegetationData::fallback()),
            "test",
            false,
        );
        assert_eq!(result.category, Category::Vegetation);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());
    }

    // -- Snapshot tests --

    fn fallback_snapshot() -> EnvironmentalSnapshot {
        let q = sample_query();
        EnvironmentalSnapshot {
            location: q.location,
            radius_km: q.radius_km,
            climate: ProviderResult::fallback(Category::Climate, &q, "x"),
            vegetation: ProviderResult::fallback(Category::Vegetation, &q, "x"),
            water: ProviderResult::fallback(Category::Water, &q, "x"),
            flood_risk: ProviderResult::fallback(Category::FloodRisk, &q, "x"),
            population: ProviderResult::fallback(Category::Population, &q, "x"),
            air_quality: ProviderResult::fallback(Category::AirQuality, &q, "x"),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_metrics_from_fallbacks() {
        let snapshot = fallback_snapshot();
        let m = snapshot.metrics();
        assert_eq!(m.heat_index, 22.0);
        assert_eq!(m.air_quality, 50);
        assert_eq!(m.green_coverage, 35.0);
        assert_eq!(m.water_stress, Some(30.0));
        assert_eq!(m.flood_risk, FloodRiskLevel::Medium);
        assert_eq!(m.population, 50_000);
        assert_eq!(snapshot.failed_categories().len(), 6);
    }

    #[test]
    fn test_snapshot_sources_keyed_by_category() {
        let sources = fallback_snapshot().sources();
        assert_eq!(sources.len(), 6);
        assert_eq!(sources["air_quality"], "Fallback (OpenAQ API unavailable)");
    }

    #[test]
    fn test_snapshot_get_by_category() {
        let snapshot = fallback_snapshot();
        let r = snapshot.get(Category::Water).unwrap();
        assert!(r.data.as_water().is_some());
        assert!(snapshot.get(Category::Imagery).is_none());
    }

    // -- Area metrics tests --

    #[test]
    fn test_area_metrics_camel_case() {
        let json = r#"{
            "area": 2.5, "heatIndex": 33.1, "airQuality": 120, "greenCoverage": 18.0,
            "waterStress": 65.0, "floodRisk": "High", "population": 12000
        }"#;
        let m: AreaMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(m.heat_index, 33.1);
        assert_eq!(m.flood_risk, FloodRiskLevel::High);
        assert!(m.buildings.is_none());
    }

    #[test]
    fn test_summary_uses_priority_level_key() {
        let s = AnalysisSummary {
            issues: vec![],
            recommendations: vec![],
            priority_level: PriorityLevel::Critical,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["priorityLevel"], "Critical");
    }

    // -- Boundary tests --

    fn square(size_deg: f64) -> Boundary {
        Boundary {
            kind: "Polygon".into(),
            coordinates: vec![vec![
                [0.0, 0.0],
                [size_deg, 0.0],
                [size_deg, size_deg],
                [0.0, size_deg],
                [0.0, 0.0],
            ]],
        }
    }

    #[test]
    fn test_boundary_center() {
        let c = square(0.1).center().unwrap();
        assert!((c.lat - 0.05).abs() < 1e-9);
        assert!((c.lng - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_area_near_equator() {
        // 0.1° square near the equator is roughly 11.06 km × 11.13 km.
        let area = square(0.1).area_km2().unwrap();
        assert!((area - 123.1).abs() < 1.0, "area was {area}");
    }

    #[test]
    fn test_boundary_rejects_non_polygon() {
        let mut b = square(0.1);
        b.kind = "LineString".into();
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_boundary_rejects_degenerate_ring() {
        let b = Boundary {
            kind: "Polygon".into(),
            coordinates: vec![vec![[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
        };
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_area_from_request() {
        let area = Area::from_request(NewArea {
            name: " Kuching riverside ".into(),
            boundary: square(0.01),
            city: Some("Kuching".into()),
            country: None,
            description: None,
        })
        .unwrap();
        assert_eq!(area.name, "Kuching riverside");
        assert!(area.area_km2 > 1.0);
    }

    // -- Chat tests --

    #[test]
    fn test_chat_turn_messages() {
        let turn = ChatTurn::new("s1", "hello", "hi there", "model-x");
        let [user, assistant] = turn.messages();
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.content, "hi there");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }

    // -- Error display --

    #[test]
    fn test_error_display() {
        let e = EchoError::Upstream { provider: "openaq".into(), message: "HTTP 503".into() };
        assert_eq!(e.to_string(), "Upstream provider error (openaq): HTTP 503");
    }
}
