//! Deterministic synthetic environmental data.
//!
//! Every value is a pure function of the coordinate and a per-metric salt:
//! the first eight bytes of SHA-256 over `"{lat:.6}:{lng:.6}:{salt}"`, with
//! both components first rounded to the four decimals the cache key uses.
//! Coordinates that share a cache key therefore share their values, in
//! every process and on every platform.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{query_cache_key, Upstream};
use crate::cache::CacheKey;
use crate::types::{
    circle_area_km2, round1, round_coord, AirQualityData, Category, ClimateData, Coordinate, DisasterEventsData,
    EnvironmentalData, FloodRiskData, FloodRiskLevel, Humidity, ImageryData, Pollutants,
    PollutantUnits, PopulationData, Precipitation, ProviderQuery, Temperature, VegetationData,
    WaterData, Wind, DEFAULT_IMAGERY_DIM,
};

/// Stable 64-bit hash of a coordinate and salt.
pub fn stable_hash(location: Coordinate, salt: &str) -> u64 {
    let mut hasher = Sha256::new();
    let (lat, lng) = (round_coord(location.lat), round_coord(location.lng));
    hasher.update(format!("{lat:.6}:{lng:.6}:{salt}").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// `stable_hash(location, salt) % modulus`.
pub fn synthetic_value(location: Coordinate, salt: &str, modulus: u64) -> u64 {
    stable_hash(location, salt) % modulus.max(1)
}

/// Float in `[base, base + span)` stepping by whole units.
fn ranged(location: Coordinate, salt: &str, base: f64, span: u64) -> f64 {
    round1(base + synthetic_value(location, salt, span) as f64)
}

/// Float in `[low, high]` with one-decimal resolution.
fn uniform(location: Coordinate, salt: &str, low: f64, high: f64) -> f64 {
    let steps = ((high - low) * 10.0).round() as u64 + 1;
    round1(low + synthetic_value(location, salt, steps) as f64 / 10.0)
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

pub fn climate_zone(lat: f64) -> &'static str {
    match lat.abs() {
        a if a < 23.5 => "tropical",
        a if a < 35.0 => "subtropical",
        a if a < 50.0 => "temperate",
        a if a < 66.5 => "continental",
        _ => "polar",
    }
}

fn zone_base_temperature(zone: &str) -> f64 {
    match zone {
        "tropical" => 28.0,
        "subtropical" => 22.0,
        "temperate" => 15.0,
        "continental" => 8.0,
        "polar" => -5.0,
        _ => 20.0,
    }
}

pub fn vegetation_type(lat: f64) -> &'static str {
    match lat.abs() {
        a if a < 10.0 => "Tropical Forest",
        a if a < 25.0 => "Savanna",
        a if a < 40.0 => "Temperate Forest",
        a if a < 60.0 => "Boreal Forest",
        _ => "Tundra",
    }
}

pub fn climate(location: Coordinate) -> ClimateData {
    let zone = climate_zone(location.lat);
    let base = zone_base_temperature(zone);
    let offset = synthetic_value(location, "temperature", 10) as f64 - 5.0;
    ClimateData {
        temperature: Temperature {
            current: round1(base + offset),
            average: base,
            min: base - 5.0,
            max: base + 5.0,
            unit: "°C".into(),
        },
        precipitation: Precipitation {
            monthly_avg: ranged(location, "precip", 50.0, 100),
            annual: ranged(location, "annual", 600.0, 800),
            unit: "mm".into(),
        },
        humidity: Humidity { current: ranged(location, "humidity", 60.0, 30), unit: "%".into() },
        wind: Wind {
            speed: ranged(location, "wind", 5.0, 15),
            direction: synthetic_value(location, "direction", 360) as u16,
            unit: "m/s".into(),
        },
        climate_zone: zone.into(),
    }
}

pub fn vegetation(location: Coordinate) -> VegetationData {
    let ndvi = 0.3 + synthetic_value(location, "ndvi", 50) as f64 / 100.0;
    VegetationData {
        green_coverage: ranged(location, "green", 20.0, 60),
        vegetation_index: (ndvi * 1000.0).round() / 1000.0,
        vegetation_type: vegetation_type(location.lat).into(),
        forest_cover: ranged(location, "forest", 5.0, 40),
        urban_green_space: ranged(location, "urban_green", 10.0, 30),
        unit: "%".into(),
    }
}

pub fn water(location: Coordinate) -> WaterData {
    const DROUGHT: [&str; 3] = ["Low", "Medium", "High"];
    WaterData {
        water_stress_index: ranged(location, "water", 20.0, 60),
        groundwater_level: ranged(location, "ground", 50.0, 40),
        surface_water: ranged(location, "surface", 30.0, 50),
        drought_risk: DROUGHT[synthetic_value(location, "drought", 3) as usize].into(),
        unit: "%".into(),
    }
}

pub fn flood_risk(location: Coordinate) -> FloodRiskData {
    let level = FloodRiskLevel::ALL[synthetic_value(location, "flood", 4) as usize];
    FloodRiskData {
        flood_risk: level,
        flood_probability: ranged(location, "prob", 10.0, 70),
        elevation: ranged(location, "elev", 10.0, 500),
        distance_to_water: ranged(location, "dist", 0.5, 20),
        unit: "%".into(),
    }
}

pub fn population(location: Coordinate, radius_km: f64) -> PopulationData {
    let area = std::f64::consts::PI * radius_km * radius_km;
    let base_density = if location.lat.abs() < 30.0 && location.lng.abs() < 100.0 {
        5000.0
    } else {
        1000.0
    };
    let density = base_density + synthetic_value(location, "pop", 3000) as f64;
    PopulationData {
        total_population: (density * area) as u64,
        population_density: density,
        area_km2: circle_area_km2(radius_km),
        urban_percentage: ranged(location, "urban", 60.0, 35),
        unit: "people/km²".into(),
    }
}

pub fn air_quality(location: Coordinate) -> AirQualityData {
    AirQualityData {
        aqi: 45 + synthetic_value(location, "aqi", 76) as u32,
        pollutants: Pollutants {
            pm25: uniform(location, "pm25", 15.0, 35.0),
            pm10: uniform(location, "pm10", 25.0, 55.0),
            no2: uniform(location, "no2", 20.0, 50.0),
            o3: uniform(location, "o3", 30.0, 60.0),
            so2: uniform(location, "so2", 5.0, 25.0),
            co: uniform(location, "co", 1.5, 4.0),
        },
        units: PollutantUnits::default(),
        city: "Unknown".into(),
        country: "Unknown".into(),
        data_quality: "synthetic".into(),
    }
}

pub fn imagery(location: Coordinate, dim: f64) -> ImageryData {
    let id = format!("synthetic-{:016x}", stable_hash(location, "imagery"));
    ImageryData {
        id: Some(id),
        url: None,
        date: None,
        dim,
        cloud_score: Some(synthetic_value(location, "cloud", 101) as f64 / 100.0),
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Synthetic variant of a category provider.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticProvider {
    category: Category,
}

impl SyntheticProvider {
    pub fn new(category: Category) -> Self {
        Self { category }
    }

    /// Generate data for a query without going through the cache.
    pub fn generate(&self, query: &ProviderQuery) -> EnvironmentalData {
        let location = query.location;
        match self.category {
            Category::Climate => EnvironmentalData::Climate(climate(location)),
            Category::Vegetation => EnvironmentalData::Vegetation(vegetation(location)),
            Category::Water => EnvironmentalData::Water(water(location)),
            Category::FloodRisk => EnvironmentalData::FloodRisk(flood_risk(location)),
            Category::Population => {
                EnvironmentalData::Population(population(location, query.radius_km))
            }
            Category::AirQuality => EnvironmentalData::AirQuality(air_quality(location)),
            Category::Imagery => EnvironmentalData::Imagery(imagery(
                location,
                query.option_f64("dim").unwrap_or(DEFAULT_IMAGERY_DIM),
            )),
            Category::DisasterEvents => {
                EnvironmentalData::DisasterEvents(DisasterEventsData::new(Vec::new()))
            }
        }
    }
}

#[async_trait]
impl Upstream for SyntheticProvider {
    fn category(&self) -> Category {
        self.category
    }

    fn source(&self) -> String {
        match self.category {
            Category::Climate => "Synthetic Earth Data - Climate Model",
            Category::Vegetation => "Synthetic Earth Data - MODIS Vegetation",
            Category::Water => "Synthetic Earth Data - GRACE Water",
            Category::FloodRisk => "Synthetic Earth Data - Flood Risk Model",
            Category::Population => "Synthetic Earth Data - Population Grid",
            Category::AirQuality => "Synthetic Air Quality",
            Category::Imagery => "Synthetic Imagery",
            Category::DisasterEvents => "Synthetic Disaster Events",
        }
        .to_string()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        query_cache_key(&format!("synthetic_{}", self.category), query)
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        Ok(self.generate(query))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
