//! Narrative generation: context building and LLM delegation.
//!
//! Context strings are deterministic (fixed field order, fixed number
//! formatting) so prompt construction can be tested. Every public entry
//! point returns text: LLM failures become the fixed fallback message and
//! are never propagated.

use std::sync::Arc;
use tracing::{error, info};

use super::scoring;
use crate::config::LlmConfig;
use crate::llm::{ChatModel, CompletionRequest};
use crate::types::{AnalysisSummary, AreaMetrics, ChatMessage, EnvironmentalSnapshot};

/// System prompt establishing the urban-planning assistant persona.
pub const SYSTEM_PROMPT: &str = "You are an expert urban planning consultant specializing in climate \
resilience and sustainable city development. Your expertise includes environmental data analysis \
(heat islands, air quality, flood risk, green infrastructure), climate adaptation and mitigation, \
green infrastructure planning, and disaster risk reduction.

You provide actionable, practical, evidence-based recommendations grounded in the environmental \
data you are given, written clearly for city planners and decision-makers. When analyzing data you \
weigh environmental metrics, population impacts, infrastructure needs and long-term sustainability.";

/// Text returned when a chat completion fails.
pub fn chat_fallback(error: &str) -> String {
    format!(
        "I apologize, but I'm having trouble processing your request right now. \
         Please try again. (Error: {error})"
    )
}

/// Text returned when an analysis completion fails.
pub fn analysis_fallback(error: &str) -> String {
    format!("Analysis temporarily unavailable. Error: {error}")
}

/// Generated (or fallback) prose.
#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    pub text: String,
    pub model: String,
    /// `true` when `text` is the fallback message.
    pub fallback: bool,
}

/// Narrative analysis of an area plus its threshold summary.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaAnalysis {
    pub analysis: String,
    pub summary: AnalysisSummary,
    pub model: String,
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarrativeSettings {
    /// Chat messages kept from the conversation history.
    pub history_limit: usize,
    pub max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub temperature: f32,
}

impl From<&LlmConfig> for NarrativeSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            history_limit: config.history_limit as usize,
            max_tokens: config.max_tokens,
            analysis_max_tokens: config.analysis_max_tokens,
            temperature: config.temperature,
        }
    }
}

impl Default for NarrativeSettings {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Context builders
// ---------------------------------------------------------------------------

/// `12345` → `"12,345"`.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Every metric of a snapshot with its unit, in fixed order.
pub fn snapshot_context(snapshot: &EnvironmentalSnapshot) -> String {
    let climate = snapshot.climate_data();
    let vegetation = snapshot.vegetation_data();
    let water = snapshot.water_data();
    let flood = snapshot.flood_risk_data();
    let population = snapshot.population_data();
    let air = snapshot.air_quality_data();
    let sources = snapshot.sources();
    let source = |key: &str| sources.get(key).map(String::as_str).unwrap_or("Unknown");

    let location = format!(
        "**LOCATION**: {:.4}, {:.4} (radius {:.1} km)",
        snapshot.location.lat, snapshot.location.lng, snapshot.radius_km
    );

    let climate = format!(
        "**CLIMATE CONDITIONS:**\n\
         - Temperature: {:.1}°C (Average: {:.1}°C, Min: {:.1}°C, Max: {:.1}°C)\n\
         - Precipitation: {:.1}mm/month ({:.1}mm/year)\n\
         - Humidity: {:.1}%\n\
         - Wind: {:.1} m/s from {}°\n\
         - Climate Zone: {}",
        climate.temperature.current,
        climate.temperature.average,
        climate.temperature.min,
        climate.temperature.max,
        climate.precipitation.monthly_avg,
        climate.precipitation.annual,
        climate.humidity.current,
        climate.wind.speed,
        climate.wind.direction,
        climate.climate_zone,
    );

    let vegetation = format!(
        "**VEGETATION & GREEN INFRASTRUCTURE:**\n\
         - Green Coverage: {:.1}%\n\
         - Vegetation Index (NDVI): {:.2}\n\
         - Vegetation Type: {}\n\
         - Forest Cover: {:.1}%\n\
         - Urban Green Space: {:.1}%",
        vegetation.green_coverage,
        vegetation.vegetation_index,
        vegetation.vegetation_type,
        vegetation.forest_cover,
        vegetation.urban_green_space,
    );

    let water = format!(
        "**WATER RESOURCES & RISK:**\n\
         - Water Stress Index: {:.1}%\n\
         - Groundwater Level: {:.1}%\n\
         - Surface Water: {:.1}%\n\
         - Drought Risk: {}",
        water.water_stress_index, water.groundwater_level, water.surface_water, water.drought_risk,
    );

    let flood = format!(
        "**FLOOD RISK ASSESSMENT:**\n\
         - Flood Risk Level: {}\n\
         - Flood Probability: {:.1}%\n\
         - Elevation: {:.1}m\n\
         - Distance to Water: {:.1}km",
        flood.flood_risk, flood.flood_probability, flood.elevation, flood.distance_to_water,
    );

    let (p, u) = (&air.pollutants, &air.units);
    let air = format!(
        "**AIR QUALITY:**\n\
         - AQI: {}\n\
         - PM2.5: {:.1} {}\n\
         - PM10: {:.1} {}\n\
         - NO2: {:.1} {}\n\
         - O3: {:.1} {}\n\
         - SO2: {:.1} {}\n\
         - CO: {:.1} {}",
        air.aqi, p.pm25, u.pm25, p.pm10, u.pm10, p.no2, u.no2, p.o3, u.o3, p.so2, u.so2, p.co, u.co,
    );

    let population = format!(
        "**POPULATION & URBAN METRICS:**\n\
         - Total Population: {} residents\n\
         - Population Density: {:.1} people/km²\n\
         - Urban Percentage: {:.1}%\n\
         - Area Size: {:.2} km²",
        group_thousands(population.total_population),
        population.population_density,
        population.urban_percentage,
        population.area_km2,
    );

    let sources = format!(
        "**DATA SOURCES:**\n\
         - Climate: {}\n\
         - Vegetation: {}\n\
         - Water: {}\n\
         - Flood Risk: {}\n\
         - Population: {}\n\
         - Air Quality: {}",
        source("climate"),
        source("vegetation"),
        source("water"),
        source("flood_risk"),
        source("population"),
        source("air_quality"),
    );

    [location, climate, vegetation, water, flood, air, population, sources].join("\n\n")
}

/// Headline metrics of a user-selected area.
pub fn area_context(metrics: &AreaMetrics) -> String {
    let water = metrics
        .water_stress
        .map(|w| format!("{w:.1}%"))
        .unwrap_or_else(|| "Unknown".into());
    let buildings = metrics
        .buildings
        .map(group_thousands)
        .unwrap_or_else(|| "Unknown".into());
    format!(
        "Area Size: {:.2} km²\n\
         Population: {} residents\n\
         Heat Index: {:.1}°C\n\
         Air Quality: {} AQI\n\
         Green Coverage: {:.1}%\n\
         Water Stress: {water}\n\
         Flood Risk: {}\n\
         Buildings: {buildings}",
        metrics.area,
        group_thousands(metrics.population),
        metrics.heat_index,
        metrics.air_quality,
        metrics.green_coverage,
        metrics.flood_risk,
    )
}

/// Threshold findings, appended to location context.
pub fn summary_context(summary: &AnalysisSummary) -> String {
    let mut out = format!("**AUTOMATED ASSESSMENT** (priority: {}):", summary.priority_level);
    for issue in &summary.issues {
        out.push_str(&format!("\n- {issue}"));
    }
    out
}

/// Prompt asking for a structured resilience analysis of an area.
pub fn analysis_prompt(metrics: &AreaMetrics) -> String {
    format!(
        "Please provide a comprehensive urban resilience analysis for the following area:\n\n\
         **Area Characteristics:**\n{}\n\n\
         **Analysis Requirements:**\n\
         1. Identify the top environmental and resilience challenges\n\
         2. Assess the severity of each issue (consider thresholds: Heat >{}°C is high, AQI >{} is unhealthy, Green <{}% is low)\n\
         3. Provide specific, actionable recommendations with priority levels\n\
         4. Consider the population impact and vulnerability\n\
         5. Suggest both immediate interventions and long-term strategies\n\
         6. Focus on nature-based solutions where appropriate\n\n\
         Please structure your analysis clearly with sections for: Key Issues, Risk Assessment, \
         Recommendations, and Priority Actions.",
        area_context(metrics),
        scoring::HEAT_ISSUE_C,
        scoring::AQI_ISSUE,
        scoring::GREEN_ISSUE_PCT,
    )
}

/// The most recent `limit` messages, oldest first.
pub fn recent_history(history: &[ChatMessage], limit: usize) -> &[ChatMessage] {
    &history[history.len().saturating_sub(limit)..]
}

// ---------------------------------------------------------------------------
// Narrator
// ---------------------------------------------------------------------------

pub struct Narrator {
    model: Arc<dyn ChatModel>,
    settings: NarrativeSettings,
}

impl Narrator {
    pub fn new(model: Arc<dyn ChatModel>, settings: NarrativeSettings) -> Self {
        Self { model, settings }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn settings(&self) -> NarrativeSettings {
        self.settings
    }

    fn conversation(
        &self,
        context: Option<String>,
        history: &[ChatMessage],
        user_message: &str,
    ) -> Vec<ChatMessage> {
        let history = recent_history(history, self.settings.history_limit);
        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        if let Some(context) = context {
            messages.push(ChatMessage::system(context));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user_message));
        messages
    }

    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<Narration, String> {
        let request = CompletionRequest {
            messages,
            max_tokens,
            temperature: self.settings.temperature,
        };
        match self.model.complete(&request).await {
            Ok(completion) => Ok(Narration {
                text: completion.text,
                model: completion.model,
                fallback: false,
            }),
            Err(e) => Err(format!("{e:#}")),
        }
    }

    async fn chat_with(
        &self,
        context: Option<String>,
        history: &[ChatMessage],
        user_message: &str,
    ) -> Narration {
        let messages = self.conversation(context, history, user_message);
        match self.complete(messages, self.settings.max_tokens).await {
            Ok(narration) => {
                info!(model = %narration.model, "Chat completion succeeded");
                narration
            }
            Err(e) => {
                error!(model = %self.model.model_name(), error = %e, "Chat completion failed");
                Narration {
                    text: chat_fallback(&e),
                    model: self.model.model_name(),
                    fallback: true,
                }
            }
        }
    }

    /// Chat about a location, grounded in its snapshot and threshold summary.
    pub async fn narrate(
        &self,
        snapshot: &EnvironmentalSnapshot,
        summary: &AnalysisSummary,
        history: &[ChatMessage],
        user_message: &str,
    ) -> Narration {
        let context = format!(
            "LOCATION CONTEXT: The user is asking about a specific location at coordinates {:.4}, {:.4}. \
             Here is the Earth observation data for this area:\n\n{}\n\n{}\n\n\
             Use this environmental data to provide accurate, location-specific urban planning \
             insights and recommendations.",
            snapshot.location.lat,
            snapshot.location.lng,
            snapshot_context(snapshot),
            summary_context(summary),
        );
        self.chat_with(Some(context), history, user_message).await
    }

    /// General chat, optionally about a user-selected area.
    pub async fn chat(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        area: Option<&AreaMetrics>,
    ) -> Narration {
        let context = area.map(|m| {
            format!(
                "Current Context: The user has selected a specific area with the following characteristics:\n{}",
                area_context(m)
            )
        });
        self.chat_with(context, history, user_message).await
    }

    /// Structured analysis of an area. The summary always comes from the
    /// threshold rules, so it is present even when the LLM call fails.
    pub async fn analyze(&self, metrics: &AreaMetrics) -> AreaAnalysis {
        let summary = scoring::summarize(metrics);
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(analysis_prompt(metrics)),
        ];
        match self.complete(messages, self.settings.analysis_max_tokens).await {
            Ok(narration) => {
                info!(model = %narration.model, priority = %summary.priority_level, "Area analysis completed");
                AreaAnalysis {
                    analysis: narration.text,
                    summary,
                    model: narration.model,
                    fallback: false,
                }
            }
            Err(e) => {
                error!(model = %self.model.model_name(), error = %e, "Area analysis failed");
                AreaAnalysis {
                    analysis: analysis_fallback(&e),
                    summary,
                    model: self.model.model_name(),
                    fallback: true,
                }
            }
        }
    }

    /// One-shot insight for a free-text prompt. Errors are logged and
    /// returned as text for the caller to record.
    pub async fn insight(&self, prompt: &str) -> Result<Narration, String> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let outcome = self.complete(messages, self.settings.max_tokens).await;
        if let Err(e) = &outcome {
            error!(model = %self.model.model_name(), error = %e, "Insight generation failed");
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
