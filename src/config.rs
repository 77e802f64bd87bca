//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Every section except
//! `[server]` has defaults, so a partial file is enough.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs;

use crate::types::Category;

/// Env var that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "ECHOSPHERE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; `None` or `"*"` allows any.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub temperature: f32,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Deadline for one completion, covering retries and the fallback model.
    pub budget_secs: u64,
    /// Chat messages of history kept when building prompts.
    pub history_limit: u32,
    pub site_url: String,
    pub site_name: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".into(),
            model: "deepseek/deepseek-chat-v3.1:free".into(),
            fallback_model: None,
            api_key_env: "OPENROUTER_API_KEY".into(),
            max_tokens: 1000,
            analysis_max_tokens: 1500,
            temperature: 0.7,
            timeout_secs: 10,
            budget_secs: 15,
            history_limit: 20,
            site_url: "http://localhost:3000".into(),
            site_name: "Echosphere".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    /// Mirror cache entries into the `api_cache` table.
    pub persist: bool,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl_secs: 3600, persist: true, sweep_interval_secs: 600 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Env var that, when set, overrides `url`.
    pub url_env: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://echosphere.db".into(),
            url_env: Some("DATABASE_URL".into()),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// The effective database URL after the env override.
    pub fn resolved_url(&self) -> String {
        self.url_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.url.clone())
    }
}

/// How a category's provider obtains data.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Live,
    #[default]
    Synthetic,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CategoryConfig {
    pub mode: ProviderMode,
    /// Overrides `[cache].default_ttl_secs` for this category.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub timeout_secs: u64,
    pub open_meteo_url: String,
    pub openaq_url: String,
    pub openaq_key_env: Option<String>,
    pub nasa_api_url: String,
    pub nasa_key_env: Option<String>,
    pub eonet_url: String,
    /// Per-category settings. Table names accept the same aliases as the
    /// API (`flood-risk`, `aqi`, ...) and are normalised on load.
    #[serde(deserialize_with = "deserialize_categories")]
    pub categories: HashMap<Category, CategoryConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            open_meteo_url: "https://api.open-meteo.com/v1".into(),
            openaq_url: "https://api.openaq.org/v3".into(),
            openaq_key_env: Some("OPENAQ_API_KEY".into()),
            nasa_api_url: "https://api.nasa.gov".into(),
            nasa_key_env: Some("NASA_API_KEY".into()),
            eonet_url: "https://eonet.gsfc.nasa.gov/api/v3".into(),
            categories: HashMap::new(),
        }
    }
}

fn deserialize_categories<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<Category, CategoryConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let raw = HashMap::<String, CategoryConfig>::deserialize(deserializer)?;
    let mut categories = HashMap::with_capacity(raw.len());
    for (name, config) in raw {
        let category = name.parse::<Category>().map_err(|_| {
            D::Error::custom(format!("Unknown category in [providers.categories]: {name}"))
        })?;
        if categories.insert(category, config).is_some() {
            return Err(D::Error::custom(format!(
                "Category {category} configured more than once in [providers.categories]"
            )));
        }
    }
    Ok(categories)
}

impl ProvidersConfig {
    /// Settings for one category; unconfigured categories get the defaults.
    pub fn category(&self, category: Category) -> CategoryConfig {
        self.categories.get(&category).cloned().unwrap_or_default()
    }

    /// Effective TTL for a category in seconds.
    pub fn ttl_secs(&self, category: Category, cache: &CacheConfig) -> u64 {
        self.category(category).ttl_secs.unwrap_or(cache.default_ttl_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `ECHOSPHERE_CONFIG`, else `config.toml`.
    pub fn default_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval_secs == 0 {
            anyhow::bail!("[cache].sweep_interval_secs must be positive");
        }
        if self.llm.budget_secs == 0 {
            anyhow::bail!("[llm].budget_secs must be positive");
        }
        if self.providers.timeout_secs == 0 {
            anyhow::bail!("[providers].timeout_secs must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an optional secret; unset or empty variables yield `None`.
    pub fn resolve_secret(env_name: Option<&str>) -> Option<SecretString> {
        let name = env_name?;
        Self::resolve_env(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8000
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.llm.model, "deepseek/deepseek-chat-v3.1:free");
        assert_eq!(cfg.llm.history_limit, 20);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.llm.analysis_max_tokens, 1500);
        assert_eq!(cfg.llm.budget_secs, 15);
        assert_eq!(cfg.cache.default_ttl_secs, 3600);
        assert_eq!(cfg.providers.timeout_secs, 10);
        assert_eq!(cfg.providers.category(Category::Climate).mode, ProviderMode::Synthetic);
    }

    #[test]
    fn test_category_overrides() {
        let cfg = AppConfig::from_toml(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [cache]
            default_ttl_secs = 600

            [providers.categories.air_quality]
            mode = "live"
            ttl_secs = 1800

            [providers.categories.flood_risk]
            mode = "synthetic"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.providers.category(Category::AirQuality).mode, ProviderMode::Live);
        assert_eq!(cfg.providers.ttl_secs(Category::AirQuality, &cfg.cache), 1800);
        assert_eq!(cfg.providers.ttl_secs(Category::FloodRisk, &cfg.cache), 600);
        // Partial [cache] keeps the other defaults.
        assert!(cfg.cache.persist);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [providers.categories.weather]
            mode = "live"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_category_aliases_are_normalised() {
        let cfg = AppConfig::from_toml(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [providers.categories.flood-risk]
            mode = "live"
            ttl_secs = 60

            [providers.categories.aqi]
            ttl_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.providers.category(Category::FloodRisk).mode, ProviderMode::Live);
        assert_eq!(cfg.providers.ttl_secs(Category::FloodRisk, &cfg.cache), 60);
        assert_eq!(cfg.providers.ttl_secs(Category::AirQuality, &cfg.cache), 120);
    }

    #[test]
    fn test_duplicate_category_alias_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [providers.categories.flood_risk]
            ttl_secs = 60

            [providers.categories.flood]
            ttl_secs = 90
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_server_section_rejected() {
        assert!(AppConfig::from_toml("[llm]\nmodel = \"x\"").is_err());
    }

    #[test]
    fn test_resolve_secret_unset() {
        assert!(AppConfig::resolve_secret(Some("ECHOSPHERE_TEST_UNSET_VAR_XYZ")).is_none());
        assert!(AppConfig::resolve_secret(None).is_none());
    }

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory.
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert!(cfg.server.port > 0);
            assert!(cfg.llm.temperature >= 0.0);
            assert!(cfg.cache.default_ttl_secs > 0);
        }
    }
}
