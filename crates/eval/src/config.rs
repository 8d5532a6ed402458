use anyhow::{Context, Result};
use query::{OllamaConfig, RetrySettings, SourceConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Intent confidence at or above which a turn counts as passing.
    pub confidence_threshold: f64,
    pub judge_temperature: f32,
    pub agent_version: String,
    pub toolchain_version: String,
    pub environment: String,
    /// Extra attempts after a failed store write before the record is dropped.
    pub store_write_retries: usize,
    pub store_retry_backoff_ms: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            judge_temperature: 0.0,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            toolchain_version: "rust".to_string(),
            environment: "development".to_string(),
            store_write_retries: 2,
            store_retry_backoff_ms: 100,
        }
    }
}

/// Everything needed to build an `EvaluatedAgent` and its store. Shared by
/// the HTTP server and the `run_evaluation` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub database_path: String,
    pub sources: SourceConfig,
    pub ollama: OllamaConfig,
    pub retry: RetrySettings,
    pub eval: EvalConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_path: "data/evaluations.db".to_string(),
            sources: SourceConfig::default(),
            ollama: OllamaConfig::default(),
            retry: RetrySettings::default(),
            eval: EvalConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with process environment and `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let env = EnvOverlay::new(&lookup);

        env.set_string("DATABASE_PATH", &mut config.database_path);

        let sources = &mut config.sources;
        env.set_string("FUND_API_BASE_URL", &mut sources.fund_api_base);
        env.set_string("REGISTRY_BASE_URL", &mut sources.registry_base);
        env.set_string("SEARCH_ENDPOINT", &mut sources.search_endpoint);
        if let Some(key) = lookup("TAVILY_API_KEY").filter(|k| !k.is_empty()) {
            sources.search_api_key = Some(key);
        }
        if let Some(domains) = lookup("TRUSTED_DOMAINS") {
            sources.trusted_domains = domains
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
        }
        env.parse("MAX_WEB_RESULTS", &mut sources.max_web_results)?;
        env.parse("REQUEST_TIMEOUT_SECS", &mut sources.request_timeout_secs)?;

        let ollama = &mut config.ollama;
        env.set_string("OLLAMA_BASE_URL", &mut ollama.base_url);
        env.set_string("OLLAMA_MODEL", &mut ollama.model);
        env.parse("SYNTHESIS_TEMPERATURE", &mut ollama.synthesis_temperature)?;

        env.parse("MAX_RETRIES", &mut config.retry.max_retries)?;

        let eval = &mut config.eval;
        env.parse("CONFIDENCE_THRESHOLD", &mut eval.confidence_threshold)?;
        env.parse("STORE_WRITE_RETRIES", &mut eval.store_write_retries)?;
        env.set_string("ENVIRONMENT", &mut eval.environment);

        Ok(config)
    }
}

/// Typed reads of optional variables over any key lookup.
pub struct EnvOverlay<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<'a, F: Fn(&str) -> Option<String>> EnvOverlay<'a, F> {
    pub fn new(lookup: &'a F) -> Self {
        Self(lookup)
    }

    pub fn set_string(&self, key: &str, target: &mut String) {
        if let Some(value) = (self.0)(key) {
            *target = value;
        }
    }

    pub fn parse<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = (self.0)(key) {
            *target = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", key, value))?;
        }
        Ok(())
    }
}
