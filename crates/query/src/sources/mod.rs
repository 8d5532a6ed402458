use async_trait::async_trait;
use extract::{Intent, Period};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::SourceError;

pub mod primary;
pub mod registry;
pub mod regulatory;
pub mod synthesis;
pub mod web;

pub use primary::{FundDatabase, FundRecord, HttpFundDatabase, PrimaryApiStep};
pub use registry::{HttpSchemeRegistry, SchemeRecord, SchemeRegistry, SecondaryRegistryStep};
pub use regulatory::RegulatoryScrapeStep;
pub use synthesis::OracleSynthesisStep;
pub use web::{SearchSnippet, TavilySearch, WebSearch, WebSearchStep};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceId {
    PrimaryApi,
    RegulatoryScrape,
    SecondaryRegistry,
    WebSearch,
    GenerationOracle,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::PrimaryApi => "PRIMARY_API",
            SourceId::RegulatoryScrape => "REGULATORY_SCRAPE",
            SourceId::SecondaryRegistry => "SECONDARY_REGISTRY",
            SourceId::WebSearch => "WEB_SEARCH",
            SourceId::GenerationOracle => "GENERATION_ORACLE",
        }
    }

    /// Name shown to users when citing or listing sources.
    pub fn label(&self) -> &'static str {
        match self {
            SourceId::PrimaryApi => "fund database",
            SourceId::RegulatoryScrape => "regulatory filings",
            SourceId::SecondaryRegistry => "scheme registry",
            SourceId::WebSearch => "web search",
            SourceId::GenerationOracle => "language model",
        }
    }

    /// Everything except the generation oracle is an external data API.
    pub fn is_data_api(&self) -> bool {
        !matches!(self, SourceId::GenerationOracle)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a source returned. Facts stay structured until the answer is composed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum SourcePayload {
    Funds(Vec<FundRecord>),
    Schemes(Vec<SchemeRecord>),
    Snippets(Vec<SearchSnippet>),
    Synthesis(String),
}

impl SourcePayload {
    /// One line per fact, used both in prompts and as the evaluation context.
    pub fn context_lines(&self) -> Vec<String> {
        match self {
            SourcePayload::Funds(funds) => funds.iter().map(FundRecord::summary_line).collect(),
            SourcePayload::Schemes(schemes) => {
                schemes.iter().map(SchemeRecord::summary_line).collect()
            }
            SourcePayload::Snippets(snippets) => {
                snippets.iter().map(SearchSnippet::summary_line).collect()
            }
            SourcePayload::Synthesis(text) => vec![text.clone()],
        }
    }

    /// Distinct entity names, in order, for ambiguity checks.
    pub fn candidate_names(&self) -> Vec<String> {
        let names: Vec<&str> = match self {
            SourcePayload::Funds(funds) => funds.iter().map(|f| f.scheme_name.as_str()).collect(),
            SourcePayload::Schemes(schemes) => {
                schemes.iter().map(|s| s.scheme_name.as_str()).collect()
            }
            _ => Vec::new(),
        };

        let mut distinct: Vec<String> = Vec::new();
        for name in names {
            if !distinct.iter().any(|d| d.eq_ignore_ascii_case(name)) {
                distinct.push(name.to_string());
            }
        }
        distinct
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SourcePayload::Funds(v) => v.is_empty(),
            SourcePayload::Schemes(v) => v.is_empty(),
            SourcePayload::Snippets(v) => v.is_empty(),
            SourcePayload::Synthesis(text) => text.trim().is_empty(),
        }
    }
}

/// Outcome of one source attempt. `found == true` iff `payload` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceResult {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<SourcePayload>,
    pub source_id: SourceId,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: f64,
    pub retries: usize,
}

impl SourceResult {
    pub fn hit(source_id: SourceId, payload: SourcePayload, confidence: f32) -> Self {
        Self {
            found: true,
            payload: Some(payload),
            source_id,
            confidence,
            error: None,
            latency_ms: 0.0,
            retries: 0,
        }
    }

    pub fn miss(source_id: SourceId, error: impl Into<String>) -> Self {
        Self {
            found: false,
            payload: None,
            source_id,
            confidence: 0.0,
            error: Some(error.into()),
            latency_ms: 0.0,
            retries: 0,
        }
    }
}

/// What the resolver is asked to look up.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Fund {
        name: Option<String>,
        isin: Option<String>,
    },
    TopPerformers {
        period: Period,
    },
    /// Free-form guidance; no single entity.
    Topic,
}

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub intent: Intent,
    pub query: String,
    pub target: Target,
}

/// One link in the resolver chain.
#[async_trait]
pub trait SourceStep: Send + Sync {
    fn id(&self) -> SourceId;

    /// A non-empty payload with its confidence, or why this source has nothing.
    async fn fetch(&self, request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub fund_api_base: String,
    pub registry_base: String,
    pub search_endpoint: String,
    pub search_api_key: Option<String>,
    pub trusted_domains: Vec<String>,
    pub max_web_results: usize,
    pub max_fund_results: usize,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fund_api_base: "https://tokenn.in".to_string(),
            registry_base: "https://tokenn.in".to_string(),
            search_endpoint: "https://api.tavily.com/search".to_string(),
            search_api_key: None,
            trusted_domains: vec![
                "sebi.gov.in".to_string(),
                "amfiindia.com".to_string(),
                "morningstar.in".to_string(),
                "valueresearchonline.com".to_string(),
            ],
            max_web_results: 5,
            max_fund_results: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Unwrap the list shapes the upstream APIs use: a bare array, or an
/// object carrying the array under one of `keys`.
pub(crate) fn envelope_list<'a>(value: &'a Value, keys: &[&str]) -> Vec<&'a Value> {
    if let Some(items) = value.as_array() {
        return items.iter().collect();
    }
    for key in keys {
        if let Some(items) = value.get(key).and_then(Value::as_array) {
            return items.iter().collect();
        }
    }
    Vec::new()
}

pub(crate) fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Numbers arrive as JSON numbers or as strings like "842.50" or "12.3%".
pub(crate) fn first_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').replace(',', "").parse().ok(),
        _ => None,
    })
}

pub(crate) fn first_bool(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" | "TRUE" | "1" => Some(true),
            "N" | "NO" | "FALSE" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}
