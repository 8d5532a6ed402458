use async_trait::async_trait;
use extract::Intent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ResolveRequest, SourceConfig, SourceId, SourcePayload, SourceStep};
use crate::error::SourceError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, alias = "relevance_score")]
    pub score: f32,
}

impl SearchSnippet {
    pub fn summary_line(&self) -> String {
        let content: String = self.content.chars().take(400).collect();
        format!("{} ({}): {}", self.title, self.url, content.trim())
    }
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        domains: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchSnippet>, SourceError>;
}

/// Tavily-compatible search endpoint.
pub struct TavilySearch {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    search_depth: &'static str,
    include_domains: &'a [String],
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchSnippet>,
}

impl TavilySearch {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.search_endpoint.clone(),
            api_key: config.search_api_key.clone().filter(|k| !k.is_empty()),
            client,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(
        &self,
        query: &str,
        domains: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchSnippet>, SourceError> {
        let Some(api_key) = &self.api_key else {
            return Err(SourceError::Unavailable(
                "web search API key not configured".to_string(),
            ));
        };

        let request = TavilyRequest {
            query,
            search_depth: "advanced",
            include_domains: domains,
            max_results,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body: TavilyResponse = response.json().await?;
        Ok(body.results)
    }
}

pub struct WebSearchStep {
    search: Arc<dyn WebSearch>,
    trusted_domains: Vec<String>,
    max_results: usize,
}

impl WebSearchStep {
    pub fn new(search: Arc<dyn WebSearch>, trusted_domains: Vec<String>, max_results: usize) -> Self {
        Self {
            search,
            trusted_domains,
            max_results,
        }
    }
}

/// True when `url`'s host is one of `domains` or a subdomain of one.
/// An empty list trusts everything.
pub fn is_trusted_url(url: &str, domains: &[String]) -> bool {
    if domains.is_empty() {
        return true;
    }
    let Some(host) = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

/// Steer results toward the domain of the question.
pub fn search_query(query: &str, intent: Intent) -> String {
    let context = match intent {
        Intent::FundQuery | Intent::NavRequest | Intent::PerformanceHistory => {
            "mutual fund India NAV details performance"
        }
        Intent::CompareFunds => "mutual fund comparison India performance metrics",
        Intent::KycQuery => "mutual fund KYC requirements India",
        Intent::RedemptionQuery => "mutual fund redemption process India",
        _ => "mutual fund investment India",
    };
    format!("{} {}", query.trim(), context)
}

#[async_trait]
impl SourceStep for WebSearchStep {
    fn id(&self) -> SourceId {
        SourceId::WebSearch
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError> {
        let query = search_query(&request.query, request.intent);
        let snippets = self
            .search
            .search(&query, &self.trusted_domains, self.max_results)
            .await?;

        let returned = snippets.len();
        let snippets: Vec<_> = snippets
            .into_iter()
            .filter(|s| is_trusted_url(&s.url, &self.trusted_domains))
            .collect();
        if snippets.len() < returned {
            debug!(dropped = returned - snippets.len(), "Discarded untrusted search results");
        }

        if snippets.is_empty() {
            return Err(SourceError::Empty(query));
        }
        Ok((SourcePayload::Snippets(snippets), 0.75))
    }
}
