use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::{
    envelope_list, first_bool, first_f64, first_str, ResolveRequest, SourceConfig, SourceId,
    SourcePayload, SourceStep, Target,
};
use crate::error::SourceError;

/// Exchange scheme master entry: transactional details rather than prices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemeRecord {
    pub scheme_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amc_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_purchase_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sip_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_date: Option<String>,
}

impl SchemeRecord {
    pub fn named(name: &str) -> Self {
        Self {
            scheme_name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        Some(Self {
            scheme_name: first_str(value, &["scheme_name", "name"])?,
            isin: first_str(value, &["isin"]),
            amc_code: first_str(value, &["amc_code", "amc_name"]),
            scheme_type: first_str(value, &["scheme_type", "category"]),
            minimum_purchase_amount: first_f64(value, &["minimum_purchase_amount"]),
            sip_allowed: first_bool(value, &["sip_flag"]),
            purchase_allowed: first_bool(value, &["purchase_allowed"]),
            redemption_allowed: first_bool(value, &["redemption_allowed"]),
            benchmark: first_str(value, &["benchmark"]),
            launch_date: first_str(value, &["launch_date"]),
        })
    }

    pub fn summary_line(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut parts = Vec::new();

        if let Some(kind) = &self.scheme_type {
            parts.push(format!("type {}", kind));
        }
        if let Some(min) = self.minimum_purchase_amount {
            parts.push(format!("minimum purchase ₹{}", min));
        }
        if let Some(sip) = self.sip_allowed {
            parts.push(format!("SIP {}", yes_no(sip)));
        }
        if let Some(redeem) = self.redemption_allowed {
            parts.push(format!("redemption {}", yes_no(redeem)));
        }
        if let Some(benchmark) = &self.benchmark {
            parts.push(format!("benchmark {}", benchmark));
        }
        if let Some(isin) = &self.isin {
            parts.push(format!("ISIN {}", isin));
        }

        if parts.is_empty() {
            self.scheme_name.clone()
        } else {
            format!("{}: {}", self.scheme_name, parts.join("; "))
        }
    }
}

#[async_trait]
pub trait SchemeRegistry: Send + Sync {
    async fn by_isin(&self, isin: &str) -> Result<Vec<SchemeRecord>, SourceError>;
    async fn search(&self, scheme_name: &str) -> Result<Vec<SchemeRecord>, SourceError>;
}

pub struct HttpSchemeRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSchemeRegistry {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.registry_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn fetch_schemes(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<SchemeRecord>, SourceError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        let mut items = envelope_list(&body, &["schemes", "data", "results"]);
        if items.is_empty() && body.is_object() {
            items.push(&body);
        }
        Ok(items.into_iter().filter_map(SchemeRecord::from_json).collect())
    }
}

#[async_trait]
impl SchemeRegistry for HttpSchemeRegistry {
    async fn by_isin(&self, isin: &str) -> Result<Vec<SchemeRecord>, SourceError> {
        let url = format!("{}/api/bse-schemes/by-isin/{}", self.base_url, isin);
        self.fetch_schemes(&url, &[]).await
    }

    async fn search(&self, scheme_name: &str) -> Result<Vec<SchemeRecord>, SourceError> {
        let url = format!("{}/api/bse-schemes/", self.base_url);
        self.fetch_schemes(&url, &[("scheme_name", scheme_name), ("active_only", "true")])
            .await
    }
}

pub struct SecondaryRegistryStep {
    registry: Arc<dyn SchemeRegistry>,
    max_results: usize,
}

impl SecondaryRegistryStep {
    pub fn new(registry: Arc<dyn SchemeRegistry>, max_results: usize) -> Self {
        Self { registry, max_results }
    }
}

#[async_trait]
impl SourceStep for SecondaryRegistryStep {
    fn id(&self) -> SourceId {
        SourceId::SecondaryRegistry
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError> {
        let (mut schemes, key) = match &request.target {
            Target::Fund { isin: Some(isin), .. } => (self.registry.by_isin(isin).await?, isin),
            Target::Fund { name: Some(name), .. } => (self.registry.search(name).await?, name),
            _ => {
                return Err(SourceError::NotApplicable(
                    "scheme registry is only searched by fund".to_string(),
                ));
            }
        };

        schemes.truncate(self.max_results);
        if schemes.is_empty() {
            return Err(SourceError::Empty(key.clone()));
        }
        Ok((SourcePayload::Schemes(schemes), 0.95))
    }
}
