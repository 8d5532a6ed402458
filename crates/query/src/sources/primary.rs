use async_trait::async_trait;
use extract::Period;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    envelope_list, first_f64, first_str, ResolveRequest, SourceConfig, SourceId, SourcePayload,
    SourceStep, Target,
};
use crate::error::SourceError;

/// A fund as reported by the primary database, with upstream field
/// aliases folded into one shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FundRecord {
    pub scheme_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amc_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_1y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_3y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_5y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aum_crore: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fund_manager: Option<String>,
}

impl FundRecord {
    pub fn named(name: &str) -> Self {
        Self {
            scheme_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Normalise one upstream object. Returns None without a usable name.
    pub fn from_json(value: &Value) -> Option<Self> {
        let scheme_name = first_str(value, &["scheme_name", "fund_name", "name", "scheme"])?;

        Some(Self {
            scheme_name,
            isin: first_str(value, &["isin", "isin_growth", "isin_code"]),
            amc_name: first_str(
                value,
                &["amc_name", "fund_house", "fund_company", "management_company", "amc_code"],
            ),
            category: first_str(value, &["fund_type", "scheme_type", "category", "fund_category"]),
            plan: first_str(value, &["plan", "scheme_plan", "option"]),
            nav: first_f64(value, &["nav", "current_nav", "net_asset_value", "latest_nav"]),
            nav_date: first_str(value, &["nav_date", "as_of", "date"]),
            return_1y: first_f64(value, &["return_1y", "returns_1y", "one_year_return"]),
            return_3y: first_f64(value, &["return_3y", "returns_3y", "three_year_return"]),
            return_5y: first_f64(value, &["return_5y", "returns_5y", "five_year_return"]),
            expense_ratio: first_f64(value, &["expense_ratio", "ter"]),
            aum_crore: first_f64(value, &["aum", "aum_crore", "fund_size"]),
            risk_category: first_str(value, &["sebi_risk_category", "risk_level", "risk_category"]),
            fund_manager: first_str(value, &["fund_manager", "manager"]),
        })
    }

    /// Upstream values passed through as-is; NAV is printed to two decimals.
    pub fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(nav) = self.nav {
            match &self.nav_date {
                Some(date) => parts.push(format!("NAV ₹{:.2} (as of {})", nav, date)),
                None => parts.push(format!("NAV ₹{:.2}", nav)),
            }
        }
        for (label, value) in [
            ("1Y return", self.return_1y),
            ("3Y return", self.return_3y),
            ("5Y return", self.return_5y),
            ("expense ratio", self.expense_ratio),
        ] {
            if let Some(v) = value {
                parts.push(format!("{} {}%", label, v));
            }
        }
        if let Some(aum) = self.aum_crore {
            parts.push(format!("AUM ₹{} cr", aum));
        }
        if let Some(category) = &self.category {
            parts.push(format!("category {}", category));
        }
        if let Some(risk) = &self.risk_category {
            parts.push(format!("risk {}", risk));
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

    /// At least one search term of three or more letters appears in the
    /// scheme or AMC name.
    fn matches_terms(&self, terms: &[String]) -> bool {
        let scheme = self.scheme_name.to_lowercase();
        let amc = self.amc_name.as_deref().unwrap_or_default().to_lowercase();
        terms
            .iter()
            .filter(|t| t.len() >= 3)
            .any(|t| scheme.contains(t.as_str()) || amc.contains(t.as_str()))
    }
}

/// Read access to the primary fund database.
#[async_trait]
pub trait FundDatabase: Send + Sync {
    async fn search(&self, name: &str) -> Result<Vec<FundRecord>, SourceError>;
    async fn by_isin(&self, isin: &str) -> Result<Option<FundRecord>, SourceError>;
    async fn top_performers(&self, period: Period) -> Result<Vec<FundRecord>, SourceError>;
}

pub struct HttpFundDatabase {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFundDatabase {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.fund_api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<Value>, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fund database request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        Ok(Some(body))
    }

    fn fund_list(body: &Value) -> Vec<FundRecord> {
        envelope_list(body, &["data", "results", "funds"])
            .into_iter()
            .filter_map(FundRecord::from_json)
            .collect()
    }
}

#[async_trait]
impl FundDatabase for HttpFundDatabase {
    async fn search(&self, name: &str) -> Result<Vec<FundRecord>, SourceError> {
        let body = self.get_json("/api/funds/search", &[("search", name)]).await?;
        Ok(body.as_ref().map(Self::fund_list).unwrap_or_default())
    }

    async fn by_isin(&self, isin: &str) -> Result<Option<FundRecord>, SourceError> {
        let Some(body) = self.get_json(&format!("/api/funds/{}", isin), &[]).await? else {
            return Ok(None);
        };
        let record = body.get("data").unwrap_or(&body);
        Ok(FundRecord::from_json(record))
    }

    async fn top_performers(&self, period: Period) -> Result<Vec<FundRecord>, SourceError> {
        let body = self
            .get_json("/api/funds/performance", &[("period", period.as_str())])
            .await?;
        Ok(body.as_ref().map(Self::fund_list).unwrap_or_default())
    }
}

/// First link of the chain: authoritative structured fund data.
pub struct PrimaryApiStep {
    db: Arc<dyn FundDatabase>,
    max_results: usize,
}

impl PrimaryApiStep {
    pub fn new(db: Arc<dyn FundDatabase>, max_results: usize) -> Self {
        Self { db, max_results }
    }
}

#[async_trait]
impl SourceStep for PrimaryApiStep {
    fn id(&self) -> SourceId {
        SourceId::PrimaryApi
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<(SourcePayload, f32), SourceError> {
        match &request.target {
            Target::Fund { isin: Some(isin), .. } => match self.db.by_isin(isin).await? {
                Some(fund) => Ok((SourcePayload::Funds(vec![fund]), 0.95)),
                None => Err(SourceError::Empty(isin.clone())),
            },
            Target::Fund { name: Some(name), .. } => {
                let terms: Vec<String> =
                    name.to_lowercase().split_whitespace().map(str::to_string).collect();
                let mut funds: Vec<FundRecord> = self
                    .db
                    .search(name)
                    .await?
                    .into_iter()
                    .filter(|f| f.matches_terms(&terms))
                    .collect();
                funds.truncate(self.max_results);

                if funds.is_empty() {
                    return Err(SourceError::Empty(name.clone()));
                }
                let exact = funds.len() == 1 || funds.iter().any(|f| f.scheme_name.eq_ignore_ascii_case(name));
                let confidence = if exact { 0.95 } else { 0.90 };
                Ok((SourcePayload::Funds(funds), confidence))
            }
            Target::Fund { .. } => Err(SourceError::NotApplicable(
                "no fund name or ISIN to look up".to_string(),
            )),
            Target::TopPerformers { period } => {
                let mut funds = self.db.top_performers(*period).await?;
                funds.truncate(self.max_results);
                if funds.is_empty() {
                    return Err(SourceError::Empty(format!("top performers ({})", period.as_str())));
                }
                Ok((SourcePayload::Funds(funds), 0.90))
            }
            Target::Topic => Err(SourceError::NotApplicable(
                "fund database holds no guidance topics".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_aliases() {
        let fund = FundRecord::from_json(&json!({
            "fund_name": "HDFC Top 100 Fund",
            "current_nav": "842.5",
            "fund_house": "HDFC Mutual Fund",
            "risk_level": "Very High",
            "return_1y": 14.2
        }))
        .unwrap();

        assert_eq!(fund.scheme_name, "HDFC Top 100 Fund");
        assert_eq!(fund.nav, Some(842.5));
        assert_eq!(fund.amc_name.as_deref(), Some("HDFC Mutual Fund"));
        assert_eq!(fund.risk_category.as_deref(), Some("Very High"));
        assert!(FundRecord::from_json(&json!({"nav": 10.0})).is_none());
    }

    #[test]
    fn test_summary_line_keeps_figures() {
        let fund = FundRecord {
            nav: Some(842.5),
            nav_date: Some("2025-01-10".to_string()),
            return_1y: Some(14.2),
            ..FundRecord::named("HDFC Top 100 Fund")
        };
        assert_eq!(
            fund.summary_line(),
            "HDFC Top 100 Fund: NAV ₹842.50 (as of 2025-01-10); 1Y return 14.2%"
        );
    }

    #[test]
    fn test_term_filter() {
        let terms = vec!["axis".to_string(), "of".to_string()];
        assert!(FundRecord::named("Axis Bluechip Fund").matches_terms(&terms));
        assert!(!FundRecord::named("Fund of Funds").matches_terms(&terms));
    }
}
