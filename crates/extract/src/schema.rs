use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    // Fund data lookups
    FundQuery,
    NavRequest,
    CompareFunds,
    PerformanceHistory,
    RedemptionQuery,

    // Guidance answered from web sources or synthesis
    GeneralInfo,
    KycQuery,
    AccountIssue,

    // Conversational
    Greeting,
    Smalltalk,
}

impl Intent {
    pub const ALL: [Intent; 10] = [
        Intent::FundQuery,
        Intent::NavRequest,
        Intent::CompareFunds,
        Intent::PerformanceHistory,
        Intent::RedemptionQuery,
        Intent::GeneralInfo,
        Intent::KycQuery,
        Intent::AccountIssue,
        Intent::Greeting,
        Intent::Smalltalk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FundQuery => "FUND_QUERY",
            Intent::NavRequest => "NAV_REQUEST",
            Intent::CompareFunds => "COMPARE_FUNDS",
            Intent::PerformanceHistory => "PERFORMANCE_HISTORY",
            Intent::RedemptionQuery => "REDEMPTION_QUERY",
            Intent::GeneralInfo => "GENERAL_INFO",
            Intent::KycQuery => "KYC_QUERY",
            Intent::AccountIssue => "ACCOUNT_ISSUE",
            Intent::Greeting => "GREETING",
            Intent::Smalltalk => "SMALLTALK",
        }
    }

    /// Parse the wire label, accepting either case.
    pub fn parse(label: &str) -> Option<Intent> {
        let upper = label.trim().to_ascii_uppercase();
        Intent::ALL.into_iter().find(|i| i.as_str() == upper)
    }

    /// Intents whose answers carry numeric fund facts (NAV, returns, holdings).
    /// These must never be answered from model synthesis alone.
    pub fn is_factual(&self) -> bool {
        matches!(
            self,
            Intent::FundQuery
                | Intent::NavRequest
                | Intent::CompareFunds
                | Intent::PerformanceHistory
        )
    }

    pub fn is_conversational(&self) -> bool {
        matches!(self, Intent::Greeting | Intent::Smalltalk)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Nav,
    ExpenseRatio,
    Aum,
    Returns,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Period {
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "3y")]
    ThreeYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "ytd")]
    YearToDate,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneYear => "1y",
            Period::ThreeYears => "3y",
            Period::FiveYears => "5y",
            Period::YearToDate => "ytd",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Urgent,
    Negative,
    Positive,
    Neutral,
}

/// Slot values pulled out of the utterance before intent rules run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fund_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compare_with: Vec<String>,
}

impl Entities {
    pub fn has_fund_reference(&self) -> bool {
        self.fund_name.is_some() || self.isin.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    pub entities: Entities,
    pub sentiment: Sentiment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_labels_match_wire_format() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
            assert_eq!(Intent::parse(&intent.as_str().to_lowercase()), Some(intent));
        }
        assert_eq!(Intent::parse("WEATHER"), None);
    }

    #[test]
    fn test_empty_entities_serialize_compactly() {
        let entities = Entities {
            period: Some(Period::ThreeYears),
            ..Entities::default()
        };
        assert_eq!(serde_json::to_value(&entities).unwrap(), serde_json::json!({ "period": "3y" }));
    }
}
