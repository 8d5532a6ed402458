use extract::{Intent, IntentResult, Period};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sources::Target;

/// Named wrappers around resolver calls. Closed set; the intent table in
/// `for_intent` is the only place tools are chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    NavLookup,
    FundProfile,
    CompareFunds,
    PerformanceHistory,
    TopPerformers,
    Research,
    Conversation,
}

impl ToolKind {
    pub fn for_intent(result: &IntentResult) -> ToolKind {
        let has_fund = result.entities.has_fund_reference();
        match result.intent {
            Intent::NavRequest => ToolKind::NavLookup,
            Intent::FundQuery if has_fund => ToolKind::FundProfile,
            Intent::FundQuery => ToolKind::Research,
            Intent::CompareFunds => ToolKind::CompareFunds,
            Intent::PerformanceHistory if has_fund => ToolKind::PerformanceHistory,
            Intent::PerformanceHistory => ToolKind::TopPerformers,
            Intent::RedemptionQuery
            | Intent::GeneralInfo
            | Intent::KycQuery
            | Intent::AccountIssue => ToolKind::Research,
            Intent::Greeting | Intent::Smalltalk => ToolKind::Conversation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::NavLookup => "nav_lookup",
            ToolKind::FundProfile => "fund_profile",
            ToolKind::CompareFunds => "compare_funds",
            ToolKind::PerformanceHistory => "performance_history",
            ToolKind::TopPerformers => "top_performers",
            ToolKind::Research => "research",
            ToolKind::Conversation => "conversation",
        }
    }

    /// Tools that look up a single named fund.
    pub fn requires_fund(&self) -> bool {
        matches!(
            self,
            ToolKind::NavLookup | ToolKind::FundProfile | ToolKind::PerformanceHistory
        )
    }

    /// Resolver targets this tool will query, one resolver call each.
    pub fn targets(&self, result: &IntentResult) -> Vec<Target> {
        let entities = &result.entities;
        match self {
            ToolKind::NavLookup | ToolKind::FundProfile | ToolKind::PerformanceHistory => {
                vec![Target::Fund {
                    name: entities.fund_name.clone(),
                    isin: entities.isin.clone(),
                }]
            }
            ToolKind::CompareFunds => entities
                .compare_with
                .iter()
                .map(|name| Target::Fund {
                    name: Some(name.clone()),
                    isin: None,
                })
                .collect(),
            ToolKind::TopPerformers => vec![Target::TopPerformers {
                period: entities.period.unwrap_or(Period::OneYear),
            }],
            ToolKind::Research => vec![Target::Topic],
            ToolKind::Conversation => Vec::new(),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_table() {
        let cases = [
            ("What is the NAV of Axis Bluechip Fund?", ToolKind::NavLookup),
            ("Tell me about Axis fund", ToolKind::FundProfile),
            ("show me large cap funds", ToolKind::Research),
            ("Compare Axis Bluechip Fund vs SBI Bluechip Fund", ToolKind::CompareFunds),
            ("3 year returns of Mirae Asset Large Cap Fund", ToolKind::PerformanceHistory),
            ("top performing funds this year", ToolKind::TopPerformers),
            ("how do I redeem my units", ToolKind::Research),
            ("hello", ToolKind::Conversation),
        ];
        for (text, tool) in cases {
            assert_eq!(ToolKind::for_intent(&extract::classify(text)), tool, "{text}");
        }
    }

    #[test]
    fn test_top_performers_default_period() {
        let result = extract::classify("best fund to buy");
        let targets = ToolKind::TopPerformers.targets(&result);
        assert_eq!(targets, vec![Target::TopPerformers { period: Period::OneYear }]);
    }
}
