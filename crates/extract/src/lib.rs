pub mod schema;
pub mod entities;
pub mod rules;

pub use schema::{Entities, Intent, IntentResult, Metric, Period, Sentiment};
pub use entities::extract_entities;
pub use rules::{Rule, RULES};

/// Rule-based intent classifier. No I/O; every input classifies.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    rules: &'static [Rule],
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(RULES)
    }
}

impl Extractor {
    pub fn new(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    /// Extract entities, then run the ordered rules over the lowercased text.
    pub fn classify(&self, text: &str) -> IntentResult {
        let lower = text.to_lowercase();
        let entities = entities::extract_entities(text);
        let (intent, confidence) = rules::evaluate(self.rules, &lower, &entities);

        IntentResult {
            intent,
            confidence,
            sentiment: entities::detect_sentiment(&lower),
            entities,
        }
    }
}

/// Classify with the default rule table.
pub fn classify(text: &str) -> IntentResult {
    Extractor::default().classify(text)
}

/// Follow-up suggestions shown after an answer.
pub fn related_questions(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::FundQuery => &[
            "What is the current NAV?",
            "Show me performance history",
            "Compare with similar funds",
        ],
        Intent::NavRequest => &[
            "Show historical NAV data",
            "Compare NAV with benchmark",
            "When was the last NAV update?",
        ],
        Intent::CompareFunds => &[
            "Show detailed comparison metrics",
            "Which fund has better returns?",
            "Risk analysis of these funds",
        ],
        Intent::GeneralInfo => &[
            "Current market trends",
            "Best performing fund categories",
            "Investment strategies",
        ],
        _ => &[
            "How can I help with mutual funds?",
            "Ask me about specific funds",
            "Need investment guidance?",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nav_without_comparison() {
        for text in [
            "What is the NAV of Axis Bluechip Fund?",
            "nav",
            "latest nav please",
            "hi nav",
            "Show me the NAV history for my kyc account",
        ] {
            let result = classify(text);
            assert_eq!(result.intent, Intent::NavRequest, "{text}");
            assert_eq!(result.confidence, 0.90);
        }
    }

    #[test]
    fn test_nav_beats_compare() {
        // NAV_REQUEST is listed before COMPARE_FUNDS.
        let result = classify("Compare the NAV of Axis Bluechip Fund vs SBI Bluechip Fund");
        assert_eq!(result.intent, Intent::NavRequest);
        assert_eq!(result.confidence, 0.90);
        assert_eq!(result.entities.compare_with.len(), 2);
    }

    #[test]
    fn test_compare() {
        let result = classify("axis bluechip versus sbi bluechip");
        assert_eq!(result.intent, Intent::CompareFunds);
        assert_eq!(result.confidence, 0.90);
    }

    #[test]
    fn test_lowercase_compare_collects_both_funds() {
        let result = classify("compare hdfc top 100 fund and axis bluechip fund");
        assert_eq!(result.intent, Intent::CompareFunds);
        assert_eq!(
            result.entities.compare_with,
            vec!["hdfc top 100 fund", "axis bluechip fund"]
        );
    }

    #[test]
    fn test_fund_name_entity_drives_fund_query() {
        let result = classify("Tell me about Axis fund");
        assert_eq!(result.intent, Intent::FundQuery);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.entities.fund_name.as_deref(), Some("Axis fund"));

        let result = classify("Is Parag Parikh Flexi Cap any good for me");
        assert_eq!(result.intent, Intent::FundQuery);
    }

    #[test]
    fn test_empty_and_unknown_fall_back() {
        for text in ["", "   ", "how should I think about diversification"] {
            let result = classify(text);
            assert_eq!(result.intent, Intent::GeneralInfo, "{text:?}");
            assert_eq!(result.confidence, 0.70);
        }
    }

    #[test]
    fn test_conversational() {
        assert_eq!(classify("Hello").intent, Intent::Greeting);
        assert_eq!(classify("hey there").confidence, 0.95);
        assert_eq!(classify("thanks a lot").intent, Intent::Smalltalk);
    }

    #[test]
    fn test_other_rules() {
        assert_eq!(classify("top performing funds this year").intent, Intent::PerformanceHistory);
        assert_eq!(classify("how do I redeem my units").intent, Intent::RedemptionQuery);
        assert_eq!(classify("what documents are needed for kyc").intent, Intent::KycQuery);
        assert_eq!(classify("my login is blocked").intent, Intent::AccountIssue);
    }

    #[test]
    fn test_intent_label_roundtrip() {
        for intent in Intent::ALL {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("nav_request"), Some(Intent::NavRequest));
        assert_eq!(Intent::parse("ERROR"), None);
    }
}
