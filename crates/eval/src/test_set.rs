use extract::Intent;
use store::{Difficulty, TestCase};

/// Seed cases used when the test-case table is empty.
pub fn builtin_test_cases() -> Vec<TestCase> {
    vec![
        // NAV lookups
        TestCase::new("What is the current NAV of HDFC Top 100 Fund?", Intent::NavRequest, "nav", Difficulty::Easy)
            .with_keywords(&["NAV"]),
        TestCase::new("nav of axis bluechip fund today", Intent::NavRequest, "nav", Difficulty::Easy)
            .with_keywords(&["NAV"]),
        TestCase::new("Net asset value for INF179K01BE2", Intent::NavRequest, "nav", Difficulty::Medium),
        // Fund details
        TestCase::new("Tell me about SBI Small Cap Fund", Intent::FundQuery, "fund_info", Difficulty::Easy),
        TestCase::new("What is the expense ratio of Mirae Asset Large Cap Fund?", Intent::FundQuery, "fund_info", Difficulty::Medium)
            .with_keywords(&["expense"]),
        // Comparisons
        TestCase::new("Compare HDFC Top 100 Fund and ICICI Bluechip Fund", Intent::CompareFunds, "compare", Difficulty::Medium),
        TestCase::new("Which is better, Axis Midcap Fund vs Kotak Emerging Equity Fund?", Intent::CompareFunds, "compare", Difficulty::Hard),
        // Performance
        TestCase::new("Show the 3 year returns of Parag Parikh Flexi Cap Fund", Intent::PerformanceHistory, "performance", Difficulty::Medium)
            .with_keywords(&["return"]),
        TestCase::new("Which funds performed best this year?", Intent::PerformanceHistory, "performance", Difficulty::Hard),
        // Service requests
        TestCase::new("How do I redeem my units?", Intent::RedemptionQuery, "service", Difficulty::Easy)
            .with_keywords(&["redeem"]),
        TestCase::new("What documents are needed for KYC?", Intent::KycQuery, "service", Difficulty::Easy)
            .with_keywords(&["KYC"]),
        TestCase::new("My SIP amount was debited twice from my account", Intent::AccountIssue, "service", Difficulty::Medium),
        // General guidance
        TestCase::new("What is a mutual fund?", Intent::GeneralInfo, "general", Difficulty::Easy),
        TestCase::new("Should I invest in ELSS for tax saving?", Intent::GeneralInfo, "general", Difficulty::Hard),
        // Conversation
        TestCase::new("Hello", Intent::Greeting, "conversation", Difficulty::Easy),
        TestCase::new("thanks, that was helpful", Intent::Smalltalk, "conversation", Difficulty::Easy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Extractor;

    #[test]
    fn test_builtin_cases_cover_every_category() {
        let cases = builtin_test_cases();
        for category in ["nav", "fund_info", "compare", "performance", "service", "general", "conversation"] {
            assert!(cases.iter().any(|c| c.category == category), "missing {}", category);
        }
    }

    #[test]
    fn test_easy_cases_classify_as_expected() {
        let extractor = Extractor::default();
        for case in builtin_test_cases().iter().filter(|c| c.difficulty == Difficulty::Easy) {
            assert_eq!(extractor.classify(&case.query).intent, case.expected_intent, "{}", case.query);
        }
    }
}
