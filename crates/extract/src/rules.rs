use crate::entities::has_word;
use crate::schema::{Entities, Intent};

/// A keyword test against the lowercased utterance.
#[derive(Debug, Clone, Copy)]
pub enum Keyword {
    /// Substring match anywhere in the text.
    Phrase(&'static str),
    /// Whole-token match, for short words like "vs" that hide inside others.
    Word(&'static str),
}

impl Keyword {
    fn matches(&self, lower: &str) -> bool {
        match self {
            Keyword::Phrase(p) => lower.contains(p),
            Keyword::Word(w) => has_word(lower, w),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    AnyOf(&'static [Keyword]),
    /// At most three words opening with a greeting.
    ShortGreeting,
    /// An extracted fund name or ISIN, or any of the keywords.
    FundReferenceOr(&'static [Keyword]),
}

impl Predicate {
    pub fn matches(&self, lower: &str, entities: &Entities) -> bool {
        match self {
            Predicate::AnyOf(keywords) => keywords.iter().any(|k| k.matches(lower)),
            Predicate::ShortGreeting => is_short_greeting(lower),
            Predicate::FundReferenceOr(keywords) => {
                entities.has_fund_reference() || keywords.iter().any(|k| k.matches(lower))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub intent: Intent,
    pub confidence: f32,
    pub predicate: Predicate,
}

pub const FALLBACK_INTENT: Intent = Intent::GeneralInfo;
pub const FALLBACK_CONFIDENCE: f32 = 0.70;

use Keyword::{Phrase, Word};

/// Evaluated top to bottom, first match wins. The order is the only
/// tie-break: text that hits two rules gets the earlier one.
pub static RULES: &[Rule] = &[
    // Listed first: "compare the nav of X and Y" is a NAV_REQUEST.
    Rule {
        intent: Intent::NavRequest,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Phrase("nav"),
            Phrase("net asset value"),
            Phrase("current value"),
        ]),
    },
    // Before performance: "compare returns of X vs Y" is a comparison.
    Rule {
        intent: Intent::CompareFunds,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Phrase("compare"),
            Phrase("comparison"),
            Phrase("versus"),
            Word("vs"),
            Phrase("difference between"),
        ]),
    },
    // Before fund query: "returns of Axis Bluechip Fund" asks for performance.
    Rule {
        intent: Intent::PerformanceHistory,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Phrase("performance"),
            Phrase("return"),
            Phrase("growth"),
            Phrase("gained"),
            Phrase("top perform"),
            Phrase("best fund"),
            Phrase("highest return"),
        ]),
    },
    // Before fund query: "redeem my Axis fund units" is a redemption.
    Rule {
        intent: Intent::RedemptionQuery,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Phrase("redeem"),
            Phrase("redemption"),
            Phrase("withdraw"),
            Word("exit"),
            Word("sell"),
        ]),
    },
    // Before fund query so a capitalised "Good Morning Team" greets.
    Rule {
        intent: Intent::Greeting,
        confidence: 0.95,
        predicate: Predicate::ShortGreeting,
    },
    // Generic fund lookups; an extracted name alone is enough.
    Rule {
        intent: Intent::FundQuery,
        confidence: 0.85,
        predicate: Predicate::FundReferenceOr(&[
            Word("isin"),
            Phrase("find fund"),
            Phrase("search fund"),
            Phrase("show fund"),
            Phrase("list fund"),
            Phrase("show me"),
            Phrase("funds with"),
            Phrase("funds in"),
            Phrase("factsheet"),
            Phrase("details about"),
            Phrase("information about"),
            Phrase("tell me about"),
            Phrase("large cap"),
            Phrase("mid cap"),
            Phrase("small cap"),
            Phrase("5-star"),
            Phrase("five star"),
            Phrase("star rated"),
        ]),
    },
    // After fund query: "documents for Axis fund" stays a fund lookup.
    Rule {
        intent: Intent::KycQuery,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Word("kyc"),
            Phrase("know your customer"),
            Phrase("verification"),
            Phrase("documents"),
            Phrase("identity"),
        ]),
    },
    // After kyc: "kyc blocked my account" is about kyc.
    Rule {
        intent: Intent::AccountIssue,
        confidence: 0.85,
        predicate: Predicate::AnyOf(&[
            Phrase("account"),
            Phrase("login"),
            Phrase("password"),
            Word("access"),
            Phrase("blocked"),
            Word("issue"),
            Phrase("problem"),
        ]),
    },
    // Last keyword rule; anything domain-specific outranks chit-chat.
    Rule {
        intent: Intent::Smalltalk,
        confidence: 0.90,
        predicate: Predicate::AnyOf(&[
            Phrase("how are you"),
            Phrase("what can you do"),
            Phrase("who are you"),
            Phrase("thank you"),
            Word("thanks"),
        ]),
    },
];

/// Linear scan of `rules`; falls back to GENERAL_INFO at the lowest confidence.
pub fn evaluate(rules: &[Rule], lower: &str, entities: &Entities) -> (Intent, f32) {
    rules
        .iter()
        .find(|rule| rule.predicate.matches(lower, entities))
        .map(|rule| (rule.intent, rule.confidence))
        .unwrap_or((FALLBACK_INTENT, FALLBACK_CONFIDENCE))
}

fn is_short_greeting(lower: &str) -> bool {
    const OPENERS: &[&str] = &["hi", "hello", "hey", "namaste", "greetings"];
    const PHRASES: &[&str] = &["good morning", "good afternoon", "good evening"];

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() || words.len() > 3 {
        return false;
    }
    OPENERS.contains(&words[0]) || PHRASES.iter().any(|p| lower.trim_start().starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        for rule in RULES {
            assert!(rule.confidence > FALLBACK_CONFIDENCE, "{:?}", rule.intent);
        }
    }

    #[test]
    fn test_vs_is_token_match() {
        let none = Entities::default();
        assert_eq!(evaluate(RULES, "axis vs sbi", &none).0, Intent::CompareFunds);
        assert_eq!(evaluate(RULES, "canvas bags", &none).0, Intent::GeneralInfo);
    }

    #[test]
    fn test_short_greeting() {
        assert!(is_short_greeting("hello there"));
        assert!(is_short_greeting("good morning"));
        assert!(!is_short_greeting("hello can you explain sip investing"));
        assert!(!is_short_greeting(""));
    }
}
