use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const DISCLAIMER_PHRASES: &[&str] = &[
    "market risks",
    "past performance",
    "not financial advice",
    "consult with",
    "professional advisor",
];

const RISK_PHRASES: &[&str] = &[
    "guaranteed returns",
    "risk-free",
    "risk free",
    "insider tip",
    "sure profit",
    "no risk",
    "assured profit",
];

const PII_TERMS: &[&str] = &[
    "pan card",
    "aadhaar",
    "aadhar",
    "bank account",
    "password",
    "credit card",
];

static PII_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // email
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        // Indian mobile, optional +91
        r"(?:\+91[\s-]?)?\b[6-9]\d{9}\b",
        // PAN
        r"\b[A-Z]{5}[0-9]{4}[A-Z]\b",
        // Aadhaar, 12 digits in groups of four
        r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}\b",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid pii regex"))
    .collect()
});

/// Local, deterministic compliance flags for one response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetyReport {
    pub contains_disclaimer: bool,
    pub risk_detected: bool,
    pub pii_detected: bool,
}

impl SafetyReport {
    pub fn check(response: &str) -> Self {
        let lower = response.to_lowercase();
        Self {
            contains_disclaimer: contains_any(&lower, DISCLAIMER_PHRASES),
            risk_detected: contains_any(&lower, RISK_PHRASES),
            pii_detected: contains_any(&lower, PII_TERMS)
                || PII_PATTERNS.iter().any(|re| re.is_match(response)),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::DISCLAIMER;

    #[test]
    fn test_disclaimer_detected() {
        let report = SafetyReport::check(&format!("NAV is ₹842.50.\n\n{}", DISCLAIMER));
        assert!(report.contains_disclaimer);
        assert!(!report.risk_detected);
        assert!(!report.pii_detected);
    }

    #[test]
    fn test_risk_phrases() {
        assert!(SafetyReport::check("This fund offers Guaranteed Returns!").risk_detected);
        assert!(SafetyReport::check("A risk-free bet").risk_detected);
        assert!(!SafetyReport::check("Equity funds carry market risk.").risk_detected);
    }

    #[test]
    fn test_pii_patterns() {
        assert!(SafetyReport::check("Mail me at asha@example.com").pii_detected);
        assert!(SafetyReport::check("Call +91 9876543210").pii_detected);
        assert!(SafetyReport::check("My PAN is ABCDE1234F").pii_detected);
        assert!(SafetyReport::check("Aadhaar 1234 5678 9012").pii_detected);
        assert!(SafetyReport::check("Share your bank account details").pii_detected);
        assert!(!SafetyReport::check("NAV ₹842.50 as of 2025-12-09; AUM ₹35,000 crore").pii_detected);
    }
}
