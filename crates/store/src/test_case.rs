use extract::Intent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// Operator-authored supervised example for batch evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    #[serde(default)]
    pub id: Option<i64>,
    pub query: String,
    pub expected_intent: Intent,
    #[serde(default)]
    pub expected_entities: serde_json::Value,
    /// Words the answer should mention, matched case-insensitively.
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    pub category: String,
    pub difficulty: Difficulty,
}

impl TestCase {
    pub fn new(query: &str, expected_intent: Intent, category: &str, difficulty: Difficulty) -> Self {
        Self {
            id: None,
            query: query.to_string(),
            expected_intent,
            expected_entities: serde_json::Value::Null,
            expected_keywords: Vec::new(),
            category: category.to_string(),
            difficulty,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.expected_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Share of expected keywords present in `answer`; None without keywords.
    pub fn keyword_coverage(&self, answer: &str) -> Option<f64> {
        if self.expected_keywords.is_empty() {
            return None;
        }
        let lower = answer.to_lowercase();
        let found = self
            .expected_keywords
            .iter()
            .filter(|k| lower.contains(&k.to_lowercase()))
            .count();
        Some(found as f64 / self.expected_keywords.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_coverage() {
        let case = TestCase::new("nav of hdfc top 100", Intent::NavRequest, "nav", Difficulty::Easy)
            .with_keywords(&["NAV", "842.50"]);
        assert_eq!(case.keyword_coverage("The nav is ₹842.50"), Some(1.0));
        assert_eq!(case.keyword_coverage("No data"), Some(0.0));
    }
}
