use chrono::{DateTime, NaiveDate, Utc};
use extract::Intent;
use serde::{Deserialize, Serialize};

/// Weight of relevance in the derived correctness score; faithfulness
/// gets the remainder.
pub const RELEVANCE_WEIGHT: f64 = 0.7;

/// `0.7 * relevance + 0.3 * faithfulness`, rounded to 4 decimals so that
/// float noise never leaks into stored or compared values.
pub fn answer_correctness(relevance: Option<f64>, faithfulness: Option<f64>) -> Option<f64> {
    let score = relevance? * RELEVANCE_WEIGHT + faithfulness? * (1.0 - RELEVANCE_WEIGHT);
    Some((score * 10_000.0).round() / 10_000.0)
}

/// One evaluated interaction. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    // Interaction identity
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_prompt: String,
    pub agent_response: String,
    pub conversation_turn: u32,

    // Intent classification
    pub intent_predicted: Intent,
    pub expected_intent: Option<Intent>,
    pub intent_confidence: f64,
    pub intent_match: Option<bool>,
    pub entities_extracted: serde_json::Value,

    // Threshold
    pub threshold_used: f64,
    pub passed_threshold: bool,
    pub fallback_triggered: bool,

    // Quality scores; None when the judge gave no usable number
    pub relevance_score: Option<f64>,
    pub hallucination_score: Option<f64>,
    pub faithfulness_score: Option<f64>,
    pub contextual_relevance: Option<f64>,

    // Latency buckets
    pub total_latency_ms: f64,
    pub llm_latency_ms: f64,
    pub tool_latency_ms: f64,
    pub api_latency_ms: f64,

    // Sources and tools
    pub api_source: Option<String>,
    pub tools_used: Vec<String>,
    pub retrieval_path: Vec<String>,
    pub num_tool_calls: u32,

    // Safety
    pub contains_disclaimer: bool,
    pub risk_detection_flag: bool,
    pub pii_detected: bool,
    pub response_length: u32,

    // System
    pub llm_model: String,
    pub agent_version: String,
    pub toolchain_version: String,
    pub environment: String,

    // Errors
    pub error_occurred: bool,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub scoring_failed: bool,
    pub scoring_errors: Vec<String>,
    pub turn_state: String,
}

impl EvaluationRecord {
    pub fn answer_correctness(&self) -> Option<f64> {
        answer_correctness(self.relevance_score, self.faithfulness_score)
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// API view: the record plus its derived score.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationView {
    #[serde(flatten)]
    pub record: EvaluationRecord,
    pub answer_correctness: Option<f64>,
}

impl From<EvaluationRecord> for EvaluationView {
    fn from(record: EvaluationRecord) -> Self {
        let answer_correctness = record.answer_correctness();
        Self {
            record,
            answer_correctness,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationFilter {
    pub session_id: Option<String>,
    pub intent: Option<Intent>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub passed_threshold: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_correctness_weights() {
        assert_eq!(answer_correctness(Some(0.90), Some(1.00)), Some(0.93));
        assert_eq!(answer_correctness(Some(1.0), Some(0.0)), Some(0.7));
        assert_eq!(answer_correctness(None, Some(1.0)), None);
        assert_eq!(answer_correctness(Some(0.5), None), None);
    }
}
