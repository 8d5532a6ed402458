use extract::Intent;
use query::TurnOutcome;
use serde::{Deserialize, Serialize};
use store::EvaluationRecord;
use tracing::{info, warn};

use crate::config::EvalConfig;
use crate::judge::{Judge, Rubric};
use crate::safety::SafetyReport;

/// Who asked, and where in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Assigned up front so callers can hand it out before scoring ends.
    pub evaluation_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub conversation_turn: u32,
    pub expected_intent: Option<Intent>,
}

impl TurnMetadata {
    pub fn new(session_id: &str, conversation_turn: u32) -> Self {
        Self {
            evaluation_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: None,
            user_name: None,
            conversation_turn,
            expected_intent: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityScores {
    pub relevance: Option<f64>,
    pub faithfulness: Option<f64>,
    pub hallucination: Option<f64>,
    pub contextual_relevance: Option<f64>,
    pub errors: Vec<String>,
}

pub struct MetricsEngine {
    judge: Judge,
    config: EvalConfig,
}

impl MetricsEngine {
    pub fn new(judge: Judge, config: EvalConfig) -> Self {
        Self { judge, config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// One judge call per score, issued concurrently. A failed or
    /// unparsable score is left empty and its error kept.
    pub async fn score(&self, query: &str, response: &str, context: &[String]) -> QualityScores {
        let contextual = async {
            if context.is_empty() {
                None
            } else {
                Some(
                    self.judge
                        .score(Rubric::ContextualRelevance, query, response, context)
                        .await,
                )
            }
        };

        let (relevance, faithfulness, hallucination, contextual) = tokio::join!(
            self.judge.score(Rubric::Relevance, query, response, context),
            self.judge.score(Rubric::Faithfulness, query, response, context),
            self.judge.score(Rubric::Hallucination, query, response, context),
            contextual,
        );

        let mut errors = Vec::new();
        QualityScores {
            relevance: keep(relevance, &mut errors),
            faithfulness: keep(faithfulness, &mut errors),
            hallucination: keep(hallucination, &mut errors),
            contextual_relevance: contextual.and_then(|r| keep(r, &mut errors)),
            errors,
        }
    }

    /// Build the full record for a finished turn. Never fails; judge
    /// problems show up as empty scores plus `scoring_failed`.
    pub async fn evaluate(
        &self,
        query: &str,
        outcome: &TurnOutcome,
        total_latency_ms: f64,
        meta: &TurnMetadata,
    ) -> EvaluationRecord {
        let answer = &outcome.answer;
        let scores = self
            .score(query, &answer.text, &outcome.retrieved_context)
            .await;
        let safety = SafetyReport::check(&answer.text);

        let predicted = outcome.intent.intent;
        let intent_confidence = round4(outcome.intent.confidence as f64);
        let scoring_failed = !scores.errors.is_empty();
        if scoring_failed {
            warn!(
                session = %meta.session_id,
                errors = ?scores.errors,
                "Scoring incomplete"
            );
        }

        let record = EvaluationRecord {
            id: meta.evaluation_id.clone(),
            session_id: meta.session_id.clone(),
            timestamp: answer.generated_at,
            user_id: meta.user_id.clone(),
            user_name: meta.user_name.clone(),
            user_prompt: query.to_string(),
            agent_response: answer.text.clone(),
            conversation_turn: meta.conversation_turn,

            intent_predicted: predicted,
            expected_intent: meta.expected_intent,
            intent_confidence,
            intent_match: meta.expected_intent.map(|expected| expected == predicted),
            entities_extracted: serde_json::to_value(&outcome.intent.entities).unwrap_or_default(),

            threshold_used: self.config.confidence_threshold,
            passed_threshold: intent_confidence >= self.config.confidence_threshold,
            fallback_triggered: outcome.fallback_triggered,

            relevance_score: scores.relevance,
            hallucination_score: scores.hallucination,
            faithfulness_score: scores.faithfulness,
            contextual_relevance: scores.contextual_relevance,

            total_latency_ms: round4(total_latency_ms),
            llm_latency_ms: round4(outcome.timings.llm_ms),
            tool_latency_ms: round4(outcome.timings.tool_ms),
            api_latency_ms: round4(outcome.timings.api_ms),

            api_source: answer.source_id.map(|s| s.as_str().to_string()),
            tools_used: outcome.tools_used.iter().map(|t| t.as_str().to_string()).collect(),
            retrieval_path: outcome
                .retrieval_path()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            num_tool_calls: outcome.tool_calls as u32,

            contains_disclaimer: safety.contains_disclaimer,
            risk_detection_flag: safety.risk_detected,
            pii_detected: safety.pii_detected,
            response_length: answer.text.chars().count() as u32,

            llm_model: self.judge.model_name().to_string(),
            agent_version: self.config.agent_version.clone(),
            toolchain_version: self.config.toolchain_version.clone(),
            environment: self.config.environment.clone(),

            error_occurred: outcome.error.is_some(),
            error_message: outcome.error.clone(),
            retry_count: outcome.retry_count as u32,
            scoring_failed,
            scoring_errors: scores.errors,
            turn_state: outcome.state().as_str().to_string(),
        };

        info!(
            id = %record.id,
            intent = %predicted,
            relevance = ?record.relevance_score,
            faithfulness = ?record.faithfulness_score,
            passed = record.passed_threshold,
            "Evaluated turn"
        );
        record
    }
}

fn keep(result: anyhow::Result<f64>, errors: &mut Vec<String>) -> Option<f64> {
    match result {
        Ok(score) => Some(score),
        Err(e) => {
            errors.push(format!("{:#}", e));
            None
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::stubs::StubOracle;
    use std::sync::Arc;

    fn engine(oracle: StubOracle) -> (Arc<StubOracle>, MetricsEngine) {
        let oracle = Arc::new(oracle);
        let engine = MetricsEngine::new(Judge::new(oracle.clone(), 0.0), EvalConfig::default());
        (oracle, engine)
    }

    #[tokio::test]
    async fn test_four_independent_judge_calls() {
        let (oracle, engine) = engine(StubOracle::fixed("0.8"));
        let context = vec!["HDFC Top 100 Fund: NAV ₹842.50".to_string()];

        let scores = engine.score("nav?", "₹842.50", &context).await;

        assert_eq!(oracle.calls(), 4);
        assert_eq!(scores.relevance, Some(0.8));
        assert_eq!(scores.contextual_relevance, Some(0.8));
        assert!(scores.errors.is_empty());
        assert!(oracle.prompts().iter().all(|(_, t)| *t == 0.0));
    }

    #[tokio::test]
    async fn test_no_context_skips_contextual_relevance() {
        let (oracle, engine) = engine(StubOracle::fixed("0.5"));
        let scores = engine.score("hello", "Hi there!", &[]).await;

        assert_eq!(oracle.calls(), 3);
        assert_eq!(scores.contextual_relevance, None);
        assert!(scores.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_score_is_null_and_flagged() {
        let (_, engine) = engine(StubOracle::from_fn(|prompt| {
            if prompt.starts_with("Evaluate if") {
                Ok("looks grounded to me".to_string())
            } else {
                Ok("0.7".to_string())
            }
        }));

        let scores = engine.score("q", "r", &["ctx".to_string()]).await;

        assert_eq!(scores.faithfulness, None);
        assert_eq!(scores.relevance, Some(0.7));
        assert_eq!(scores.hallucination, Some(0.7));
        assert_eq!(scores.errors.len(), 2);
        assert_eq!(scores.contextual_relevance, None);
        assert!(scores.errors.iter().any(|e| e.starts_with("faithfulness")));
    }
}
