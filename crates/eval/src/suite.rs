use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::EvaluatedAgent;
use store::TestCase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub test_id: Option<i64>,
    pub query: String,
    pub category: String,
    pub difficulty: String,
    pub expected_intent: String,
    pub predicted_intent: String,
    pub intent_match: bool,
    pub confidence: f64,
    pub passed_threshold: bool,
    pub relevance: Option<f64>,
    pub faithfulness: Option<f64>,
    pub hallucination: Option<f64>,
    pub answer_correctness: Option<f64>,
    pub keyword_coverage: Option<f64>,
    pub latency_ms: f64,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub count: usize,
    pub intent_accuracy: f64,
    pub avg_relevance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total_cases: usize,
    pub intent_accuracy: f64,
    pub pass_rate: f64,
    pub avg_relevance: Option<f64>,
    pub avg_faithfulness: Option<f64>,
    pub avg_hallucination: Option<f64>,
    pub avg_answer_correctness: Option<f64>,
    pub avg_keyword_coverage: Option<f64>,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub by_category: Vec<CategoryScore>,
    pub cases: Vec<CaseResult>,
}

/// Runs operator test cases through the evaluated agent, one fresh session
/// per case, waiting for each evaluation before moving on.
pub struct EvaluationSuite {
    agent: Arc<EvaluatedAgent>,
}

impl EvaluationSuite {
    pub fn new(agent: Arc<EvaluatedAgent>) -> Self {
        Self { agent }
    }

    pub async fn run(&self, cases: &[TestCase]) -> Result<SuiteReport> {
        anyhow::ensure!(!cases.is_empty(), "no test cases to run");
        info!(cases = cases.len(), "Running evaluation suite");

        let mut results = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            info!(case = i + 1, query = %case.query, category = %case.category, "Test case");
            if let Some(result) = self.run_case(case).await {
                results.push(result);
            }
        }

        Ok(summarize(results))
    }

    async fn run_case(&self, case: &TestCase) -> Option<CaseResult> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let turn = self
            .agent
            .process_with_evaluation(&case.query, Some(&session_id), None, Some(case.expected_intent))
            .await;
        let keyword_coverage = case.keyword_coverage(&turn.reply.answer.text);

        let Some(stored) = turn.evaluation.wait().await else {
            warn!(query = %case.query, "Evaluation did not finish, skipping case");
            return None;
        };
        let record = stored.record;

        Some(CaseResult {
            test_id: case.id,
            query: case.query.clone(),
            category: case.category.clone(),
            difficulty: case.difficulty.as_str().to_string(),
            expected_intent: case.expected_intent.as_str().to_string(),
            predicted_intent: record.intent_predicted.as_str().to_string(),
            intent_match: record.intent_match.unwrap_or(false),
            confidence: record.intent_confidence,
            passed_threshold: record.passed_threshold,
            relevance: record.relevance_score,
            faithfulness: record.faithfulness_score,
            hallucination: record.hallucination_score,
            answer_correctness: record.answer_correctness(),
            keyword_coverage,
            latency_ms: record.total_latency_ms,
            persisted: stored.persisted,
        })
    }
}

fn summarize(cases: Vec<CaseResult>) -> SuiteReport {
    let mut latencies: Vec<f64> = cases.iter().map(|c| c.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);

    let mut by_category: BTreeMap<&str, Vec<&CaseResult>> = BTreeMap::new();
    for case in &cases {
        by_category.entry(case.category.as_str()).or_default().push(case);
    }
    let by_category = by_category
        .into_iter()
        .map(|(category, group)| CategoryScore {
            category: category.to_string(),
            count: group.len(),
            intent_accuracy: share(&group, |c| c.intent_match),
            avg_relevance: mean_of(group.iter().map(|c| c.relevance)),
        })
        .collect();

    let all: Vec<&CaseResult> = cases.iter().collect();
    SuiteReport {
        total_cases: cases.len(),
        intent_accuracy: share(&all, |c| c.intent_match),
        pass_rate: share(&all, |c| c.passed_threshold),
        avg_relevance: mean_of(cases.iter().map(|c| c.relevance)),
        avg_faithfulness: mean_of(cases.iter().map(|c| c.faithfulness)),
        avg_hallucination: mean_of(cases.iter().map(|c| c.hallucination)),
        avg_answer_correctness: mean_of(cases.iter().map(|c| c.answer_correctness)),
        avg_keyword_coverage: mean_of(cases.iter().map(|c| c.keyword_coverage)),
        avg_latency_ms: if latencies.is_empty() { 0.0 } else { statistical::mean(&latencies) },
        p50_latency_ms: percentile(&latencies, 50),
        p95_latency_ms: percentile(&latencies, 95),
        by_category,
        cases,
    }
}

fn share(cases: &[&CaseResult], pred: impl Fn(&CaseResult) -> bool) -> f64 {
    if cases.is_empty() {
        return 0.0;
    }
    cases.iter().filter(|c| pred(c)).count() as f64 / cases.len() as f64
}

fn mean_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let values: Vec<f64> = values.flatten().collect();
    if values.is_empty() {
        None
    } else {
        Some((statistical::mean(&values) * 10_000.0).round() / 10_000.0)
    }
}

fn percentile(sorted_data: &[f64], p: usize) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let index = (p as f64 / 100.0 * sorted_data.len() as f64) as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalConfig;
    use crate::engine::MetricsEngine;
    use crate::judge::Judge;
    use extract::Intent;
    use query::stubs::{StubFundDatabase, StubOracle, StubSchemeRegistry, StubWebSearch};
    use query::{
        FundRecord, Orchestrator, OrchestratorSettings, ResolverChain, RetryPolicy, SourceConfig,
        SourceError,
    };
    use store::{Difficulty, EvaluationStore};

    fn suite() -> EvaluationSuite {
        let oracle = Arc::new(StubOracle::from_fn(|prompt| {
            if prompt.starts_with("Evaluate") {
                Ok("0.8".to_string())
            } else {
                Ok("The NAV of HDFC Top 100 Fund is ₹842.50.".to_string())
            }
        }));
        let fund = FundRecord {
            nav: Some(842.50),
            ..FundRecord::named("HDFC Top 100 Fund")
        };
        let resolver = ResolverChain::standard(
            Arc::new(StubFundDatabase::with(vec![fund])),
            Arc::new(StubSchemeRegistry::failing(SourceError::Status(404))),
            Arc::new(StubWebSearch::failing(SourceError::Unavailable("offline".into()))),
            oracle.clone(),
            &SourceConfig::default(),
            0.3,
            RetryPolicy::none(),
        );
        let orchestrator = Orchestrator::new(resolver, oracle.clone(), OrchestratorSettings::default());
        let engine = MetricsEngine::new(Judge::new(oracle, 0.0), EvalConfig::default());
        let store = EvaluationStore::open_in_memory().unwrap();
        let agent = EvaluatedAgent::new(Arc::new(orchestrator), Arc::new(engine), Arc::new(store));
        EvaluationSuite::new(Arc::new(agent))
    }

    #[tokio::test]
    async fn test_suite_reports_accuracy_and_categories() {
        let cases = vec![
            TestCase::new("What is the NAV of HDFC Top 100 Fund?", Intent::NavRequest, "nav", Difficulty::Easy)
                .with_keywords(&["842.50"]),
            TestCase::new("Hello", Intent::Greeting, "conversation", Difficulty::Easy),
            // Deliberately mislabelled.
            TestCase::new("Hello there", Intent::KycQuery, "conversation", Difficulty::Easy),
        ];

        let report = suite().run(&cases).await.unwrap();

        assert_eq!(report.total_cases, 3);
        assert!((report.intent_accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.avg_relevance, Some(0.8));
        assert_eq!(report.avg_keyword_coverage, Some(1.0));
        assert_eq!(report.by_category.len(), 2);
        assert_eq!(report.by_category[0].category, "conversation");
        assert_eq!(report.by_category[0].intent_accuracy, 0.5);
        assert!(report.cases.iter().all(|c| c.persisted));
    }

    #[tokio::test]
    async fn test_empty_suite_is_an_error() {
        assert!(suite().run(&[]).await.is_err());
    }

    #[test]
    fn test_percentile_bounds() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 50), 30.0);
        assert_eq!(percentile(&sorted, 95), 40.0);
        assert_eq!(percentile(&[], 95), 0.0);
    }
}
