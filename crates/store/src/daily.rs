use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::EvaluationRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentCount {
    pub intent: String,
    pub count: u64,
}

/// Rollup of one calendar day (UTC).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyMetricsRecord {
    pub date: NaiveDate,
    pub total_queries: u64,
    pub avg_relevance_score: Option<f64>,
    pub avg_hallucination_score: Option<f64>,
    pub avg_faithfulness_score: Option<f64>,
    pub avg_contextual_relevance: Option<f64>,
    pub avg_answer_correctness: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub pass_rate: Option<f64>,
    pub error_rate: Option<f64>,
    /// Most frequent first; ties broken by label.
    pub top_intents: Vec<IntentCount>,
}

impl DailyMetricsRecord {
    /// Pure function of the day's records: the same input always gives the
    /// same output, regardless of record order.
    pub fn from_records(date: NaiveDate, records: &[EvaluationRecord]) -> Self {
        let total = records.len() as u64;

        let mut intents: BTreeMap<&str, u64> = BTreeMap::new();
        for record in records {
            *intents.entry(record.intent_predicted.as_str()).or_default() += 1;
        }
        let mut top_intents: Vec<IntentCount> = intents
            .into_iter()
            .map(|(intent, count)| IntentCount {
                intent: intent.to_string(),
                count,
            })
            .collect();
        top_intents.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.intent.cmp(&b.intent)));

        Self {
            date,
            total_queries: total,
            avg_relevance_score: mean(records.iter().map(|r| r.relevance_score)),
            avg_hallucination_score: mean(records.iter().map(|r| r.hallucination_score)),
            avg_faithfulness_score: mean(records.iter().map(|r| r.faithfulness_score)),
            avg_contextual_relevance: mean(records.iter().map(|r| r.contextual_relevance)),
            avg_answer_correctness: mean(records.iter().map(|r| r.answer_correctness())),
            avg_latency_ms: mean(records.iter().map(|r| Some(r.total_latency_ms))),
            pass_rate: rate(records, |r| r.passed_threshold),
            error_rate: rate(records, |r| r.error_occurred),
            top_intents,
        }
    }
}

/// Mean of the present values, rounded to 4 decimals; None when all absent.
fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut values: Vec<f64> = values.flatten().collect();
    if values.is_empty() {
        return None;
    }
    // Fixed summation order keeps the result independent of input order.
    values.sort_by(f64::total_cmp);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some(round4(avg))
}

fn rate(records: &[EvaluationRecord], pred: impl Fn(&EvaluationRecord) -> bool) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let hits = records.iter().filter(|r| pred(r)).count();
    Some(round4(hits as f64 / records.len() as f64))
}

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
