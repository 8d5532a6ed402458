use anyhow::{anyhow, Result};
use query::GenerationOracle;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Context beyond this many characters is cut before it reaches the judge.
const MAX_CONTEXT_CHARS: usize = 1000;

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)(?:\s*/\s*(\d+(?:\.\d+)?))?").expect("valid score regex")
});

/// Scale descriptions such as "0 to 1" or "0.0-1.0"; their bounds are not scores.
static SCALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b0(?:\.0+)?\s*(?:to|-|–)\s*1(?:\.0+)?\b").expect("valid scale regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rubric {
    Relevance,
    Faithfulness,
    ContextualRelevance,
    Hallucination,
}

impl Rubric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rubric::Relevance => "relevance",
            Rubric::Faithfulness => "faithfulness",
            Rubric::ContextualRelevance => "contextual_relevance",
            Rubric::Hallucination => "hallucination",
        }
    }

    /// Self-contained prompt for one score. Each rubric sees only what it
    /// grades.
    pub fn prompt(&self, query: &str, response: &str, context: &[String]) -> String {
        let context = context_block(context);
        match self {
            Rubric::Relevance => format!(
                r#"Evaluate how relevant the response is to the query. Rate on a scale of 0.0 to 1.0.

QUERY: {query}

RESPONSE: {response}

EVALUATION CRITERIA:
- 1.0 = Directly answers the question with complete information
- 0.8-0.9 = Answers the question well with good detail
- 0.6-0.7 = Answers the question but could be more complete
- 0.4-0.5 = Partially answers, missing some key points
- 0.0-0.3 = Does not address the question or is off-topic

YOUR SCORE (respond with ONLY a decimal number like 0.85 or 1.0):"#
            ),
            Rubric::Faithfulness => format!(
                r#"Evaluate if the response is faithful to (grounded in) the provided context. Rate on a scale of 0.0 to 1.0.

CONTEXT: {context}

RESPONSE: {response}

EVALUATION CRITERIA:
- 1.0 = Every fact and number in the response comes from the context
- 0.8-0.9 = Well grounded, minor reasonable inferences
- 0.6-0.7 = Mostly grounded with some unsupported details
- 0.4-0.5 = Mix of grounded and ungrounded information
- 0.0-0.3 = Many claims not supported by the context

YOUR SCORE (respond with ONLY a decimal number like 0.95 or 1.0):"#
            ),
            Rubric::ContextualRelevance => format!(
                r#"Evaluate if the provided context contains relevant information to answer the query. Rate on a scale of 0.0 to 1.0.

QUERY: {query}

CONTEXT: {context}

EVALUATION CRITERIA:
- 1.0 = Context has all information needed to answer the query
- 0.8-0.9 = Context is highly relevant
- 0.6-0.7 = Context is somewhat relevant
- 0.4-0.5 = Context has limited relevance
- 0.0-0.3 = Context is not relevant to the query

YOUR SCORE (respond with ONLY a decimal number like 0.9 or 1.0):"#
            ),
            Rubric::Hallucination => format!(
                r#"Evaluate the hallucination level in the response. Hallucination means making up facts not in the context. Rate on a scale of 0.0 to 1.0.

CONTEXT: {context}

RESPONSE: {response}

EVALUATION CRITERIA:
- 0.0 = No hallucination, all facts are from the context or reasonable general knowledge
- 0.1-0.2 = Minor hallucinations or very reasonable inferences
- 0.3-0.4 = Some unsupported claims
- 0.5-0.7 = Multiple fabricated facts
- 0.8-1.0 = Significant fabrication of data or numbers

YOUR SCORE (respond with ONLY a decimal number like 0.1 or 0.0):"#
            ),
        }
    }
}

fn context_block(context: &[String]) -> String {
    if context.is_empty() {
        return "No context provided".to_string();
    }
    context.join("\n").chars().take(MAX_CONTEXT_CHARS).collect()
}

/// Score in [0, 1] read from a judge reply.
///
/// The first decimal already in range wins, then a bare `0` or `1`. Only
/// when the reply has no in-range number is anything rescaled: `8/10` reads
/// as 0.8, `85` and `85%` as 0.85, larger values clamp to 1.
pub fn parse_score(reply: &str) -> Option<f64> {
    let reply = SCALE_RE.replace_all(reply, " ");
    let candidates: Vec<(&str, f64, Option<f64>)> = SCORE_RE
        .captures_iter(&reply)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str();
            let value = raw.parse::<f64>().ok()?;
            let denominator = caps
                .get(2)
                .and_then(|d| d.as_str().parse::<f64>().ok())
                .filter(|d| *d > 0.0);
            Some((raw, value, denominator))
        })
        .collect();

    let in_range = |value: f64| (0.0..=1.0).contains(&value);
    let plain = || candidates.iter().filter(|(_, _, d)| d.is_none());

    if let Some((_, value, _)) = plain().find(|(raw, v, _)| raw.contains('.') && in_range(*v)) {
        return Some(*value);
    }
    if let Some((_, value, _)) = plain().find(|(_, v, _)| in_range(*v)) {
        return Some(*value);
    }
    if let Some((_, value, Some(d))) = candidates.iter().find(|(_, _, d)| d.is_some()) {
        return Some((value / d).clamp(0.0, 1.0));
    }
    let (_, value, _) = plain().next()?;
    let score = if *value <= 100.0 { value / 100.0 } else { *value };
    Some(score.clamp(0.0, 1.0))
}

/// The generation oracle used as a grader.
#[derive(Clone)]
pub struct Judge {
    oracle: Arc<dyn GenerationOracle>,
    temperature: f32,
}

impl Judge {
    pub fn new(oracle: Arc<dyn GenerationOracle>, temperature: f32) -> Self {
        Self {
            oracle,
            temperature,
        }
    }

    pub fn model_name(&self) -> &str {
        self.oracle.model_name()
    }

    pub async fn score(
        &self,
        rubric: Rubric,
        query: &str,
        response: &str,
        context: &[String],
    ) -> Result<f64> {
        let prompt = rubric.prompt(query, response, context);
        let reply = self
            .oracle
            .generate(&prompt, self.temperature)
            .await
            .map_err(|e| anyhow!("{}: judge call failed: {:#}", rubric.as_str(), e))?;

        match parse_score(&reply) {
            Some(score) => {
                debug!(rubric = rubric.as_str(), score, "Judge score");
                Ok(score)
            }
            None => {
                let preview: String = reply.chars().take(80).collect();
                warn!(rubric = rubric.as_str(), reply = %preview, "Judge reply had no score");
                Err(anyhow!("{}: no score in judge reply", rubric.as_str()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::stubs::StubOracle;

    #[test]
    fn test_parse_score_from_sentence() {
        assert_eq!(parse_score("The score is 0.85 out of 1.0"), Some(0.85));
        assert_eq!(parse_score("1.0"), Some(1.0));
        assert_eq!(parse_score("  0  "), Some(0.0));
    }

    #[test]
    fn test_parse_score_scales() {
        assert_eq!(parse_score("85"), Some(0.85));
        assert_eq!(parse_score("Score: 85%"), Some(0.85));
        assert_eq!(parse_score("8/10"), Some(0.8));
        assert_eq!(parse_score("250"), Some(1.0));
        assert_eq!(parse_score("0.85/1"), Some(0.85));
    }

    #[test]
    fn test_parse_score_skips_numbers_outside_range() {
        assert_eq!(parse_score("Considering all 3 criteria, the score is 0.9"), Some(0.9));
        assert_eq!(parse_score("Rating (scale 0 to 1): 0.85"), Some(0.85));
        assert_eq!(parse_score("Step 2: score = 0.7"), Some(0.7));
        assert_eq!(parse_score("On a 0.0-1.0 scale I give it 1"), Some(1.0));
        assert_eq!(parse_score("Score: 4/5 (0.8)"), Some(0.8));
    }

    #[test]
    fn test_parse_score_without_number() {
        assert_eq!(parse_score("I cannot rate this response."), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_prompt_truncates_context() {
        let context = vec!["x".repeat(5000)];
        let prompt = Rubric::Faithfulness.prompt("q", "r", &context);
        assert!(prompt.len() < 2000);
        assert!(Rubric::Hallucination.prompt("q", "r", &[]).contains("No context provided"));
    }

    #[tokio::test]
    async fn test_judge_uses_configured_temperature() {
        let oracle = Arc::new(StubOracle::fixed("0.9"));
        let judge = Judge::new(oracle.clone(), 0.0);

        let score = judge.score(Rubric::Relevance, "q", "r", &[]).await.unwrap();

        assert_eq!(score, 0.9);
        assert_eq!(oracle.prompts()[0].1, 0.0);
    }

    #[tokio::test]
    async fn test_judge_unparsable_reply_is_error() {
        let judge = Judge::new(Arc::new(StubOracle::fixed("excellent answer")), 0.0);
        let err = judge.score(Rubric::Faithfulness, "q", "r", &[]).await.unwrap_err();
        assert!(err.to_string().starts_with("faithfulness"));
    }
}
