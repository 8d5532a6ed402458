use chrono::{DateTime, Utc};
use extract::{Entities, Extractor, Intent, IntentResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::llm::GenerationOracle;
use crate::prompt::{build_answer_prompt, build_conversation_prompt};
use crate::resolver::{Resolution, ResolverChain};
use crate::sources::{ResolveRequest, SourceId, SourcePayload, SourceResult, Target};
use crate::tools::ToolKind;

pub const DISCLAIMER: &str = "Mutual fund investments are subject to market risks. Please read all \
scheme related documents carefully. Past performance is not indicative of future returns. This is \
not financial advice; consult with a professional advisor before investing.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_name: None,
        }
    }

    pub fn from_user(text: impl Into<String>, user_name: Option<String>) -> Self {
        Self {
            text: text.into(),
            user_name,
        }
    }
}

/// A question the turn ended on, with what is needed to resume it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clarification {
    /// Numbered options shown to the user; empty when a name is missing.
    pub candidates: Vec<String>,
    pub pending: IntentResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecord {
    pub text: String,
    pub source_id: Option<SourceId>,
    pub confidence: f32,
    pub disclaimer: bool,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
}

/// One user message and the answer it got. Session history is a flat list
/// of these, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub query: String,
    pub answer: AnswerRecord,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Received,
    Classified,
    Ambiguous,
    AwaitingClarification,
    Resolving,
    Synthesizing,
    Answered,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Received => "RECEIVED",
            TurnState::Classified => "CLASSIFIED",
            TurnState::Ambiguous => "AMBIGUOUS",
            TurnState::AwaitingClarification => "AWAITING_CLARIFICATION",
            TurnState::Resolving => "RESOLVING",
            TurnState::Synthesizing => "SYNTHESIZING",
            TurnState::Answered => "ANSWERED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StageTimings {
    pub llm_ms: f64,
    pub tool_ms: f64,
    pub api_ms: f64,
}

/// Everything that happened in one turn; the answer plus its trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub answer: AnswerRecord,
    pub intent: IntentResult,
    pub states: Vec<TurnState>,
    pub tools_used: Vec<ToolKind>,
    /// Resolver invocations made by the tools.
    pub tool_calls: usize,
    pub attempts: Vec<SourceResult>,
    pub retrieved_context: Vec<String>,
    pub timings: StageTimings,
    pub retry_count: usize,
    pub error: Option<String>,
    pub fallback_triggered: bool,
}

impl TurnOutcome {
    fn start(intent: IntentResult) -> Self {
        Self {
            answer: AnswerRecord {
                text: String::new(),
                source_id: None,
                confidence: 0.0,
                disclaimer: false,
                generated_at: Utc::now(),
                clarification: None,
            },
            intent,
            states: vec![TurnState::Received, TurnState::Classified],
            tools_used: Vec::new(),
            tool_calls: 0,
            attempts: Vec::new(),
            retrieved_context: Vec::new(),
            timings: StageTimings::default(),
            retry_count: 0,
            error: None,
            fallback_triggered: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.states.last().copied().unwrap_or(TurnState::Received)
    }

    /// Source ids in the order they were tried.
    pub fn retrieval_path(&self) -> Vec<SourceId> {
        self.attempts.iter().map(|a| a.source_id).collect()
    }

    fn enter(&mut self, state: TurnState) {
        debug!(from = self.state().as_str(), to = state.as_str(), "Turn state");
        self.states.push(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub synthesis_temperature: f32,
    pub max_candidates: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            synthesis_temperature: 0.3,
            max_candidates: 5,
        }
    }
}

pub struct Orchestrator {
    extractor: Extractor,
    resolver: ResolverChain,
    oracle: Arc<dyn GenerationOracle>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        resolver: ResolverChain,
        oracle: Arc<dyn GenerationOracle>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            extractor: Extractor::default(),
            resolver,
            oracle,
            settings,
        }
    }

    pub fn oracle(&self) -> &Arc<dyn GenerationOracle> {
        &self.oracle
    }

    pub fn classify(&self, text: &str) -> IntentResult {
        self.extractor.classify(text)
    }

    pub async fn handle(&self, query: &Query, history: &[Exchange]) -> AnswerRecord {
        self.handle_traced(query, history).await.answer
    }

    /// Run one turn. Never fails: the answer is either a grounded reply,
    /// a clarifying question, or an explicit "could not retrieve" message.
    pub async fn handle_traced(&self, query: &Query, history: &[Exchange]) -> TurnOutcome {
        let fresh = self.extractor.classify(&query.text);
        let intent = match resume_clarification(&query.text, &fresh, history) {
            Some(resumed) => {
                debug!(intent = %resumed.intent, "Resuming clarified turn");
                resumed
            }
            None => fresh,
        };
        let mut turn = TurnOutcome::start(intent);

        let tool = ToolKind::for_intent(&turn.intent);
        turn.tools_used.push(tool);

        if let Some(question) = missing_slot_question(tool, &turn.intent) {
            self.clarify(&mut turn, question, Vec::new(), None);
            return turn;
        }

        if tool == ToolKind::Conversation {
            self.converse(&mut turn, query).await;
            return turn;
        }

        turn.enter(TurnState::Resolving);
        let tool_start = Instant::now();
        let mut resolutions = Vec::new();
        for target in tool.targets(&turn.intent) {
            let request = ResolveRequest {
                intent: turn.intent.intent,
                query: query.text.clone(),
                target,
            };
            resolutions.push(self.resolver.resolve(&request).await);
        }
        turn.timings.tool_ms = elapsed_ms(tool_start);
        self.record_resolutions(&mut turn, &resolutions);

        let mut hits: Vec<SourceResult> = resolutions.iter().filter_map(|r| r.hit().cloned()).collect();

        if hits.is_empty() {
            self.unavailable(&mut turn, query, &resolutions);
            return turn;
        }

        if tool.requires_fund() {
            let requested = turn.intent.entities.fund_name.clone().unwrap_or_default();
            let candidates = hits[0]
                .payload
                .as_ref()
                .map(SourcePayload::candidate_names)
                .unwrap_or_default();

            if candidates.len() > 1 {
                match candidates.iter().position(|c| c.eq_ignore_ascii_case(&requested)) {
                    Some(index) => narrow_to(&mut hits[0], &candidates[index]),
                    None => {
                        turn.enter(TurnState::Ambiguous);
                        let shown: Vec<String> =
                            candidates.into_iter().take(self.settings.max_candidates).collect();
                        let question = format!(
                            "I found several funds matching \"{}\". Which one do you mean?\n{}\nReply with the fund name or its number.",
                            requested,
                            numbered(&shown)
                        );
                        self.clarify(&mut turn, question, shown, Some(hits[0].source_id));
                        return turn;
                    }
                }
            }
        }

        turn.enter(TurnState::Synthesizing);
        self.synthesize(&mut turn, query, tool, &hits, &resolutions).await;
        turn
    }

    fn record_resolutions(&self, turn: &mut TurnOutcome, resolutions: &[Resolution]) {
        turn.tool_calls = resolutions.len();
        for resolution in resolutions {
            turn.timings.api_ms += resolution.api_ms();
            turn.timings.llm_ms += resolution.oracle_ms();
            turn.retry_count += resolution.retries();
            turn.attempts.extend(resolution.attempts.iter().cloned());
        }
    }

    fn clarify(
        &self,
        turn: &mut TurnOutcome,
        question: String,
        candidates: Vec<String>,
        source_id: Option<SourceId>,
    ) {
        turn.enter(TurnState::AwaitingClarification);
        info!(
            intent = %turn.intent.intent,
            candidates = candidates.len(),
            "Asking for clarification"
        );
        turn.answer = AnswerRecord {
            text: question,
            source_id,
            confidence: turn.intent.confidence,
            disclaimer: false,
            generated_at: Utc::now(),
            clarification: Some(Clarification {
                candidates,
                pending: turn.intent.clone(),
            }),
        };
    }

    async fn converse(&self, turn: &mut TurnOutcome, query: &Query) {
        turn.enter(TurnState::Synthesizing);
        let prompt = build_conversation_prompt(&query.text, query.user_name.as_deref());

        let start = Instant::now();
        let reply = self
            .oracle
            .generate(&prompt, self.settings.synthesis_temperature)
            .await;
        turn.timings.llm_ms += elapsed_ms(start);

        let text = match reply {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => canned_reply(turn.intent.intent, query.user_name.as_deref()),
            Err(e) => {
                warn!(error = %e, "Conversation reply failed, using canned text");
                turn.error = Some(format!("{:#}", e));
                turn.fallback_triggered = true;
                canned_reply(turn.intent.intent, query.user_name.as_deref())
            }
        };

        let confidence = turn.intent.confidence;
        self.finish(turn, text, None, confidence, false);
    }

    fn unavailable(&self, turn: &mut TurnOutcome, query: &Query, resolutions: &[Resolution]) {
        let mut tried = Vec::new();
        let mut errors = Vec::new();
        for resolution in resolutions {
            for attempt in &resolution.attempts {
                tried.push(format!(
                    "- {}: {}",
                    attempt.source_id.label(),
                    attempt.error.as_deref().unwrap_or("no result")
                ));
            }
            if let Some(error) = resolution.outcome().error {
                errors.push(error);
            }
        }

        warn!(intent = %turn.intent.intent, "No source could answer");
        turn.error = Some(errors.join(" | "));
        turn.fallback_triggered = true;

        let text = format!(
            "I could not retrieve data for \"{}\" right now. Sources tried:\n{}\nPlease try again later or check the fund house website directly.",
            query.text.trim(),
            tried.join("\n")
        );
        self.finish(turn, text, None, 0.0, false);
    }

    async fn synthesize(
        &self,
        turn: &mut TurnOutcome,
        query: &Query,
        tool: ToolKind,
        hits: &[SourceResult],
        resolutions: &[Resolution],
    ) {
        let source_id = hits[0].source_id;
        let confidence = hits.iter().map(|h| h.confidence).fold(1.0_f32, f32::min);
        let payloads: Vec<&SourcePayload> = hits.iter().filter_map(|h| h.payload.as_ref()).collect();

        for payload in &payloads {
            turn.retrieved_context.extend(payload.context_lines());
        }

        // Targets the comparison could not find anything for.
        let missing: Vec<String> = tool
            .targets(&turn.intent)
            .into_iter()
            .zip(resolutions)
            .filter(|(_, r)| r.hit().is_none())
            .filter_map(|(target, _)| match target {
                Target::Fund { name, .. } => name,
                _ => None,
            })
            .collect();

        let narrative = match payloads.as_slice() {
            // The oracle step already produced the text.
            [SourcePayload::Synthesis(text)] => Some(text.clone()),
            _ => {
                let prompt = build_answer_prompt(
                    &query.text,
                    query.user_name.as_deref(),
                    source_id.label(),
                    &turn.retrieved_context,
                );
                let start = Instant::now();
                let reply = self
                    .oracle
                    .generate(&prompt, self.settings.synthesis_temperature)
                    .await;
                turn.timings.llm_ms += elapsed_ms(start);

                match reply {
                    Ok(text) if !text.trim().is_empty() => Some(text),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Synthesis failed, answering with retrieved facts only");
                        turn.error = Some(format!("{:#}", e));
                        turn.fallback_triggered = true;
                        None
                    }
                }
            }
        };

        let mut sections = Vec::new();
        match narrative {
            Some(text) => sections.push(text.trim().to_string()),
            None => sections.push(format!("Here is what I found in the {}:", source_id.label())),
        }

        let facts = facts_block(&payloads, source_id);
        if !facts.is_empty() {
            sections.push(facts);
        }
        if !missing.is_empty() {
            sections.push(format!("No data found for: {}.", missing.join(", ")));
        }

        let disclaimer = needs_disclaimer(turn.intent.intent);
        if disclaimer {
            sections.push(DISCLAIMER.to_string());
        }

        self.finish(turn, sections.join("\n\n"), Some(source_id), confidence, disclaimer);
    }

    fn finish(
        &self,
        turn: &mut TurnOutcome,
        text: String,
        source_id: Option<SourceId>,
        confidence: f32,
        disclaimer: bool,
    ) {
        turn.enter(TurnState::Answered);
        turn.answer = AnswerRecord {
            text,
            source_id,
            confidence,
            disclaimer,
            generated_at: Utc::now(),
            clarification: None,
        };
        info!(
            intent = %turn.intent.intent,
            tools = ?turn.tools_used,
            source = source_id.map_or("none", |s| s.as_str()),
            attempts = turn.attempts.len(),
            "Turn answered"
        );
    }
}

/// Picks up the pending intent when the previous answer was a clarifying
/// question and this message supplies what was missing. A message that
/// asks something else is classified on its own.
fn resume_clarification(
    text: &str,
    fresh: &IntentResult,
    history: &[Exchange],
) -> Option<IntentResult> {
    let clarification = history.last()?.answer.clarification.as_ref()?;
    let mut pending = clarification.pending.clone();

    let answers_pending = fresh.intent == pending.intent
        || fresh.intent == Intent::GeneralInfo
        || is_bare_reference(text, &fresh.entities);
    if !answers_pending {
        return None;
    }

    if !clarification.candidates.is_empty() {
        let chosen = pick_candidate(text, &clarification.candidates)?;
        pending.entities.fund_name = Some(chosen);
        pending.entities.isin = None;
        return Some(pending);
    }

    let fresh = fresh.entities.clone();
    if pending.intent == Intent::CompareFunds {
        let mut names = pending.entities.compare_with.clone();
        if names.is_empty() {
            names.extend(pending.entities.fund_name.clone());
        }
        let new_names = if fresh.compare_with.is_empty() {
            fresh.fund_name.into_iter().collect()
        } else {
            fresh.compare_with
        };
        for name in new_names {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        if names.len() < 2 {
            return None;
        }
        pending.entities.fund_name = names.first().cloned();
        pending.entities.compare_with = names;
        return Some(pending);
    }

    if !fresh.has_fund_reference() {
        return None;
    }
    pending.entities.fund_name = fresh.fund_name;
    pending.entities.isin = fresh.isin;
    Some(pending)
}

/// A number, or fund names with only filler words around them:
/// "2", "Axis Midcap Fund", "the SBI Bluechip Fund please".
fn is_bare_reference(text: &str, entities: &Entities) -> bool {
    const FILLER: &[&str] = &[
        "the", "a", "please", "it", "its", "is", "one", "i", "mean", "and", "with", "also",
        "ok", "okay", "yes", "that",
    ];
    if text.trim().trim_end_matches('.').parse::<usize>().is_ok() {
        return true;
    }
    if !entities.has_fund_reference() {
        return false;
    }

    let mut rest = text.to_lowercase();
    let names = entities
        .fund_name
        .iter()
        .chain(entities.isin.iter())
        .chain(entities.compare_with.iter());
    for name in names {
        rest = rest.replace(&name.to_lowercase(), " ");
    }
    rest.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| FILLER.contains(&w))
}

/// A 1-based number, or a candidate named in the reply.
fn pick_candidate(text: &str, candidates: &[String]) -> Option<String> {
    let reply = text.trim().trim_end_matches('.');
    if let Ok(n) = reply.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| candidates.get(i)).cloned();
    }

    let lower = reply.to_lowercase();
    candidates
        .iter()
        .find(|c| lower.contains(&c.to_lowercase()))
        .or_else(|| {
            let matching: Vec<&String> = candidates
                .iter()
                .filter(|c| lower.len() >= 3 && c.to_lowercase().contains(&lower))
                .collect();
            match matching.as_slice() {
                [only] => Some(*only),
                _ => None,
            }
        })
        .cloned()
}

fn missing_slot_question(tool: ToolKind, intent: &IntentResult) -> Option<String> {
    let entities = &intent.entities;
    match tool {
        _ if tool.requires_fund() && !entities.has_fund_reference() => Some(
            "Which fund would you like me to look up? Please share the fund name or its ISIN."
                .to_string(),
        ),
        ToolKind::CompareFunds if entities.compare_with.len() < 2 => Some(
            "Which funds would you like to compare? Please name at least two funds.".to_string(),
        ),
        _ => None,
    }
}

/// Keep only the exactly-named fund when the user was specific.
fn narrow_to(hit: &mut SourceResult, name: &str) {
    match &mut hit.payload {
        Some(SourcePayload::Funds(funds)) => funds.retain(|f| f.scheme_name.eq_ignore_ascii_case(name)),
        Some(SourcePayload::Schemes(schemes)) => {
            schemes.retain(|s| s.scheme_name.eq_ignore_ascii_case(name))
        }
        _ => {}
    }
}

fn facts_block(payloads: &[&SourcePayload], source_id: SourceId) -> String {
    let mut lines = Vec::new();
    let mut links = Vec::new();

    for payload in payloads {
        match payload {
            SourcePayload::Funds(_) | SourcePayload::Schemes(_) => {
                lines.extend(payload.context_lines().into_iter().map(|l| format!("- {}", l)));
            }
            SourcePayload::Snippets(snippets) => {
                links.extend(snippets.iter().map(|s| format!("- {} ({})", s.title, s.url)));
            }
            SourcePayload::Synthesis(_) => {}
        }
    }

    let mut block = Vec::new();
    if !lines.is_empty() {
        block.push(format!("Key figures ({}):\n{}", source_id.label(), lines.join("\n")));
    }
    if !links.is_empty() {
        block.push(format!("Sources:\n{}", links.join("\n")));
    }
    block.join("\n\n")
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn needs_disclaimer(intent: Intent) -> bool {
    !matches!(
        intent,
        Intent::Greeting | Intent::Smalltalk | Intent::KycQuery | Intent::AccountIssue
    )
}

fn canned_reply(intent: Intent, user_name: Option<&str>) -> String {
    let name = user_name.map(|n| format!(" {}", n)).unwrap_or_default();
    match intent {
        Intent::Smalltalk => format!(
            "Happy to help{}! Ask me about fund NAVs, returns, comparisons, KYC or redemptions.",
            name
        ),
        _ => format!(
            "Hello{}! I can help with mutual fund NAVs, performance, comparisons, KYC and redemption questions.",
            name
        ),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::retry::RetryPolicy;
    use crate::sources::{FundRecord, SourceConfig};
    use crate::stubs::{StubFundDatabase, StubOracle, StubSchemeRegistry, StubWebSearch};

    struct Harness {
        db: Arc<StubFundDatabase>,
        oracle: Arc<StubOracle>,
        orchestrator: Orchestrator,
    }

    fn harness(db: StubFundDatabase, oracle: StubOracle) -> Harness {
        let db = Arc::new(db);
        let oracle = Arc::new(oracle);
        let resolver = ResolverChain::standard(
            db.clone(),
            Arc::new(StubSchemeRegistry::failing(SourceError::Status(404))),
            Arc::new(StubWebSearch::failing(SourceError::Unavailable("offline".into()))),
            oracle.clone(),
            &SourceConfig::default(),
            0.3,
            RetryPolicy::none(),
        );
        let orchestrator = Orchestrator::new(resolver, oracle.clone(), OrchestratorSettings::default());
        Harness { db, oracle, orchestrator }
    }

    fn hdfc_top_100() -> FundRecord {
        FundRecord {
            nav: Some(842.50),
            nav_date: Some("2025-12-09".to_string()),
            ..FundRecord::named("HDFC Top 100 Fund")
        }
    }

    fn axis_funds() -> Vec<FundRecord> {
        ["Axis Bluechip Fund", "Axis Midcap Fund", "Axis Small Cap Fund"]
            .into_iter()
            .map(FundRecord::named)
            .collect()
    }

    #[tokio::test]
    async fn test_nav_answer_cites_primary_figures() {
        let h = harness(
            StubFundDatabase::with(vec![hdfc_top_100()]),
            StubOracle::fixed("The latest NAV of HDFC Top 100 Fund is ₹842.50."),
        );

        let outcome = h
            .orchestrator
            .handle_traced(&Query::new("What is the current NAV of HDFC Top 100 Fund?"), &[])
            .await;

        assert_eq!(outcome.state(), TurnState::Answered);
        assert_eq!(
            outcome.states,
            vec![
                TurnState::Received,
                TurnState::Classified,
                TurnState::Resolving,
                TurnState::Synthesizing,
                TurnState::Answered,
            ]
        );
        assert!(outcome.answer.text.contains("842.50"));
        assert_eq!(outcome.answer.source_id, Some(SourceId::PrimaryApi));
        assert!(outcome.answer.disclaimer);
        assert!(outcome.answer.text.contains(DISCLAIMER));
        assert_eq!(outcome.tools_used, vec![ToolKind::NavLookup]);
        assert_eq!(outcome.retrieval_path(), vec![SourceId::PrimaryApi]);
        assert!(outcome.retrieved_context[0].contains("842.50"));

        // Exactly one synthesis call per turn.
        assert_eq!(h.oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_name_asks_to_disambiguate() {
        let h = harness(StubFundDatabase::with(axis_funds()), StubOracle::fixed("unused"));

        let outcome = h
            .orchestrator
            .handle_traced(&Query::new("Tell me about Axis fund"), &[])
            .await;

        assert_eq!(outcome.state(), TurnState::AwaitingClarification);
        assert!(outcome.states.contains(&TurnState::Ambiguous));
        for name in ["Axis Bluechip Fund", "Axis Midcap Fund", "Axis Small Cap Fund"] {
            assert!(outcome.answer.text.contains(name), "{name}");
        }
        assert!(outcome.answer.text.contains("2. Axis Midcap Fund"));
        assert!(!outcome.answer.disclaimer);
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_clarification_resumes_with_number() {
        let h = harness(StubFundDatabase::with(axis_funds()), StubOracle::fixed("Here you go."));

        let first_query = Query::new("Tell me about Axis fund");
        let first = h.orchestrator.handle(&first_query, &[]).await;
        let history = vec![Exchange {
            query: first_query.text.clone(),
            answer: first,
        }];

        let outcome = h.orchestrator.handle_traced(&Query::new("2"), &history).await;

        assert_eq!(outcome.state(), TurnState::Answered);
        assert_eq!(outcome.intent.intent, Intent::FundQuery);
        assert_eq!(outcome.intent.entities.fund_name.as_deref(), Some("Axis Midcap Fund"));
        assert!(outcome.answer.text.contains("Axis Midcap Fund"));
        assert!(!outcome.answer.text.contains("Axis Bluechip Fund"));
        assert_eq!(h.db.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_fund_name_asks_which_fund() {
        let h = harness(StubFundDatabase::empty(), StubOracle::fixed("unused"));

        let outcome = h.orchestrator.handle_traced(&Query::new("what is the nav"), &[]).await;

        assert_eq!(outcome.state(), TurnState::AwaitingClarification);
        assert!(outcome.answer.text.contains("Which fund"));
        assert_eq!(h.db.calls(), 0);
    }

    #[tokio::test]
    async fn test_new_question_is_not_forced_into_pending_intent() {
        let h = harness(
            StubFundDatabase::with(vec![FundRecord::named("Axis Bluechip Fund")]),
            StubOracle::fixed("Here you go."),
        );

        let first_query = Query::new("what is the nav");
        let first = h.orchestrator.handle(&first_query, &[]).await;
        let history = vec![Exchange {
            query: first_query.text,
            answer: first,
        }];

        let redeem = h
            .orchestrator
            .handle_traced(&Query::new("How do I redeem my Axis Bluechip Fund units?"), &history)
            .await;
        assert_eq!(redeem.intent.intent, Intent::RedemptionQuery);
        assert!(!redeem.tools_used.contains(&ToolKind::NavLookup));

        let named = h
            .orchestrator
            .handle_traced(&Query::new("the Axis Bluechip Fund please"), &history)
            .await;
        assert_eq!(named.intent.intent, Intent::NavRequest);
        assert_eq!(named.tools_used, vec![ToolKind::NavLookup]);
        assert_eq!(named.intent.entities.fund_name.as_deref(), Some("Axis Bluechip Fund"));
    }

    #[tokio::test]
    async fn test_all_sources_fail_reports_attempts() {
        let h = harness(
            StubFundDatabase::failing(SourceError::Timeout),
            StubOracle::fixed("made-up NAV of 999.99"),
        );

        let outcome = h
            .orchestrator
            .handle_traced(&Query::new("What is the NAV of Imaginary Growth Fund?"), &[])
            .await;

        assert_eq!(outcome.state(), TurnState::Answered);
        assert!(!outcome.states.contains(&TurnState::Synthesizing));
        assert!(outcome.answer.text.contains("could not retrieve data"));
        assert!(outcome.answer.text.contains("fund database: request timed out"));
        assert!(outcome.answer.text.contains("scheme registry"));
        assert!(!outcome.answer.text.contains("999.99"));
        assert_eq!(outcome.answer.source_id, None);
        assert!(outcome.fallback_triggered);
        assert_eq!(outcome.attempts.len(), 5);
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_still_returns_facts() {
        let h = harness(
            StubFundDatabase::with(vec![hdfc_top_100()]),
            StubOracle::failing("connection refused"),
        );

        let outcome = h
            .orchestrator
            .handle_traced(&Query::new("What is the NAV of HDFC Top 100 Fund?"), &[])
            .await;

        assert_eq!(outcome.state(), TurnState::Answered);
        assert!(outcome.answer.text.contains("842.50"));
        assert!(outcome.fallback_triggered);
        assert!(outcome.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_compare_needs_two_funds_then_resumes() {
        let h = harness(
            StubFundDatabase::with(vec![FundRecord::named("Axis Bluechip Fund")]),
            StubOracle::fixed("Both are large cap funds."),
        );

        let first_query = Query::new("compare Axis Bluechip Fund");
        let first = h.orchestrator.handle_traced(&first_query, &[]).await;
        assert_eq!(first.state(), TurnState::AwaitingClarification);

        let history = vec![Exchange {
            query: first_query.text,
            answer: first.answer,
        }];
        let second = h
            .orchestrator
            .handle_traced(&Query::new("SBI Bluechip Fund"), &history)
            .await;

        assert_eq!(second.intent.intent, Intent::CompareFunds);
        assert_eq!(
            second.intent.entities.compare_with,
            vec!["Axis Bluechip Fund", "SBI Bluechip Fund"]
        );
        assert_eq!(second.tool_calls, 2);
    }

    #[tokio::test]
    async fn test_greeting_has_no_disclaimer() {
        let h = harness(StubFundDatabase::empty(), StubOracle::failing("down"));

        let answer = h
            .orchestrator
            .handle(&Query::from_user("hello", Some("Asha".to_string())), &[])
            .await;

        assert!(answer.text.starts_with("Hello Asha!"));
        assert!(!answer.disclaimer);
        assert_eq!(h.db.calls(), 0);
    }
}
