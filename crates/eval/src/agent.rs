use anyhow::{anyhow, Result};
use dashmap::DashMap;
use extract::Intent;
use query::{
    AnswerRecord, Exchange, GenerationOracle, HttpFundDatabase, HttpSchemeRegistry, OllamaClient,
    OllamaConfig, Orchestrator, OrchestratorSettings, Query, ResolverChain, RetryPolicy,
    RetrySettings, SourceConfig, TavilySearch, TurnOutcome, TurnState,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{EvaluationRecord, EvaluationStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EvalConfig;
use crate::engine::{MetricsEngine, TurnMetadata};
use crate::judge::Judge;

/// Older exchanges are dropped once a session grows past this.
const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub history: Vec<Exchange>,
    pub turns: u32,
}

/// What the caller gets back immediately; scoring continues in the
/// background under `evaluation_id`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub session_id: String,
    pub conversation_turn: u32,
    pub answer: AnswerRecord,
    pub intent: Intent,
    pub state: TurnState,
    /// No source backed the answer; the canned fallback was used.
    pub fallback_triggered: bool,
    /// Follow-up suggestions; empty while a clarification is pending.
    pub related_questions: Vec<String>,
    pub evaluation_id: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone)]
pub struct StoredEvaluation {
    pub record: EvaluationRecord,
    pub persisted: bool,
    pub store_error: Option<String>,
}

/// Handle to a background evaluation. Dropping it leaves the task running.
pub struct EvaluationTask {
    handle: JoinHandle<Option<StoredEvaluation>>,
}

impl EvaluationTask {
    /// None when the evaluation task itself died.
    pub async fn wait(self) -> Option<StoredEvaluation> {
        self.handle.await.ok().flatten()
    }
}

pub struct AgentTurn {
    pub reply: AgentReply,
    pub evaluation: EvaluationTask,
}

/// Orchestrator plus per-turn evaluation, with per-session history.
pub struct EvaluatedAgent {
    orchestrator: Arc<Orchestrator>,
    engine: Arc<MetricsEngine>,
    store: Arc<EvaluationStore>,
    sessions: DashMap<String, Session>,
    store_retry: RetryPolicy,
    dropped: Arc<AtomicU64>,
    in_flight: Arc<InFlight>,
}

/// Count of evaluations still scoring or writing, with a wakeup when it
/// reaches zero.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl EvaluatedAgent {
    pub fn new(orchestrator: Arc<Orchestrator>, engine: Arc<MetricsEngine>, store: Arc<EvaluationStore>) -> Self {
        let config = engine.config();
        let backoff = config.store_retry_backoff_ms;
        let store_retry = RetryPolicy::new(config.store_write_retries, backoff, backoff * 8);
        Self {
            orchestrator,
            engine,
            store,
            sessions: DashMap::new(),
            store_retry,
            dropped: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Wire the HTTP collaborators and the Ollama oracle from configuration.
    /// The same model answers users and judges the answers.
    pub fn connect(
        sources: &SourceConfig,
        ollama: &OllamaConfig,
        retry: &RetrySettings,
        eval: EvalConfig,
        store: Arc<EvaluationStore>,
    ) -> Result<Self> {
        let oracle: Arc<dyn GenerationOracle> = Arc::new(OllamaClient::new(ollama)?);
        let resolver = ResolverChain::standard(
            Arc::new(HttpFundDatabase::new(sources)?),
            Arc::new(HttpSchemeRegistry::new(sources)?),
            Arc::new(TavilySearch::new(sources)?),
            oracle.clone(),
            sources,
            ollama.synthesis_temperature,
            RetryPolicy::from(retry),
        );
        let settings = OrchestratorSettings {
            synthesis_temperature: ollama.synthesis_temperature,
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(resolver, oracle.clone(), settings);
        let engine = MetricsEngine::new(Judge::new(oracle, eval.judge_temperature), eval);

        info!(model = %ollama.model, "Evaluated agent ready");
        Ok(Self::new(Arc::new(orchestrator), Arc::new(engine), store))
    }

    pub fn store(&self) -> &Arc<EvaluationStore> {
        &self.store
    }

    /// Answer one message and start scoring it. Never waits on the judge
    /// or the store.
    pub async fn process_with_evaluation(
        &self,
        message: &str,
        session_id: Option<&str>,
        user_name: Option<String>,
        expected_intent: Option<Intent>,
    ) -> AgentTurn {
        let start = Instant::now();
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (history, turn) = {
            let mut session = self.sessions.entry(session_id.clone()).or_default();
            session.turns += 1;
            (session.history.clone(), session.turns)
        };

        let query = Query::from_user(message, user_name.clone());
        let outcome = self.orchestrator.handle_traced(&query, &history).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.history.push(Exchange {
                query: message.to_string(),
                answer: outcome.answer.clone(),
            });
            let overflow = session.history.len().saturating_sub(MAX_HISTORY);
            session.history.drain(..overflow);
        }

        let mut meta = TurnMetadata::new(&session_id, turn);
        meta.user_name = user_name;
        meta.expected_intent = expected_intent;

        let reply = AgentReply {
            session_id,
            conversation_turn: turn,
            answer: outcome.answer.clone(),
            intent: outcome.intent.intent,
            state: outcome.state(),
            fallback_triggered: outcome.fallback_triggered,
            related_questions: match outcome.state() {
                TurnState::Answered => extract::related_questions(outcome.intent.intent)
                    .iter()
                    .map(|q| q.to_string())
                    .collect(),
                _ => Vec::new(),
            },
            evaluation_id: meta.evaluation_id.clone(),
            latency_ms,
        };
        info!(
            session = %reply.session_id,
            turn,
            intent = %reply.intent,
            latency_ms = reply.latency_ms,
            "Turn complete"
        );

        let evaluation = self.spawn_evaluation(message.to_string(), outcome, latency_ms, meta);
        AgentTurn { reply, evaluation }
    }

    /// Score and persist off the response path. The supervisor logs and
    /// swallows every failure, including a panic in the scoring task.
    fn spawn_evaluation(
        &self,
        message: String,
        outcome: TurnOutcome,
        latency_ms: f64,
        meta: TurnMetadata,
    ) -> EvaluationTask {
        let engine = self.engine.clone();
        let store = self.store.clone();
        let policy = self.store_retry.clone();
        let dropped = self.dropped.clone();
        let evaluation_id = meta.evaluation_id.clone();
        let in_flight = self.in_flight.clone();
        in_flight.count.fetch_add(1, Ordering::AcqRel);

        let work = tokio::spawn(async move {
            let record = engine.evaluate(&message, &outcome, latency_ms, &meta).await;
            match persist(&store, &record, &policy).await {
                Ok(_) => {
                    debug!(id = %record.id, "Evaluation stored");
                    StoredEvaluation {
                        record,
                        persisted: true,
                        store_error: None,
                    }
                }
                Err(e) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    error!(id = %record.id, error = %e, "Dropping evaluation after store failures");
                    StoredEvaluation {
                        record,
                        persisted: false,
                        store_error: Some(format!("{:#}", e)),
                    }
                }
            }
        });

        let handle = tokio::spawn(async move {
            let stored = match work.await {
                Ok(stored) => Some(stored),
                Err(e) => {
                    error!(id = %evaluation_id, error = %e, "Evaluation task aborted");
                    None
                }
            };
            in_flight.finish();
            stored
        });

        EvaluationTask { handle }
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Evaluations lost because every store write attempt failed.
    pub fn dropped_evaluations(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn in_flight_evaluations(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for background evaluations to finish, including
    /// ones whose handles were dropped. False if some were still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight.count.load(Ordering::Acquire) == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await;

        if waited.is_err() {
            warn!(pending = self.in_flight_evaluations(), "Evaluations still running after drain timeout");
        }
        waited.is_ok()
    }
}

async fn persist(store: &Arc<EvaluationStore>, record: &EvaluationRecord, policy: &RetryPolicy) -> Result<String> {
    policy
        .retry("store_evaluation", || {
            let store = store.clone();
            let record = record.clone();
            async move {
                tokio::task::spawn_blocking(move || store.save(&record))
                    .await
                    .map_err(|e| anyhow!("store write task failed: {}", e))?
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use query::stubs::{StubFundDatabase, StubOracle, StubSchemeRegistry, StubWebSearch};
    use query::{FundRecord, SourceError, SourceId};

    fn agent_with(db: StubFundDatabase, oracle: StubOracle, store: EvaluationStore) -> EvaluatedAgent {
        let oracle = Arc::new(oracle);
        let resolver = ResolverChain::standard(
            Arc::new(db),
            Arc::new(StubSchemeRegistry::failing(SourceError::Status(404))),
            Arc::new(StubWebSearch::failing(SourceError::Unavailable("offline".into()))),
            oracle.clone(),
            &SourceConfig::default(),
            0.3,
            RetryPolicy::none(),
        );
        let orchestrator = Orchestrator::new(resolver, oracle.clone(), OrchestratorSettings::default());
        let config = EvalConfig {
            store_retry_backoff_ms: 1,
            ..EvalConfig::default()
        };
        let engine = MetricsEngine::new(Judge::new(oracle, 0.0), config);
        EvaluatedAgent::new(Arc::new(orchestrator), Arc::new(engine), Arc::new(store))
    }

    /// Grades every judge prompt 1.0; otherwise answers with the cited NAV.
    fn nav_oracle() -> StubOracle {
        StubOracle::from_fn(|prompt| {
            if prompt.starts_with("Evaluate") {
                Ok("1.0".to_string())
            } else {
                Ok("The latest NAV of HDFC Top 100 Fund is ₹842.50 as of 2025-12-09.".to_string())
            }
        })
    }

    fn hdfc_top_100() -> FundRecord {
        FundRecord {
            nav: Some(842.50),
            nav_date: Some("2025-12-09".to_string()),
            ..FundRecord::named("HDFC Top 100 Fund")
        }
    }

    #[tokio::test]
    async fn test_nav_turn_is_answered_and_evaluated() {
        let agent = agent_with(
            StubFundDatabase::with(vec![hdfc_top_100()]),
            nav_oracle(),
            EvaluationStore::open_in_memory().unwrap(),
        );

        let turn = agent
            .process_with_evaluation(
                "What is the current NAV of HDFC Top 100 Fund?",
                Some("s-1"),
                Some("Asha".to_string()),
                Some(Intent::NavRequest),
            )
            .await;

        assert!(turn.reply.answer.text.contains("842.50"));
        assert_eq!(turn.reply.answer.source_id, Some(SourceId::PrimaryApi));
        assert_eq!(turn.reply.state, TurnState::Answered);
        assert_eq!(
            turn.reply.related_questions,
            extract::related_questions(Intent::NavRequest)
        );

        let stored = turn.evaluation.wait().await.unwrap();
        assert!(stored.persisted);
        let record = stored.record;
        assert_eq!(record.id, turn.reply.evaluation_id);
        assert_eq!(record.faithfulness_score, Some(1.0));
        assert_eq!(record.answer_correctness(), Some(1.0));
        assert_eq!(record.intent_match, Some(true));
        assert!(record.passed_threshold);
        assert!(record.contains_disclaimer);
        assert_eq!(record.api_source.as_deref(), Some("PRIMARY_API"));
        assert_eq!(record.retrieval_path, vec!["PRIMARY_API"]);

        let loaded = agent.store().get_by_id(&record.id).unwrap().unwrap();
        assert_eq!(loaded.user_name.as_deref(), Some("Asha"));
    }

    #[tokio::test]
    async fn test_clarification_across_turns() {
        let funds = ["Axis Bluechip Fund", "Axis Midcap Fund", "Axis Small Cap Fund"]
            .into_iter()
            .map(FundRecord::named)
            .collect();
        let agent = agent_with(
            StubFundDatabase::with(funds),
            StubOracle::fixed("0.9"),
            EvaluationStore::open_in_memory().unwrap(),
        );

        let first = agent
            .process_with_evaluation("Tell me about Axis fund", Some("s-2"), None, None)
            .await;
        assert_eq!(first.reply.state, TurnState::AwaitingClarification);
        assert!(first.reply.related_questions.is_empty());
        for name in ["Axis Bluechip Fund", "Axis Midcap Fund", "Axis Small Cap Fund"] {
            assert!(first.reply.answer.text.contains(name));
        }

        let second = agent
            .process_with_evaluation("2", Some("s-2"), None, None)
            .await;
        assert_eq!(second.reply.conversation_turn, 2);
        assert_eq!(second.reply.state, TurnState::Answered);

        first.evaluation.wait().await.unwrap();
        second.evaluation.wait().await.unwrap();
        assert_eq!(agent.session("s-2").unwrap().history.len(), 2);
        assert_eq!(agent.store().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drain_waits_for_detached_evaluations() {
        let agent = agent_with(
            StubFundDatabase::with(vec![hdfc_top_100()]),
            nav_oracle(),
            EvaluationStore::open_in_memory().unwrap(),
        );

        for session in ["s-a", "s-b", "s-c"] {
            let turn = agent
                .process_with_evaluation("What is the current NAV of HDFC Top 100 Fund?", Some(session), None, None)
                .await;
            drop(turn.evaluation);
        }

        assert!(agent.drain(Duration::from_secs(5)).await);
        assert_eq!(agent.in_flight_evaluations(), 0);
        assert_eq!(agent.store().count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unparsable_judge_reply_still_stores_record() {
        let oracle = StubOracle::from_fn(|prompt| {
            if prompt.starts_with("Evaluate") {
                Ok("I would rather not say.".to_string())
            } else {
                Ok("Hello! How can I help with your investments?".to_string())
            }
        });
        let agent = agent_with(
            StubFundDatabase::empty(),
            oracle,
            EvaluationStore::open_in_memory().unwrap(),
        );

        let turn = agent.process_with_evaluation("hi", None, None, None).await;
        let stored = turn.evaluation.wait().await.unwrap();

        assert!(stored.persisted);
        assert_eq!(stored.record.relevance_score, None);
        assert_eq!(stored.record.faithfulness_score, None);
        assert!(stored.record.scoring_failed);
        assert_eq!(stored.record.scoring_errors.len(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_never_reaches_the_reply() {
        let store = EvaluationStore::open_in_memory().unwrap();
        store.close().unwrap();
        let agent = agent_with(StubFundDatabase::with(vec![hdfc_top_100()]), nav_oracle(), store);

        let turn = agent
            .process_with_evaluation("NAV of HDFC Top 100 Fund", None, None, None)
            .await;
        assert!(turn.reply.answer.text.contains("842.50"));

        let stored = turn.evaluation.wait().await.unwrap();
        assert!(!stored.persisted);
        assert!(stored.store_error.unwrap().contains("closed"));
        assert_eq!(agent.dropped_evaluations(), 1);
    }
}
