use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use extract::Intent;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::daily::{DailyMetricsRecord, IntentCount};
use crate::record::{EvaluationFilter, EvaluationRecord};
use crate::test_case::{Difficulty, TestCase};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agent_evaluations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    day TEXT NOT NULL,
    user_id TEXT,
    user_name TEXT,
    user_prompt TEXT NOT NULL,
    agent_response TEXT NOT NULL,
    conversation_turn INTEGER NOT NULL,
    intent_predicted TEXT NOT NULL,
    expected_intent TEXT,
    intent_confidence REAL NOT NULL,
    intent_match INTEGER,
    entities_extracted TEXT NOT NULL,
    threshold_used REAL NOT NULL,
    passed_threshold INTEGER NOT NULL,
    fallback_triggered INTEGER NOT NULL,
    relevance_score REAL,
    hallucination_score REAL,
    faithfulness_score REAL,
    contextual_relevance REAL,
    answer_correctness REAL GENERATED ALWAYS AS
        (ROUND(0.7 * relevance_score + 0.3 * faithfulness_score, 4)) VIRTUAL,
    total_latency_ms REAL NOT NULL,
    llm_latency_ms REAL NOT NULL,
    tool_latency_ms REAL NOT NULL,
    api_latency_ms REAL NOT NULL,
    api_source TEXT,
    tools_used TEXT NOT NULL,
    retrieval_path TEXT NOT NULL,
    num_tool_calls INTEGER NOT NULL,
    contains_disclaimer INTEGER NOT NULL,
    risk_detection_flag INTEGER NOT NULL,
    pii_detected INTEGER NOT NULL,
    response_length INTEGER NOT NULL,
    llm_model TEXT NOT NULL,
    agent_version TEXT NOT NULL,
    toolchain_version TEXT NOT NULL,
    environment TEXT NOT NULL,
    error_occurred INTEGER NOT NULL,
    error_message TEXT,
    retry_count INTEGER NOT NULL,
    scoring_failed INTEGER NOT NULL,
    scoring_errors TEXT NOT NULL,
    turn_state TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_eval_session ON agent_evaluations(session_id);
CREATE INDEX IF NOT EXISTS idx_eval_day ON agent_evaluations(day);
CREATE INDEX IF NOT EXISTS idx_eval_timestamp ON agent_evaluations(timestamp);
CREATE INDEX IF NOT EXISTS idx_eval_intent ON agent_evaluations(intent_predicted);

CREATE TABLE IF NOT EXISTS daily_metrics (
    date TEXT PRIMARY KEY,
    total_queries INTEGER NOT NULL,
    avg_relevance_score REAL,
    avg_hallucination_score REAL,
    avg_faithfulness_score REAL,
    avg_contextual_relevance REAL,
    avg_answer_correctness REAL,
    avg_latency_ms REAL,
    pass_rate REAL,
    error_rate REAL,
    top_intents TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evaluation_test_cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_query TEXT NOT NULL,
    expected_intent TEXT NOT NULL,
    expected_entities TEXT NOT NULL,
    expected_keywords TEXT NOT NULL,
    category TEXT NOT NULL,
    difficulty TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threshold_experiments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_name TEXT NOT NULL,
    threshold_value REAL NOT NULL,
    notes TEXT,
    created_at TEXT NOT NULL
);
"#;

const RECORD_COLUMNS: &str = "id, session_id, timestamp, day, user_id, user_name, user_prompt, \
agent_response, conversation_turn, intent_predicted, expected_intent, intent_confidence, \
intent_match, entities_extracted, threshold_used, passed_threshold, fallback_triggered, \
relevance_score, hallucination_score, faithfulness_score, contextual_relevance, total_latency_ms, \
llm_latency_ms, tool_latency_ms, api_latency_ms, api_source, tools_used, retrieval_path, \
num_tool_calls, contains_disclaimer, risk_detection_flag, pii_detected, response_length, \
llm_model, agent_version, toolchain_version, environment, error_occurred, error_message, \
retry_count, scoring_failed, scoring_errors, turn_state";

const DAILY_COLUMNS: &str = "date, total_queries, avg_relevance_score, avg_hallucination_score, \
avg_faithfulness_score, avg_contextual_relevance, avg_answer_correctness, avg_latency_ms, \
pass_rate, error_rate, top_intents";

/// Aggregates over a trailing window, overall and per intent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub since: Option<DateTime<Utc>>,
    pub total_queries: u64,
    pub avg_relevance: Option<f64>,
    pub avg_hallucination: Option<f64>,
    pub avg_faithfulness: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub pass_rate: Option<f64>,
    pub error_rate: Option<f64>,
    pub by_intent: Vec<IntentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentSummary {
    pub intent: String,
    pub count: u64,
    pub avg_relevance: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub pass_rate: Option<f64>,
}

/// SQLite-backed evaluation store. Constructed explicitly at startup and
/// closed at shutdown; every write is a single-row insert or upsert.
pub struct EvaluationStore {
    conn: Mutex<Option<Connection>>,
}

impl EvaluationStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open evaluation store at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        info!(path = %path.display(), "Opened evaluation store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create evaluation schema")?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Release the connection. Later calls fail with "store is closed".
    pub fn close(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| e).context("Failed to close evaluation store")?;
            info!("Closed evaluation store");
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("evaluation store lock poisoned"))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("evaluation store is closed"))?;
        f(conn)
    }

    pub fn save(&self, record: &EvaluationRecord) -> Result<String> {
        let entities = serde_json::to_string(&record.entities_extracted)?;
        let tools_used = serde_json::to_string(&record.tools_used)?;
        let retrieval_path = serde_json::to_string(&record.retrieval_path)?;
        let scoring_errors = serde_json::to_string(&record.scoring_errors)?;

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO agent_evaluations ({}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                        ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
                        ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40, ?41,
                        ?42, ?43
                    )",
                    RECORD_COLUMNS
                ),
                params![
                    record.id,
                    record.session_id,
                    format_timestamp(&record.timestamp),
                    record.day().to_string(),
                    record.user_id,
                    record.user_name,
                    record.user_prompt,
                    record.agent_response,
                    record.conversation_turn,
                    record.intent_predicted.as_str(),
                    record.expected_intent.map(|i| i.as_str()),
                    record.intent_confidence,
                    record.intent_match,
                    entities,
                    record.threshold_used,
                    record.passed_threshold,
                    record.fallback_triggered,
                    record.relevance_score,
                    record.hallucination_score,
                    record.faithfulness_score,
                    record.contextual_relevance,
                    record.total_latency_ms,
                    record.llm_latency_ms,
                    record.tool_latency_ms,
                    record.api_latency_ms,
                    record.api_source,
                    tools_used,
                    retrieval_path,
                    record.num_tool_calls,
                    record.contains_disclaimer,
                    record.risk_detection_flag,
                    record.pii_detected,
                    record.response_length,
                    record.llm_model,
                    record.agent_version,
                    record.toolchain_version,
                    record.environment,
                    record.error_occurred,
                    record.error_message,
                    record.retry_count,
                    record.scoring_failed,
                    scoring_errors,
                    record.turn_state,
                ],
            )
            .context("Failed to insert evaluation record")?;
            Ok(())
        })?;

        debug!(id = %record.id, session = %record.session_id, "Saved evaluation");
        Ok(record.id.clone())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<EvaluationRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM agent_evaluations WHERE id = ?1", RECORD_COLUMNS);
            let record = conn.query_row(&sql, [id], read_record).optional()?;
            Ok(record)
        })
    }

    /// Newest first.
    pub fn get(&self, filter: &EvaluationFilter, limit: usize) -> Result<Vec<EvaluationRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            values.push(Box::new(session_id.clone()));
            clauses.push(format!("session_id = ?{}", values.len()));
        }
        if let Some(intent) = filter.intent {
            values.push(Box::new(intent.as_str()));
            clauses.push(format!("intent_predicted = ?{}", values.len()));
        }
        if let Some(from) = &filter.from {
            values.push(Box::new(format_timestamp(from)));
            clauses.push(format!("timestamp >= ?{}", values.len()));
        }
        if let Some(to) = &filter.to {
            values.push(Box::new(format_timestamp(to)));
            clauses.push(format!("timestamp <= ?{}", values.len()));
        }
        if let Some(passed) = filter.passed_threshold {
            values.push(Box::new(passed));
            clauses.push(format!("passed_threshold = ?{}", values.len()));
        }
        values.push(Box::new(limit as i64));
        let limit_param = values.len();

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM agent_evaluations {} ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            RECORD_COLUMNS, where_clause, limit_param
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), read_record)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read evaluation records")
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM agent_evaluations", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Recompute the day's rollup from its records and overwrite any
    /// previous row for that date.
    pub fn aggregate_day(&self, date: NaiveDate) -> Result<DailyMetricsRecord> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM agent_evaluations WHERE day = ?1 ORDER BY timestamp ASC, id ASC",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map([date.to_string()], read_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let daily = DailyMetricsRecord::from_records(date, &records);
            let top_intents = serde_json::to_string(&daily.top_intents)?;

            conn.execute(
                &format!(
                    "INSERT INTO daily_metrics ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(date) DO UPDATE SET
                        total_queries = excluded.total_queries,
                        avg_relevance_score = excluded.avg_relevance_score,
                        avg_hallucination_score = excluded.avg_hallucination_score,
                        avg_faithfulness_score = excluded.avg_faithfulness_score,
                        avg_contextual_relevance = excluded.avg_contextual_relevance,
                        avg_answer_correctness = excluded.avg_answer_correctness,
                        avg_latency_ms = excluded.avg_latency_ms,
                        pass_rate = excluded.pass_rate,
                        error_rate = excluded.error_rate,
                        top_intents = excluded.top_intents",
                    DAILY_COLUMNS
                ),
                params![
                    daily.date.to_string(),
                    daily.total_queries as i64,
                    daily.avg_relevance_score,
                    daily.avg_hallucination_score,
                    daily.avg_faithfulness_score,
                    daily.avg_contextual_relevance,
                    daily.avg_answer_correctness,
                    daily.avg_latency_ms,
                    daily.pass_rate,
                    daily.error_rate,
                    top_intents,
                ],
            )
            .context("Failed to upsert daily metrics")?;

            info!(date = %date, total = daily.total_queries, "Aggregated daily metrics");
            Ok(daily)
        })
    }

    pub fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetricsRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM daily_metrics WHERE date = ?1", DAILY_COLUMNS);
            Ok(conn.query_row(&sql, [date.to_string()], read_daily).optional()?)
        })
    }

    /// Most recent rollups first.
    pub fn recent_days(&self, limit: usize) -> Result<Vec<DailyMetricsRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM daily_metrics ORDER BY date DESC LIMIT ?1", DAILY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([limit as i64], read_daily)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn performance_summary(&self, since: DateTime<Utc>) -> Result<PerformanceSummary> {
        let since_text = format_timestamp(&since);

        self.with_conn(|conn| {
            let mut summary = conn.query_row(
                "SELECT COUNT(*), AVG(relevance_score), AVG(hallucination_score),
                        AVG(faithfulness_score), AVG(total_latency_ms),
                        AVG(passed_threshold), AVG(error_occurred)
                 FROM agent_evaluations WHERE timestamp >= ?1",
                [&since_text],
                |row| {
                    Ok(PerformanceSummary {
                        since: Some(since),
                        total_queries: row.get::<_, i64>(0)? as u64,
                        avg_relevance: row.get(1)?,
                        avg_hallucination: row.get(2)?,
                        avg_faithfulness: row.get(3)?,
                        avg_latency_ms: row.get(4)?,
                        pass_rate: row.get(5)?,
                        error_rate: row.get(6)?,
                        by_intent: Vec::new(),
                    })
                },
            )?;

            let mut stmt = conn.prepare(
                "SELECT intent_predicted, COUNT(*) AS n, AVG(relevance_score),
                        AVG(total_latency_ms), AVG(passed_threshold)
                 FROM agent_evaluations WHERE timestamp >= ?1
                 GROUP BY intent_predicted
                 ORDER BY n DESC, intent_predicted ASC",
            )?;
            let rows = stmt.query_map([&since_text], |row| {
                Ok(IntentSummary {
                    intent: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    avg_relevance: row.get(2)?,
                    avg_latency_ms: row.get(3)?,
                    pass_rate: row.get(4)?,
                })
            })?;
            summary.by_intent = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(summary)
        })
    }

    pub fn save_test_case(&self, case: &TestCase) -> Result<i64> {
        let entities = serde_json::to_string(&case.expected_entities)?;
        let keywords = serde_json::to_string(&case.expected_keywords)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO evaluation_test_cases
                    (test_query, expected_intent, expected_entities, expected_keywords, category, difficulty)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    case.query,
                    case.expected_intent.as_str(),
                    entities,
                    keywords,
                    case.category,
                    case.difficulty.as_str(),
                ],
            )
            .context("Failed to save test case")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn test_cases(&self, category: Option<&str>) -> Result<Vec<TestCase>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, test_query, expected_intent, expected_entities, expected_keywords,
                        category, difficulty
                 FROM evaluation_test_cases
                 WHERE ?1 IS NULL OR category = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([category], |row| {
                Ok(TestCase {
                    id: Some(row.get(0)?),
                    query: row.get(1)?,
                    expected_intent: intent_column(row, 2)?,
                    expected_entities: json_column(row, 3)?,
                    expected_keywords: json_column(row, 4)?,
                    category: row.get(5)?,
                    difficulty: {
                        let label: String = row.get(6)?;
                        Difficulty::parse(&label).ok_or_else(|| conversion_error(6, label))?
                    },
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Records a confidence threshold tried during an evaluation run.
    pub fn create_threshold_experiment(&self, name: &str, threshold: f64, notes: Option<&str>) -> Result<i64> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&threshold),
            "threshold {} is outside [0, 1]",
            threshold
        );
        anyhow::ensure!(!name.trim().is_empty(), "experiment name is empty");
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO threshold_experiments (experiment_name, threshold_value, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, threshold, notes, format_timestamp(&Utc::now())],
            )
            .context("Failed to create threshold experiment")?;
            Ok(conn.last_insert_rowid())
        })
    }
}

/// Fixed-width RFC 3339 so text order matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn intent_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Intent> {
    let label: String = row.get(idx)?;
    Intent::parse(&label).ok_or_else(|| conversion_error(idx, format!("unknown intent {}", label)))
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<EvaluationRecord> {
    let timestamp: String = row.get(2)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let expected_intent = match row.get::<_, Option<String>>(10)? {
        Some(label) => Some(
            Intent::parse(&label).ok_or_else(|| conversion_error(10, format!("unknown intent {}", label)))?,
        ),
        None => None,
    };

    Ok(EvaluationRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp,
        user_id: row.get(4)?,
        user_name: row.get(5)?,
        user_prompt: row.get(6)?,
        agent_response: row.get(7)?,
        conversation_turn: row.get(8)?,
        intent_predicted: intent_column(row, 9)?,
        expected_intent,
        intent_confidence: row.get(11)?,
        intent_match: row.get(12)?,
        entities_extracted: json_column(row, 13)?,
        threshold_used: row.get(14)?,
        passed_threshold: row.get(15)?,
        fallback_triggered: row.get(16)?,
        relevance_score: row.get(17)?,
        hallucination_score: row.get(18)?,
        faithfulness_score: row.get(19)?,
        contextual_relevance: row.get(20)?,
        total_latency_ms: row.get(21)?,
        llm_latency_ms: row.get(22)?,
        tool_latency_ms: row.get(23)?,
        api_latency_ms: row.get(24)?,
        api_source: row.get(25)?,
        tools_used: json_column(row, 26)?,
        retrieval_path: json_column(row, 27)?,
        num_tool_calls: row.get(28)?,
        contains_disclaimer: row.get(29)?,
        risk_detection_flag: row.get(30)?,
        pii_detected: row.get(31)?,
        response_length: row.get(32)?,
        llm_model: row.get(33)?,
        agent_version: row.get(34)?,
        toolchain_version: row.get(35)?,
        environment: row.get(36)?,
        error_occurred: row.get(37)?,
        error_message: row.get(38)?,
        retry_count: row.get(39)?,
        scoring_failed: row.get(40)?,
        scoring_errors: json_column(row, 41)?,
        turn_state: row.get(42)?,
    })
}

fn read_daily(row: &Row<'_>) -> rusqlite::Result<DailyMetricsRecord> {
    let date: String = row.get(0)?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let top_intents: Vec<IntentCount> = json_column(row, 10)?;

    Ok(DailyMetricsRecord {
        date,
        total_queries: row.get::<_, i64>(1)? as u64,
        avg_relevance_score: row.get(2)?,
        avg_hallucination_score: row.get(3)?,
        avg_faithfulness_score: row.get(4)?,
        avg_contextual_relevance: row.get(5)?,
        avg_answer_correctness: row.get(6)?,
        avg_latency_ms: row.get(7)?,
        pass_rate: row.get(8)?,
        error_rate: row.get(9)?,
        top_intents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_record;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_save_and_get_by_id() {
        let store = EvaluationStore::open_in_memory().unwrap();
        let mut record = sample_record("session-1", Intent::NavRequest);
        record.relevance_score = Some(0.9);
        record.scoring_errors = vec!["hallucination: no score in reply".to_string()];

        let id = store.save(&record).unwrap();
        let loaded = store.get_by_id(&id).unwrap().unwrap();

        assert_eq!(loaded, record);
        assert!(store.get_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_filters_and_order() {
        let store = EvaluationStore::open_in_memory().unwrap();
        for (session, intent, hour, passed) in [
            ("a", Intent::NavRequest, 9, true),
            ("a", Intent::Greeting, 10, false),
            ("b", Intent::NavRequest, 11, true),
        ] {
            let mut record = sample_record(session, intent);
            record.timestamp = at(9, hour);
            record.passed_threshold = passed;
            store.save(&record).unwrap();
        }

        let all = store.get(&EvaluationFilter::default(), 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, at(9, 11));

        let session_a = EvaluationFilter {
            session_id: Some("a".to_string()),
            ..Default::default()
        };
        assert_eq!(store.get(&session_a, 10).unwrap().len(), 2);

        let nav_passed = EvaluationFilter {
            intent: Some(Intent::NavRequest),
            passed_threshold: Some(true),
            ..Default::default()
        };
        assert_eq!(store.get(&nav_passed, 10).unwrap().len(), 2);

        let window = EvaluationFilter {
            from: Some(at(9, 10)),
            to: Some(at(9, 10)),
            ..Default::default()
        };
        let hits = store.get(&window, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].intent_predicted, Intent::Greeting);

        assert_eq!(store.get(&EvaluationFilter::default(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_aggregate_day_is_idempotent() {
        let store = EvaluationStore::open_in_memory().unwrap();
        for (hour, relevance) in [(8, 0.8), (12, 0.9), (23, 0.7)] {
            let mut record = sample_record("s", Intent::FundQuery);
            record.timestamp = at(9, hour);
            record.relevance_score = Some(relevance);
            record.faithfulness_score = Some(1.0);
            store.save(&record).unwrap();
        }
        let mut other_day = sample_record("s", Intent::FundQuery);
        other_day.timestamp = at(10, 1);
        store.save(&other_day).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 12, 9).unwrap();
        let first = store.aggregate_day(date).unwrap();
        let second = store.aggregate_day(date).unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.total_queries, 3);
        assert_eq!(first.avg_relevance_score, Some(0.8));

        let stored = store.daily_metrics(date).unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(store.recent_days(10).unwrap().len(), 1);
    }

    #[test]
    fn test_performance_summary_by_intent() {
        let store = EvaluationStore::open_in_memory().unwrap();
        for intent in [Intent::NavRequest, Intent::NavRequest, Intent::Greeting] {
            let mut record = sample_record("s", intent);
            record.timestamp = at(9, 12);
            store.save(&record).unwrap();
        }
        let mut old = sample_record("s", Intent::KycQuery);
        old.timestamp = at(1, 12);
        store.save(&old).unwrap();

        let summary = store.performance_summary(at(5, 0)).unwrap();
        assert_eq!(summary.total_queries, 3);
        assert_eq!(summary.by_intent[0].intent, "NAV_REQUEST");
        assert_eq!(summary.by_intent[0].count, 2);
        assert_eq!(summary.by_intent.len(), 2);
    }

    #[test]
    fn test_test_cases_by_category() {
        let store = EvaluationStore::open_in_memory().unwrap();
        let nav = TestCase::new("nav of axis bluechip", Intent::NavRequest, "nav", Difficulty::Easy)
            .with_keywords(&["NAV"]);
        let kyc = TestCase::new("kyc documents", Intent::KycQuery, "kyc", Difficulty::Medium);
        store.save_test_case(&nav).unwrap();
        store.save_test_case(&kyc).unwrap();

        assert_eq!(store.test_cases(None).unwrap().len(), 2);
        let only_nav = store.test_cases(Some("nav")).unwrap();
        assert_eq!(only_nav.len(), 1);
        assert_eq!(only_nav[0].expected_keywords, vec!["NAV"]);
        assert_eq!(only_nav[0].id, Some(1));
    }

    #[test]
    fn test_threshold_experiments() {
        let store = EvaluationStore::open_in_memory().unwrap();
        let first = store
            .create_threshold_experiment("baseline", 0.75, Some("9/12 passed"))
            .unwrap();
        let second = store.create_threshold_experiment("strict", 0.9, None).unwrap();
        assert_eq!(second, first + 1);

        let (value, notes): (f64, Option<String>) = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT threshold_value, notes FROM threshold_experiments WHERE id = ?1",
                    params![first],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!(value, 0.75);
        assert_eq!(notes.as_deref(), Some("9/12 passed"));

        assert!(store.create_threshold_experiment("too high", 1.5, None).is_err());
        assert!(store.create_threshold_experiment("nan", f64::NAN, None).is_err());
        assert!(store.create_threshold_experiment(" ", 0.5, None).is_err());
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let store = EvaluationStore::open_in_memory().unwrap();
        store.close().unwrap();
        let err = store.save(&sample_record("s", Intent::Greeting)).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
