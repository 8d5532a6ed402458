use crate::metrics::{Metrics, MetricsSnapshot};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use eval::{AgentReply, EvaluatedAgent};
use extract::Intent;
use query::Exchange;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::{DailyMetricsRecord, EvaluationFilter, EvaluationStore, EvaluationView, PerformanceSummary};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;
const MAX_SUMMARY_DAYS: i64 = 365;

pub struct AppState {
    pub agent: Arc<EvaluatedAgent>,
    pub metrics: Arc<Metrics>,
    pub model: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/session/:id", get(get_session).delete(clear_session))
        .route("/api/evaluations", get(list_evaluations))
        .route("/api/evaluations/:id", get(get_evaluation))
        .route("/api/metrics/daily/:date", post(aggregate_daily))
        .route("/api/metrics/summary", get(metrics_summary))
        .route("/api/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn track_requests(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    state.metrics.record_request(!response.status().is_server_error());
    response
}

/// Run a blocking store call off the async workers.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&EvaluationStore) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = state.agent.store().clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| {
            error!(error = %e, "Store task panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "Store query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: String,
    model: String,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match with_store(&state, |store| store.count()).await {
        Ok(_) => "ok".to_string(),
        Err(_) => "error: evaluation store unavailable".to_string(),
    };

    Json(HealthResponse {
        status: "ok",
        store,
        model: state.model.clone(),
    })
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
    user_name: Option<String>,
    /// Intent label the caller expects; recorded for accuracy reporting.
    expected_intent: Option<String>,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<AgentReply>, StatusCode> {
    let expected_intent = match req.expected_intent.as_deref() {
        Some(label) => Some(Intent::parse(label).ok_or_else(|| {
            warn!(label, "Unknown expected intent");
            StatusCode::BAD_REQUEST
        })?),
        None => None,
    };

    // The evaluation handle is dropped here; scoring carries on detached.
    let turn = state
        .agent
        .process_with_evaluation(&req.message, req.session_id.as_deref(), req.user_name, expected_intent)
        .await;

    let reply = turn.reply;
    state.metrics.record_chat(
        std::time::Duration::from_secs_f64(reply.latency_ms / 1000.0),
        reply.state,
        reply.fallback_triggered,
    );
    Ok(Json(reply))
}

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
    turns: u32,
    history: Vec<Exchange>,
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, StatusCode> {
    let session = state.agent.session(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(SessionResponse {
        session_id: id,
        turns: session.turns,
        history: session.history,
    }))
}

async fn clear_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
    if state.agent.clear_session(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct EvaluationQuery {
    session_id: Option<String>,
    intent: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    passed: Option<bool>,
    limit: Option<usize>,
}

async fn list_evaluations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EvaluationQuery>,
) -> Result<Json<Vec<EvaluationView>>, StatusCode> {
    let intent = match params.intent.as_deref() {
        Some(label) => Some(Intent::parse(label).ok_or(StatusCode::BAD_REQUEST)?),
        None => None,
    };
    let filter = EvaluationFilter {
        session_id: params.session_id,
        intent,
        from: params.from,
        to: params.to,
        passed_threshold: params.passed,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let records = with_store(&state, move |store| store.get(&filter, limit)).await?;
    Ok(Json(records.into_iter().map(EvaluationView::from).collect()))
}

async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EvaluationView>, StatusCode> {
    let record = with_store(&state, move |store| store.get_by_id(&id)).await?;
    record
        .map(|r| Json(EvaluationView::from(r)))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn aggregate_daily(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DailyMetricsRecord>, StatusCode> {
    let daily = with_store(&state, move |store| store.aggregate_day(date)).await?;
    Ok(Json(daily))
}

#[derive(Deserialize)]
struct SummaryQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
struct SummaryResponse {
    days: i64,
    summary: PerformanceSummary,
    daily: Vec<DailyMetricsRecord>,
}

async fn metrics_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, StatusCode> {
    let days = params.days.unwrap_or(7);
    if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let since = Utc::now() - Duration::days(days);

    let (summary, daily) = with_store(&state, move |store| {
        Ok((store.performance_summary(since)?, store.recent_days(days as usize)?))
    })
    .await?;

    Ok(Json(SummaryResponse { days, summary, daily }))
}

#[derive(Serialize)]
struct StatsResponse {
    requests: MetricsSnapshot,
    active_sessions: usize,
    stored_evaluations: u64,
    dropped_evaluations: u64,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, StatusCode> {
    let stored_evaluations = with_store(&state, |store| store.count()).await?;
    Ok(Json(StatsResponse {
        requests: state.metrics.snapshot(),
        active_sessions: state.agent.session_count(),
        stored_evaluations,
        dropped_evaluations: state.agent.dropped_evaluations(),
    }))
}
