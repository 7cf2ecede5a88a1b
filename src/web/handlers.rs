//! HTTP request handlers.

use super::AppState;
use crate::db::DbError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

const DEFAULT_HOURS: i64 = 24;
const MAX_HOURS: i64 = 24 * 90;
const DEFAULT_LIMIT: usize = 1000;
const MAX_LIMIT: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

impl WindowQuery {
    fn since(&self) -> DateTime<Utc> {
        let hours = self.hours.unwrap_or(DEFAULT_HOURS).clamp(1, MAX_HOURS);
        Utc::now() - ChronoDuration::hours(hours)
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

fn error_response(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        e => {
            tracing::error!("Request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn respond<T: serde::Serialize>(result: Result<T, DbError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.targets())
}

// ============================================================================
// API: Ping
// ============================================================================

pub async fn handle_get_pings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let store = state.engine.store();
    respond(
        store
            .get_target(id)
            .and_then(|_| store.query_ping_range(id, query.since(), query.limit())),
    )
}

pub async fn handle_trigger_ping(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    respond(state.engine.trigger_ping(id).await)
}

// ============================================================================
// API: Routes
// ============================================================================

pub async fn handle_get_routes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let store = state.engine.store();
    respond(
        store
            .get_target(id)
            .and_then(|_| store.query_route_range(id, query.since(), query.limit())),
    )
}

pub async fn handle_trigger_route(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    respond(state.engine.trigger_route(id).await)
}

// ============================================================================
// API: Analysis
// ============================================================================

pub async fn handle_timeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let engine = &state.engine;
    respond(
        engine
            .store()
            .get_target(id)
            .and_then(|_| engine.timeline(id, query.since(), query.limit())),
    )
}

pub async fn handle_statistics(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> impl IntoResponse {
    let engine = &state.engine;
    respond(
        engine
            .store()
            .get_target(id)
            .and_then(|_| engine.statistics(id, query.since(), query.limit())),
    )
}
