use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, SessionError};
use crate::telemetry::{self, TelemetrySnapshot};
use crate::timing::modes::{GameMode, ModeInfo};
use crate::timing::store::{
    CompleteRequest, CompleteResponse, HighScoreEntry, SessionStore, SessionSummary, StartRequest,
    StartResponse,
};

use super::sse;

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<SessionStore>,
    started: Instant,
}

impl HttpState {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum HttpServerError {
    NotFound(String),
    Internal(String),
}

impl From<SessionError> for HttpServerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { .. } => Self::NotFound(err.message()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Optional mode filter shared by listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub game_mode: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    /// `Ok(None)` for no filter, `Err(())` for a mode that cannot match.
    fn mode_filter(&self) -> Result<Option<GameMode>, ()> {
        match self.game_mode.as_deref() {
            None | Some("") => Ok(None),
            Some(key) => GameMode::parse(key).map(Some).ok_or(()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u64,
    pub open_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct CompletedResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: CompleteResponse,
}

#[derive(Debug, Serialize)]
pub struct ModesResponse {
    pub modes: Vec<ModeInfo>,
    pub high_scores: HashMap<GameMode, HighScoreEntry>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub scores: Vec<HighScoreEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Build the Axum router with all handlers.
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/telemetry-stream", get(telemetry_stream_handler))
        .route("/timing/start", post(start_session))
        .route("/timing/complete", post(complete_session))
        .route("/timing/modes", get(list_modes))
        .route("/timing/leaderboard", get(leaderboard))
        .route("/timing/history", get(history))
        .with_state(state)
}

/// Run the HTTP server loop.
pub async fn run_http_server(state: HttpState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding timing HTTP listener")?;
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving timing HTTP router")?;
    Ok(())
}

pub async fn health(State(state): State<HttpState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_ms: state.started.elapsed().as_millis() as u64,
        open_sessions: state.store.len(),
    })
}

pub async fn metrics() -> Json<TelemetrySnapshot> {
    Json(telemetry::hub().snapshot())
}

pub async fn telemetry_stream_handler() -> sse::TelemetryStream {
    sse::telemetry()
}

pub async fn start_session(
    State(state): State<HttpState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, HttpServerError> {
    Ok(Json(state.store.start(&request)?))
}

pub async fn complete_session(
    State(state): State<HttpState>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompletedResponse>, HttpServerError> {
    let result = state.store.complete(&request)?;
    Ok(Json(CompletedResponse {
        success: true,
        result,
    }))
}

pub async fn list_modes(State(state): State<HttpState>) -> Result<Json<ModesResponse>, HttpServerError> {
    Ok(Json(ModesResponse {
        modes: state.store.modes(),
        high_scores: state.store.best_by_mode()?,
    }))
}

pub async fn leaderboard(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<LeaderboardResponse>, HttpServerError> {
    let scores = match query.mode_filter() {
        Ok(mode) => state.store.leaderboard(mode)?,
        Err(()) => Vec::new(),
    };
    Ok(Json(LeaderboardResponse { scores }))
}

pub async fn history(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<HistoryResponse>, HttpServerError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let sessions = match query.mode_filter() {
        Ok(mode) => state.store.history(limit, mode)?,
        Err(()) => Vec::new(),
    };
    Ok(Json(HistoryResponse { sessions }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::SessionConfig;

    fn make_router() -> Router {
        let store = Arc::new(SessionStore::with_seed(SessionConfig::default(), 11));
        build_router(HttpState::new(store))
    }

    async fn response_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = serde_json::from_slice::<Value>(&bytes).expect("JSON body");
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("post request")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("get request")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, json) = response_json(make_router().oneshot(get_request("/health")).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["open_sessions"], 0);
    }

    #[tokio::test]
    async fn start_then_complete_round_trip() {
        let router = make_router();
        let (status, start) = response_json(
            router
                .clone()
                .oneshot(post_json(
                    "/timing/start",
                    json!({"game_mode": "precision", "difficulty": 2, "tempo": 100, "duration_bars": 1}),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(start["mode_name"], "Precision Strike");
        assert_eq!(start["difficulty_name"], "Easy");
        assert_eq!(start["total_notes"], 4);
        assert_eq!(start["beat_times"], json!([0.0, 600.0, 1200.0, 1800.0]));

        let session_id = start["session_id"].as_str().unwrap().to_string();
        let (status, done) = response_json(
            router
                .clone()
                .oneshot(post_json(
                    "/timing/complete",
                    json!({
                        "session_id": session_id,
                        "duration_seconds": 3,
                        "hits": [
                            {"note_index": 0, "hit_time_ms": 5.0},
                            {"note_index": 1, "hit_time_ms": 700.0},
                            {"note_index": 2}
                        ]
                    }),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["success"], true);
        assert_eq!(done["stats"]["perfect_hits"], 1);
        assert_eq!(done["stats"]["good_hits"], 1);
        assert_eq!(done["stats"]["missed_notes"], 2);
        assert_eq!(done["is_new_high_score"], true);
        assert!(done["tips"].as_array().is_some_and(|tips| !tips.is_empty()));

        let (status, board) = response_json(
            router
                .oneshot(get_request("/timing/leaderboard?game_mode=precision"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["scores"].as_array().map(Vec::len), Some(1));
        assert_eq!(board["scores"][0]["tempo"], 100);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (status, json) = response_json(
            make_router()
                .oneshot(post_json(
                    "/timing/complete",
                    json!({"session_id": "missing", "hits": []}),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Session not found");
    }

    #[tokio::test]
    async fn modes_lists_catalogue() {
        let (status, json) = response_json(make_router().oneshot(get_request("/timing/modes")).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["modes"].as_array().map(Vec::len), Some(5));
        assert_eq!(json["modes"][0]["key"], "groove");
        assert!(json["high_scores"].as_object().is_some_and(|map| map.is_empty()));
    }

    #[tokio::test]
    async fn unknown_mode_filter_is_empty() {
        let (status, json) = response_json(
            make_router()
                .oneshot(get_request("/timing/history?game_mode=polka"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sessions"], json!([]));
    }
}
