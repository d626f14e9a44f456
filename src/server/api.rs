use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::app::Kaizen;
use crate::errors::EngineError;
use crate::models::Mode;

/// Header that selects the isolation scope for a request.
pub const SCOPE_HEADER: &str = "x-kaizen-scope";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub kaizen: Arc<Kaizen>,
    pub default_scope: String,
    pub default_max_iterations: u32,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    fn scope(&self, headers: &HeaderMap) -> String {
        headers
            .get(SCOPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.default_scope)
            .to_string()
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct StartSessionRequest {
    pub mode: Option<String>,
    pub max_iterations: Option<u32>,
}

#[derive(Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Deserialize, Default)]
pub struct AnalyzeRequest {
    pub mode: Option<String>,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub reason: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::Conflict { .. } => StatusCode::CONFLICT,
                    EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                    EngineError::InvalidState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(kind = e.kind(), error = %e, "Request failed");
                }
                (status, e.kind(), e.to_string())
            }
        };
        (
            status,
            Json(serde_json::json!({"error": message, "kind": kind})),
        )
            .into_response()
    }
}

fn parse_mode(mode: Option<&str>) -> Result<Option<Mode>, ApiError> {
    mode.map(|m| m.parse::<Mode>().map_err(ApiError::BadRequest))
        .transpose()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(start_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/stop", post(stop_session))
        .route("/api/sessions/{id}/iterations", get(list_iterations))
        .route("/api/sessions/{id}/improvements", get(list_improvements))
        .route("/api/stats", get(get_stats))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/analyze", post(analyze))
        .route("/api/jobs/{id}", get(get_job).delete(cleanup_job))
        .route("/api/jobs/{id}/approve", post(approve_job))
        .route("/api/jobs/{id}/reject", post(reject_job))
        .route("/api/jobs/{id}/execute", post(execute_job))
        .route("/api/jobs/{id}/apply", post(apply_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .route("/api/jobs/{id}/resolve", post(resolve_job))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn start_session(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Option<Json<StartSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let mode = parse_mode(req.mode.as_deref())?.unwrap_or(state.kaizen.settings.default_mode);
    let max_iterations = req.max_iterations.unwrap_or(state.default_max_iterations);
    let scope = state.scope(&headers);
    let session = state
        .kaizen
        .sessions
        .start(&scope, mode, max_iterations)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.id,
        }),
    ))
}

async fn stop_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.kaizen.sessions.stop(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

async fn list_sessions(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let scope = state.scope(&headers);
    Ok(Json(state.kaizen.sessions.list(Some(&scope)).await?))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.sessions.get(&id).await?))
}

async fn list_iterations(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.sessions.iterations(&id).await?))
}

async fn list_improvements(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.sessions.improvements(&id).await?))
}

async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.global_stats()?))
}

async fn analyze(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let mode = parse_mode(req.mode.as_deref())?;
    let scope = state.scope(&headers);
    let jobs = state.kaizen.jobs.analyze(&scope, mode).await?;
    Ok((StatusCode::CREATED, Json(jobs)))
}

async fn list_jobs(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let scope = state.scope(&headers);
    Ok(Json(state.kaizen.jobs.list(Some(&scope)).await?))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.get(&id).await?))
}

async fn approve_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.approve(&id).await?))
}

async fn reject_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.reject(&id).await?))
}

async fn execute_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.kaizen.jobs.execute(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn apply_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.apply(&id).await?))
}

async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.cancel(&id).await?))
}

async fn resolve_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.kaizen.jobs.resolve_stuck(&id, &req.reason).await?))
}

async fn cleanup_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.kaizen.jobs.cleanup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineSettings;
    use crate::architect::ArchitectSupervisor;
    use crate::council::ReviewCouncil;
    use crate::engine::Collaborators;
    use crate::engine::testing::*;
    use crate::models::ImprovementType;
    use crate::store::DbHandle;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state(detector: ScriptedDetector) -> SharedState {
        let collab = Collaborators {
            detector: Arc::new(detector),
            generator: Arc::new(ScriptedGenerator::new()),
            executor: Arc::new(ScriptedExecutor::succeeding()),
            council: Arc::new(ReviewCouncil::new(
                Arc::new(FixedReviewer::approving(0.9)),
                Arc::new(FixedReviewer::approving(0.9)),
                Arc::new(FixedReviewer::approving(0.9)),
            )),
            architect: Arc::new(ArchitectSupervisor::new()),
        };
        let kaizen = Kaizen::assemble(
            DbHandle::in_memory().unwrap(),
            collab,
            EngineSettings::default(),
        )
        .await
        .unwrap();
        Arc::new(AppState {
            kaizen: Arc::new(kaizen),
            default_scope: "default".into(),
            default_max_iterations: 1,
        })
    }

    async fn test_app() -> Router {
        api_router().with_state(test_state(ScriptedDetector::new(vec![])).await)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app().await;
        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_start_session_and_fetch_it() {
        let state = test_state(ScriptedDetector::new(vec![])).await;
        let app = api_router().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(post(
                "/api/sessions",
                serde_json::json!({"mode": "conservative", "max_iterations": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: StartSessionResponse = body_json(response.into_body()).await;

        state
            .kaizen
            .sessions
            .wait_for(&created.session_id)
            .await
            .unwrap();

        let response = app
            .oneshot(get_req(&format!("/api/sessions/{}", created.session_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(session["mode"], "conservative");
        assert_eq!(session["status"], "completed");
        assert_eq!(session["iterations_run"], 2);
    }

    #[tokio::test]
    async fn test_session_body_reports_success_rate() {
        let state = test_state(ScriptedDetector::one(opportunity(
            "src/lib.rs",
            ImprovementType::Refactor,
        )))
        .await;
        let app = api_router().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(post("/api/sessions", serde_json::json!({"max_iterations": 1})))
            .await
            .unwrap();
        let created: StartSessionResponse = body_json(response.into_body()).await;
        state
            .kaizen
            .sessions
            .wait_for(&created.session_id)
            .await
            .unwrap();

        let response = app
            .oneshot(get_req(&format!("/api/sessions/{}", created.session_id)))
            .await
            .unwrap();
        let session: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(session["attempted"], 1);
        assert_eq!(session["succeeded"], 1);
        assert_eq!(session["success_rate"], 1.0);
    }

    #[tokio::test]
    async fn test_conflicting_start_returns_409() {
        let state = test_state(ScriptedDetector::endless(opportunity(
            "src/lib.rs",
            ImprovementType::Refactor,
        )))
        .await;
        let app = api_router().with_state(state.clone());
        let body = serde_json::json!({"max_iterations": 1000});

        let first = app.clone().oneshot(post("/api/sessions", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app.clone().oneshot(post("/api/sessions", body.clone())).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let err: serde_json::Value = body_json(second.into_body()).await;
        assert_eq!(err["kind"], "conflict");

        // A different scope header is a different scope.
        let mut other = post("/api/sessions", serde_json::json!({"max_iterations": 1}));
        other
            .headers_mut()
            .insert(SCOPE_HEADER, "tenant-b".parse().unwrap());
        let third = app.oneshot(other).await.unwrap();
        assert_eq!(third.status(), StatusCode::CREATED);

        state.kaizen.sessions.stop_all().await;
    }

    #[tokio::test]
    async fn test_invalid_mode_is_bad_request() {
        let app = test_app().await;
        let response = app
            .oneshot(post("/api/sessions", serde_json::json!({"mode": "reckless"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_session_returns_404() {
        let app = test_app().await;
        let response = app.oneshot(get_req("/api/sessions/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let err: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(err["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_job_lifecycle_over_http() {
        let state = test_state(ScriptedDetector::one(opportunity(
            "src/lib.rs",
            ImprovementType::Refactor,
        )))
        .await;
        let app = api_router().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(post("/api/jobs/analyze", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let jobs: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(jobs.len(), 1);
        let id = jobs[0]["id"].as_str().unwrap().to_string();

        // Executing before approval is an invalid transition.
        let response = app
            .clone()
            .oneshot(post(&format!("/api/jobs/{}/execute", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .clone()
            .oneshot(post(&format!("/api/jobs/{}/approve", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post(&format!("/api/jobs/{}/execute", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        state.kaizen.jobs.wait_until_settled(&id).await.unwrap();

        let response = app
            .clone()
            .oneshot(post(&format!("/api/jobs/{}/apply", id), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(job["status"], "applied");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/jobs/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(get_req(&format!("/api/jobs/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_endpoint_starts_at_zero() {
        let app = test_app().await;
        let response = app.oneshot(get_req("/api/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(stats["total_sessions"], 0);
        assert_eq!(stats["success_rate"], 0.0);
    }
}
