//! HTTP handlers
//!
//! Thin wrappers: check the credential, validate the input, then delegate to
//! the hub, the engine or the session directory.

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ws::serve_socket;
use super::AppState;
use crate::core::{Principal, DEFAULT_LANGUAGE};
use crate::realtime::{Connection, HubStats};
use crate::sandbox::{normalize_language, ExecutionRequest, ExecutionResult};

// ---- Error Handling ----

/// Maps crate errors onto HTTP responses
pub struct AppError(crate::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            crate::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            crate::Error::NotFound(_) => StatusCode::NOT_FOUND,
            crate::Error::InvalidInput(_)
            | crate::Error::UnsupportedLanguage(_)
            | crate::Error::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<crate::Error> for AppError {
    fn from(err: crate::Error) -> Self {
        AppError(err)
    }
}

// ---- Request / Response Types ----

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    name: &'static str,
    version: &'static str,
    languages: Vec<String>,
    hub: HubStats,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreateSessionRequest {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// Bearer token from the Authorization header
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn authorize(state: &AppState, token: Option<&str>) -> Result<Principal, AppError> {
    Ok(state.auth.verify(token).await?)
}

// ---- Handlers ----

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: crate::NAME,
        version: crate::VERSION,
        languages: state.engine.languages().into_iter().map(String::from).collect(),
        hub: state.hub.stats().await,
    })
}

pub(crate) async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let principal = authorize(&state, bearer(&headers)).await?;

    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(crate::Error::from)?
    };
    let language = request
        .language
        .map(|l| normalize_language(&l))
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let session = state.sessions.create(&language).await?;
    info!("Session {} created by {} ({})", session.session_id, principal.subject, language);

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.session_id,
        }),
    ))
}

pub(crate) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    // Browsers join a session by upgrading its own URL
    if is_websocket_upgrade(&headers) {
        return join_session(state, id, query, &headers, upgrade).await;
    }

    let session = state
        .sessions
        .get(&id)
        .await?
        .ok_or_else(|| crate::Error::NotFound(format!("session {}", id)))?;
    Ok(Json(session).into_response())
}

pub(crate) async fn ws_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    join_session(state, id, query, &headers, upgrade).await
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn join_session(
    state: AppState,
    id: String,
    query: WsQuery,
    headers: &HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    // Credential and session are checked before anything is registered
    let token = query.token.as_deref().or_else(|| bearer(headers));
    let principal = authorize(&state, token).await?;
    if !state.sessions.exists(&id).await? {
        return Err(crate::Error::NotFound(format!("session {}", id)).into());
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let connection = Connection::new(state.hub.clone(), id.clone(), state.realtime.clone());
    debug!(
        "Upgrading {} for session {} as {}",
        principal.subject,
        id,
        connection.identity().id
    );

    Ok(upgrade
        .max_message_size(state.realtime.max_frame_bytes)
        .on_upgrade(move |socket| serve_socket(socket, connection)))
}

pub(crate) async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ExecutionResult>, AppError> {
    authorize(&state, bearer(&headers)).await?;

    let request: ExecutionRequest = serde_json::from_slice(&body).map_err(crate::Error::from)?;
    if request.source_text.trim().is_empty() {
        return Err(crate::Error::InvalidInput("source text is empty".to_string()).into());
    }
    if request.language_id.trim().is_empty() {
        return Err(crate::Error::InvalidInput("language is empty".to_string()).into());
    }

    let result = state.engine.run_request(request).await;
    debug!("Execution finished in {}ms (success: {})", result.elapsed_ms, result.success);
    Ok(Json(result))
}
