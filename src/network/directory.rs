//! Session Directory API
//!
//! HTTP routes for creating, joining, leaving and listing sessions.
//! Domain failures answer `200` with `{success: false, error, code}`;
//! authentication failures answer `401` and unreadable bodies `400`, both
//! with the same envelope.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::game::state::UserId;
use crate::network::auth::{bearer_token, AuthError, Authenticator};
use crate::network::protocol::ErrorCode;
use crate::network::session::{SessionError, SessionId, SessionInfo, SessionRegistry, SessionStatus};

// =============================================================================
// REQUESTS / RESPONSES
// =============================================================================

/// Body of `POST /game/join-session` and `POST /game/leave-session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Target session.
    pub session_id: SessionId,
}

/// Response envelope shared by every directory route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Created session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Status after a join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_status: Option<SessionStatus>,
    /// Listed sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionInfo>>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl DirectoryResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failure(code: ErrorCode, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            code: Some(code),
            ..Self::default()
        }
    }
}

/// Directory failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// Registry rejected the request.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Body missing or not a valid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<JsonRejection> for DirectoryError {
    fn from(rejection: JsonRejection) -> Self {
        DirectoryError::InvalidRequest(rejection.body_text())
    }
}

impl DirectoryError {
    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            DirectoryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DirectoryError::Session(_) => StatusCode::OK,
            DirectoryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Failure envelope.
    pub fn to_response(&self) -> DirectoryResponse {
        let code = match self {
            DirectoryError::Unauthorized(_) => ErrorCode::Unauthorized,
            DirectoryError::Session(e) => e.code(),
            DirectoryError::InvalidRequest(_) => ErrorCode::InvalidMessage,
        };
        DirectoryResponse::failure(code, self.to_string())
    }
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self.to_response())).into_response()
    }
}

// =============================================================================
// API
// =============================================================================

/// Directory handlers over a registry.
pub struct DirectoryApi {
    registry: Arc<SessionRegistry>,
    authenticator: Arc<dyn Authenticator>,
}

impl DirectoryApi {
    /// Create the API.
    pub fn new(registry: Arc<SessionRegistry>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self { registry, authenticator }
    }

    /// Verify a bearer token.
    pub fn authenticate(&self, token: Option<&str>) -> Result<UserId, DirectoryError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        Ok(self.authenticator.verify(token)?)
    }

    /// `POST /game/create-session`
    pub async fn create_session(&self, token: Option<&str>) -> Result<DirectoryResponse, DirectoryError> {
        let user_id = self.authenticate(token)?;
        let session_id = self.registry.create(user_id.clone()).await?;
        info!(session_id = %session_id, user_id = %user_id, "Session created");

        Ok(DirectoryResponse {
            session_id: Some(session_id),
            ..DirectoryResponse::ok()
        })
    }

    /// `POST /game/join-session`
    pub async fn join_session(
        &self,
        token: Option<&str>,
        request: SessionRequest,
    ) -> Result<DirectoryResponse, DirectoryError> {
        let user_id = self.authenticate(token)?;
        let status = self.registry.join(&request.session_id, user_id.clone()).await?;
        info!(session_id = %request.session_id, user_id = %user_id, "Session joined");

        Ok(DirectoryResponse {
            session_status: Some(status),
            ..DirectoryResponse::ok()
        })
    }

    /// `POST /game/leave-session`
    pub async fn leave_session(
        &self,
        token: Option<&str>,
        request: SessionRequest,
    ) -> Result<DirectoryResponse, DirectoryError> {
        let user_id = self.authenticate(token)?;
        let outcome = self.registry.leave(&request.session_id, &user_id).await?;
        info!(session_id = %request.session_id, user_id = %user_id, ?outcome, "Session left");

        Ok(DirectoryResponse::ok())
    }

    /// `GET /game/sessions`
    pub async fn list_sessions(&self) -> DirectoryResponse {
        DirectoryResponse {
            sessions: Some(self.registry.list().await),
            ..DirectoryResponse::ok()
        }
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status string.
    pub status: String,
    /// Server version.
    pub version: String,
}

/// Build the HTTP router.
pub fn router(api: Arc<DirectoryApi>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/game/create-session", post(create_session))
        .route("/game/join-session", post(join_session))
        .route("/game/leave-session", post(leave_session))
        .route("/game/sessions", get(list_sessions))
        .with_state(api)
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    if token.is_none() {
        debug!("Request without bearer token");
    }
    token
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn create_session(
    State(api): State<Arc<DirectoryApi>>,
    headers: HeaderMap,
) -> Result<Json<DirectoryResponse>, DirectoryError> {
    Ok(Json(api.create_session(header_token(&headers)).await?))
}

async fn join_session(
    State(api): State<Arc<DirectoryApi>>,
    headers: HeaderMap,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<DirectoryResponse>, DirectoryError> {
    let Json(request) = payload?;
    Ok(Json(api.join_session(header_token(&headers), request).await?))
}

async fn leave_session(
    State(api): State<Arc<DirectoryApi>>,
    headers: HeaderMap,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<DirectoryResponse>, DirectoryError> {
    let Json(request) = payload?;
    Ok(Json(api.leave_session(header_token(&headers), request).await?))
}

async fn list_sessions(State(api): State<Arc<DirectoryApi>>) -> Json<DirectoryResponse> {
    Json(api.list_sessions().await)
}

// =============================================================================
// TESTS
// =============================================================================
