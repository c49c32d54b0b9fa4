// HTTP and WebSocket APIs

pub mod connection;
pub mod oauth;
pub mod websocket;

pub use connection::create_connection_router;
pub use oauth::create_oauth_router;
pub use websocket::{create_ws_router, ws_handler};

use crate::auth::SessionAuthenticator;
use crate::error::{BridgeError, ErrorKind};
use crate::oauth::TokenManager;
use crate::tools::ToolDispatcher;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub authenticator: Arc<dyn SessionAuthenticator>,
}

/// Full public router: WebSocket sessions, OAuth flow, connection management.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/health", get(health))
        .merge(create_ws_router(state.clone()))
        .merge(create_oauth_router(state.clone()))
        .merge(create_connection_router(state))
        .layer(CorsLayer::permissive())
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

/// Application error types for HTTP endpoints
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    /// Domain failure, status derived from its kind
    Bridge(BridgeError),
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        AppError::Bridge(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidState | ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::ExchangeFailed
        | ErrorKind::RefreshFailed
        | ErrorKind::AuthRejected
        | ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::NoCredential => StatusCode::NOT_FOUND,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::InvalidArgument | ErrorKind::UnknownTool => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, kind) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Bridge(e) => (status_for(e.kind), e.message, Some(e.kind)),
        };

        (status, Json(ErrorResponse { error, kind })).into_response()
    }
}
