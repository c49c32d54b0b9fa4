//! Slack connection status and disconnect.

use crate::api::{AppError, AppState};
use crate::auth::authenticate_request;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Response for GET /api/connection. Never includes tokens.
#[derive(Serialize, Debug, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_user_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response for DELETE /api/connection
#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub removed: bool,
}

/// Create connection router
pub fn create_connection_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/connection",
            get(connection_status).delete(disconnect),
        )
        .with_state(state)
}

fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    authenticate_request(state.authenticator.as_ref(), headers, None).map_err(|e| {
        debug!(error = %e, "Connection request rejected");
        AppError::Unauthorized(e.to_string())
    })
}

/// GET /api/connection
async fn connection_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConnectionStatus>, AppError> {
    let user_id = require_user(&state, &headers)?;

    let status = match state.tokens.credential(&user_id)? {
        Some(cred) => ConnectionStatus {
            connected: true,
            team_id: Some(cred.team_id),
            team_name: cred.team_name,
            platform_user_id: cred.platform_user_id,
            scopes: cred.scopes,
            expires_at: cred.expires_at,
        },
        None => ConnectionStatus {
            connected: false,
            team_id: None,
            team_name: None,
            platform_user_id: None,
            scopes: Vec::new(),
            expires_at: None,
        },
    };

    Ok(Json(status))
}

/// DELETE /api/connection
async fn disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let user_id = require_user(&state, &headers)?;
    let removed = state.tokens.disconnect(&user_id).await?;

    info!(user_id = %user_id, removed, "Disconnect requested");
    Ok(Json(DisconnectResponse {
        success: true,
        removed,
    }))
}
