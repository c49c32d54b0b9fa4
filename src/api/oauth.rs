//! Slack OAuth v2 authorization endpoints.
//!
//! 1. Client opens `GET /oauth/slack/start` (bearer header or `?session_token=`)
//! 2. Redirect to Slack's consent page with a single-use state token
//! 3. Slack redirects to `GET /oauth/slack/callback?code&state`
//! 4. State is consumed, the code exchanged, and the credential stored

use crate::api::{AppError, AppState};
use crate::auth::authenticate_request;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// OAuth start query parameters
#[derive(Deserialize)]
pub struct OAuthStartQuery {
    session_token: Option<String>,
    redirect: Option<String>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    team_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_name: Option<String>,
}

/// Create OAuth router
pub fn create_oauth_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/oauth/slack/start", get(oauth_start))
        .route("/oauth/slack/callback", get(oauth_callback))
        .with_state(state)
}

/// Post-authorization redirects stay on this server: a single leading `/`.
fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

/// GET /oauth/slack/start
async fn oauth_start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OAuthStartQuery>,
) -> Result<Redirect, AppError> {
    let user_id = authenticate_request(
        state.authenticator.as_ref(),
        &headers,
        query.session_token.as_deref(),
    )
    .map_err(|e| {
        debug!(error = %e, "OAuth start rejected");
        AppError::Unauthorized(e.to_string())
    })?;

    if let Some(target) = query.redirect.as_deref() {
        if !is_local_redirect(target) {
            warn!(user_id = %user_id, "Rejected non-local redirect target");
            return Err(AppError::BadRequest(
                "redirect must be a path on this server".to_string(),
            ));
        }
    }

    let request = state.tokens.begin_authorization(&user_id, query.redirect);

    info!(user_id = %user_id, "Redirecting to Slack authorization");
    Ok(Redirect::temporary(&request.authorization_url))
}

/// GET /oauth/slack/callback
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    debug!("OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let completed = state
        .tokens
        .complete_authorization(&csrf_state, &code)
        .await
        .map_err(|e| {
            error!(kind = %e.kind, error = %e.message, "OAuth callback failed");
            AppError::from(e)
        })?;

    if let Some(target) = completed.redirect_target {
        return Ok(Redirect::to(&target).into_response());
    }

    Ok(Json(OAuthSuccessResponse {
        success: true,
        team_id: completed.credential.team_id,
        team_name: completed.credential.team_name,
    })
    .into_response())
}
