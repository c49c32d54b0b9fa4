//! Local-user authentication for WebSocket sessions and HTTP routes.

use axum::http::HeaderMap;

mod session_token;

pub use session_token::{SessionAuthenticator, SessionClaims, SessionTokenVerifier};


/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Resolve the local user from the Authorization header, falling back to a
/// `session_token` query value (browser redirects cannot set headers).
pub fn authenticate_request(
    authenticator: &dyn SessionAuthenticator,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<String, TokenError> {
    let token = match extract_bearer_token(headers) {
        Ok(token) => token,
        Err(TokenError::Missing) => match query_token {
            Some(t) if !t.is_empty() => t.to_string(),
            Some(_) => return Err(TokenError::Empty),
            None => return Err(TokenError::Missing),
        },
        Err(e) => return Err(e),
    };

    authenticator.validate(&token).ok_or(TokenError::Rejected)
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header or token field not present
    Missing,
    /// Invalid format (not "Bearer <token>")
    InvalidFormat,
    /// Token is empty string
    Empty,
    /// Token present but failed verification
    Rejected,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
            TokenError::Rejected => write!(f, "Session token invalid or expired"),
        }
    }
}

impl std::error::Error for TokenError {}
