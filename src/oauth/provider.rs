//! OAuth provider seam and the Slack implementation.

use super::exchange::{SlackTokenResponse, TokenGrant};
use crate::config::{ServerConfig, SlackConfig};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Token endpoint operations the lifecycle manager needs from the platform.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Browser URL that starts consent, embedding `state` as the CSRF nonce.
    fn authorization_url(&self, state: &str) -> String;

    /// Fails with `ExchangeFailed` when the platform rejects the code.
    async fn exchange_code(&self, code: &str) -> BridgeResult<TokenGrant>;

    /// Fails with `RefreshFailed` when the platform rejects the refresh token.
    async fn refresh(&self, refresh_token: &str) -> BridgeResult<TokenGrant>;

    /// Cheap liveness check for a token; `AuthRejected` if revoked.
    async fn verify(&self, access_token: &str) -> BridgeResult<()>;
}

/// Slack OAuth v2 (`oauth.v2.access`, `auth.test`).
pub struct SlackOAuthProvider {
    http: reqwest::Client,
    api_base_url: String,
    authorize_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    user_scopes: Vec<String>,
}

#[derive(Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackOAuthProvider {
    pub fn new(slack: &SlackConfig, server: &ServerConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chatbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build OAuth HTTP client")?;

        Ok(Self {
            http,
            api_base_url: slack.api_base_url.trim_end_matches('/').to_string(),
            authorize_url: slack.authorize_url.clone(),
            client_id: slack.client_id.clone(),
            client_secret: slack.client_secret.clone(),
            redirect_uri: server.oauth_redirect_uri(),
            scopes: slack.scopes.clone(),
            user_scopes: slack.user_scopes.clone(),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> BridgeResult<Result<TokenGrant, String>> {
        let url = format!("{}/oauth.v2.access", self.api_base_url);
        tracing::debug!(url = %url, grant_type = form[0].1, "Calling Slack token endpoint");

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| BridgeError::transient(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BridgeError::transient(format!(
                "Token endpoint returned {}",
                status
            )));
        }

        let body: SlackTokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::internal(format!("Failed to parse token response: {}", e)))?;

        Ok(body.into_grant())
    }
}

#[async_trait]
impl OAuthProvider for SlackOAuthProvider {
    fn authorization_url(&self, state: &str) -> String {
        let mut url = format!(
            "{}?client_id={}&scope={}&redirect_uri={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.scopes.join(",")),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state)
        );
        if !self.user_scopes.is_empty() {
            url.push_str("&user_scope=");
            url.push_str(&urlencoding::encode(&self.user_scopes.join(",")));
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> BridgeResult<TokenGrant> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        self.token_request(&form).await?.map_err(|code| {
            BridgeError::new(
                ErrorKind::ExchangeFailed,
                format!("Slack rejected authorization code: {}", code),
            )
        })
    }

    async fn refresh(&self, refresh_token: &str) -> BridgeResult<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        self.token_request(&form).await?.map_err(|code| {
            BridgeError::new(
                ErrorKind::RefreshFailed,
                format!("Slack rejected refresh token: {}", code),
            )
        })
    }

    async fn verify(&self, access_token: &str) -> BridgeResult<()> {
        let url = format!("{}/auth.test", self.api_base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| BridgeError::transient(format!("auth.test failed: {}", e)))?;

        if response.status().is_server_error() {
            return Err(BridgeError::transient(format!(
                "auth.test returned {}",
                response.status()
            )));
        }

        let body: AuthTestResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::internal(format!("Failed to parse auth.test: {}", e)))?;

        if body.ok {
            Ok(())
        } else {
            Err(BridgeError::new(
                ErrorKind::AuthRejected,
                format!(
                    "Token rejected: {}",
                    body.error.unwrap_or_else(|| "unknown_error".to_string())
                ),
            ))
        }
    }
}
