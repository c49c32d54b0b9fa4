//! OAuth token acquisition and refresh.
//!
//! Authorization code flow:
//! 1. Client calls `begin_authorization` → state token + Slack consent URL
//! 2. User approves on Slack
//! 3. Slack redirects to the callback with `code` + `state`
//! 4. `complete_authorization` consumes the state, exchanges the code, and
//!    upserts the credential
//!
//! After that, `get_valid_token` hands out access tokens, refreshing them
//! under a per-user lock shared by every session of that user.

mod exchange;
mod provider;
mod state_manager;

pub use exchange::TokenGrant;
pub use provider::{OAuthProvider, SlackOAuthProvider};
pub use state_manager::{run_state_cleanup, OAuthTransaction, StateManager};

use crate::config::OAuthConfig;
use crate::credentials::{Credential, CredentialStore};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of `begin_authorization`
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state_token: String,
}

/// Result of `complete_authorization`
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub credential: Credential,
    pub redirect_target: Option<String>,
}

/// Owns the credential lifecycle for every local user.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn OAuthProvider>,
    states: StateManager,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    refresh_margin: Duration,
    revalidate_interval: Option<std::time::Duration>,
    last_validated: DashMap<String, Instant>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn OAuthProvider>,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            store,
            provider,
            states: StateManager::new(Duration::seconds(config.state_ttl_seconds)),
            refresh_locks: DashMap::new(),
            refresh_margin: Duration::seconds(config.refresh_margin_seconds),
            revalidate_interval: config
                .revalidate_interval_seconds
                .map(std::time::Duration::from_secs),
            last_validated: DashMap::new(),
        }
    }

    /// Transaction table, for the cleanup task.
    pub fn states(&self) -> StateManager {
        self.states.clone()
    }

    pub fn begin_authorization(
        &self,
        local_user_id: &str,
        redirect_target: Option<String>,
    ) -> AuthorizationRequest {
        let state_token = self.states.create(local_user_id, redirect_target);
        let authorization_url = self.provider.authorization_url(&state_token);

        info!(user_id = %local_user_id, "OAuth authorization started");

        AuthorizationRequest {
            authorization_url,
            state_token,
        }
    }

    /// Redeem a state token and authorization code for a stored credential.
    pub async fn complete_authorization(
        &self,
        state_token: &str,
        authorization_code: &str,
    ) -> BridgeResult<CompletedAuthorization> {
        let txn = self.states.validate_and_consume(state_token).ok_or_else(|| {
            warn!("Invalid, reused, or expired OAuth state");
            BridgeError::new(ErrorKind::InvalidState, "Invalid or expired OAuth state")
        })?;
        let user = txn.local_user_id.as_str();

        let grant = self.provider.exchange_code(authorization_code).await?;
        let team_id = grant.team_id.clone().ok_or_else(|| {
            BridgeError::new(ErrorKind::ExchangeFailed, "Token response missing team id")
        })?;

        let credential = Credential {
            local_user_id: user.to_string(),
            team_id,
            team_name: grant.team_name,
            platform_user_id: grant.platform_user_id,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: grant.scopes,
        };

        {
            let lock = self.refresh_lock(user);
            let _guard = lock.lock().await;
            self.store.upsert(&credential)?;
        }
        self.last_validated.remove(user);

        info!(
            user_id = %user,
            team_id = %credential.team_id,
            has_refresh_token = credential.refresh_token.is_some(),
            "OAuth flow completed"
        );

        Ok(CompletedAuthorization {
            credential,
            redirect_target: txn.redirect_target,
        })
    }

    /// A currently valid access token for the user, refreshing if needed.
    pub async fn get_valid_token(&self, local_user_id: &str) -> BridgeResult<String> {
        let credential = self.load(local_user_id)?;

        if credential.expires_at.is_none() {
            return self.check_non_expiring(credential).await;
        }
        if !credential.expires_within(self.refresh_margin) {
            return Ok(credential.access_token);
        }

        let lock = self.refresh_lock(local_user_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited
        let credential = self.load(local_user_id)?;
        if !credential.expires_within(self.refresh_margin) {
            debug!(user_id = %local_user_id, "Token already refreshed by another task");
            return Ok(credential.access_token);
        }

        self.refresh_locked(credential).await
    }

    /// Refresh after the platform rejected `rejected_token`.
    ///
    /// If the stored token has already moved on, returns it without another
    /// refresh call.
    pub async fn force_refresh(
        &self,
        local_user_id: &str,
        rejected_token: &str,
    ) -> BridgeResult<String> {
        let lock = self.refresh_lock(local_user_id);
        let _guard = lock.lock().await;

        let credential = self.load(local_user_id)?;
        if credential.access_token != rejected_token {
            return Ok(credential.access_token);
        }

        self.refresh_locked(credential).await
    }

    /// Stored credential, if any, without refreshing it.
    pub fn credential(&self, local_user_id: &str) -> BridgeResult<Option<Credential>> {
        Ok(self.store.get(local_user_id)?)
    }

    /// Forget the user's credential (disconnect).
    pub async fn disconnect(&self, local_user_id: &str) -> BridgeResult<bool> {
        let lock = self.refresh_lock(local_user_id);
        let _guard = lock.lock().await;

        let removed = self.store.delete(local_user_id)?;
        self.last_validated.remove(local_user_id);
        // Keep the lock entry while other tasks still wait on it
        self.refresh_locks.remove_if(local_user_id, |_, entry| {
            Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) <= 2
        });
        info!(user_id = %local_user_id, removed, "Slack connection removed");
        Ok(removed)
    }

    fn load(&self, local_user_id: &str) -> BridgeResult<Credential> {
        self.store.get(local_user_id)?.ok_or_else(|| {
            BridgeError::new(
                ErrorKind::NoCredential,
                "Slack not connected. Run the authorization flow and try again.",
            )
        })
    }

    #[cfg(test)]
    pub(crate) fn tracked_users(&self) -> (usize, usize) {
        (self.refresh_locks.len(), self.last_validated.len())
    }

    fn refresh_lock(&self, local_user_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(local_user_id.to_string())
            .or_default()
            .clone()
    }

    /// Caller must hold the user's refresh lock.
    async fn refresh_locked(&self, credential: Credential) -> BridgeResult<String> {
        let refresh_token = credential.refresh_token.clone().ok_or_else(|| {
            BridgeError::new(
                ErrorKind::RefreshFailed,
                "Token cannot be refreshed (no refresh token); re-run authorization",
            )
        })?;

        info!(user_id = %credential.local_user_id, "Refreshing Slack token");

        let grant = self.provider.refresh(&refresh_token).await.map_err(|e| {
            warn!(
                user_id = %credential.local_user_id,
                error = %e,
                "Token refresh failed"
            );
            e
        })?;

        let updated = Credential {
            access_token: grant.access_token,
            // Keep the existing refresh token if the provider did not rotate it
            refresh_token: grant.refresh_token.or(credential.refresh_token),
            expires_at: grant.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: if grant.scopes.is_empty() {
                credential.scopes
            } else {
                grant.scopes
            },
            ..credential
        };

        self.store.upsert(&updated)?;
        self.last_validated.remove(&updated.local_user_id);

        info!(
            user_id = %updated.local_user_id,
            expires_at = ?updated.expires_at,
            "Slack token refreshed"
        );

        Ok(updated.access_token)
    }

    async fn check_non_expiring(&self, credential: Credential) -> BridgeResult<String> {
        let Some(interval) = self.revalidate_interval else {
            return Ok(credential.access_token);
        };

        let user = credential.local_user_id.as_str();
        let fresh = self
            .last_validated
            .get(user)
            .map(|at| at.elapsed() < interval)
            .unwrap_or(false);
        if fresh {
            return Ok(credential.access_token);
        }

        match self.provider.verify(&credential.access_token).await {
            Ok(()) => {
                self.last_validated.insert(user.to_string(), Instant::now());
                Ok(credential.access_token)
            }
            Err(e) if e.kind == ErrorKind::AuthRejected => {
                warn!(user_id = %user, "Non-expiring token no longer valid");
                Err(BridgeError::new(
                    ErrorKind::RefreshFailed,
                    format!("{}; re-run authorization", e.message),
                ))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests;
