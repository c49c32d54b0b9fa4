//! Per-user Slack credentials and the stores that persist them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenManager (oauth)               │
//! │  - sole writer: exchange + refresh       │
//! └─────────────────────────────────────────┘
//!          ↓ upsert             ↑ get
//! ┌─────────────────────────────────────────┐
//! │       dyn CredentialStore                │
//! │  - SqliteCredentialStore (encrypted)     │
//! │  - MemoryCredentialStore                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! At most one credential exists per (local_user_id, team_id). `get` returns
//! the most recently written one for the user.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::SqliteCredentialStore;

/// Delegated Slack access for one local user in one workspace.
///
/// # Security
/// - Tokens are encrypted at rest by [`SqliteCredentialStore`]
/// - Never serialize this into a protocol reply
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub local_user_id: String,
    /// Slack workspace (team) the token belongs to
    pub team_id: String,
    pub team_name: Option<String>,
    /// Slack user who approved the installation
    pub platform_user_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absent for non-expiring tokens
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl Credential {
    /// True when the token is past expiry or will be within `margin`.
    /// Non-expiring tokens never need a refresh.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + margin,
            None => false,
        }
    }
}

/// Persistence contract consumed by the token lifecycle.
///
/// Implementations must tolerate concurrent upserts for the same key; the
/// per-user refresh lock upstream makes last-write-wins acceptable.
pub trait CredentialStore: Send + Sync {
    fn get(&self, local_user_id: &str) -> Result<Option<Credential>>;

    /// Insert or replace the credential keyed by (local_user_id, team_id).
    fn upsert(&self, credential: &Credential) -> Result<()>;

    /// Remove every credential for the user. Returns whether any existed.
    fn delete(&self, local_user_id: &str) -> Result<bool>;
}

/// In-memory store. Credentials vanish on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    // Per user, ordered oldest write first
    entries: DashMap<String, Vec<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, local_user_id: &str) -> Result<Option<Credential>> {
        Ok(self
            .entries
            .get(local_user_id)
            .and_then(|list| list.last().cloned()))
    }

    fn upsert(&self, credential: &Credential) -> Result<()> {
        let mut list = self
            .entries
            .entry(credential.local_user_id.clone())
            .or_default();
        list.retain(|c| c.team_id != credential.team_id);
        list.push(credential.clone());
        Ok(())
    }

    fn delete(&self, local_user_id: &str) -> Result<bool> {
        Ok(self.entries.remove(local_user_id).is_some())
    }
}

#[cfg(test)]
pub(crate) fn sample_credential(user: &str, team: &str) -> Credential {
    Credential {
        local_user_id: user.to_string(),
        team_id: team.to_string(),
        team_name: Some("Acme".to_string()),
        platform_user_id: Some("U123".to_string()),
        access_token: "xoxe.xoxb-access".to_string(),
        refresh_token: Some("xoxe-1-refresh".to_string()),
        expires_at: Some(Utc::now() + Duration::hours(12)),
        scopes: vec!["chat:write".to_string(), "channels:read".to_string()],
    }
}
