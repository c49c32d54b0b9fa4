//! OAuth transactions keyed by single-use state tokens (CSRF protection).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;

/// A pending authorization started by one local user.
#[derive(Clone, Debug)]
pub struct OAuthTransaction {
    pub state_token: String,
    pub local_user_id: String,
    pub created_at: DateTime<Utc>,
    /// Where to send the browser once the callback completes
    pub redirect_target: Option<String>,
}

/// In-memory transaction table with expiry.
#[derive(Clone)]
pub struct StateManager {
    transactions: Arc<DashMap<String, OAuthTransaction>>,
    ttl: Duration,
}

impl StateManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            transactions: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Record a new transaction and return its state token (256 random bits).
    pub fn create(&self, local_user_id: &str, redirect_target: Option<String>) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state_token = B64URL.encode(bytes);

        self.transactions.insert(
            state_token.clone(),
            OAuthTransaction {
                state_token: state_token.clone(),
                local_user_id: local_user_id.to_string(),
                created_at: Utc::now(),
                redirect_target,
            },
        );

        state_token
    }

    /// Remove the transaction and return it if it had not expired.
    ///
    /// Removal happens first, so a token is spent even when it turns out stale.
    pub fn validate_and_consume(&self, state_token: &str) -> Option<OAuthTransaction> {
        let (_, txn) = self.transactions.remove(state_token)?;

        if Utc::now() - txn.created_at > self.ttl {
            return None;
        }

        Some(txn)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.transactions
            .retain(|_, txn| now - txn.created_at <= self.ttl);
    }

    pub fn count(&self) -> usize {
        self.transactions.len()
    }
}

/// Background task to periodically purge expired transactions
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(
            remaining = manager.count(),
            "OAuth state cleanup complete"
        );
    }
}
