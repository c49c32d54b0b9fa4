//! Slack Web API access.
//!
//! Every call takes the access token explicitly; nothing here caches
//! credentials. Failures are classified into the bridge taxonomy and
//! `Transient` / `RateLimited` are retried by [`RetryPolicy`].

mod client;
mod retry;

pub use client::SlackClient;
pub use retry::RetryPolicy;

use crate::error::BridgeResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Slack timestamp, `<seconds>.<sequence>`
    pub ts: String,
    /// Absent for bot and system messages
    pub user_id: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Most recent first
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub ts: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

/// Options for `list_channels`
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelQuery {
    /// Stop paging once this many channels are collected
    pub limit: u32,
    pub include_private: bool,
}

impl Default for ChannelQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            include_private: false,
        }
    }
}

/// Options for `fetch_history`
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    /// Total messages to collect, paging as needed
    pub limit: u32,
    pub cursor: Option<String>,
    /// Only messages after this Slack timestamp
    pub oldest: Option<String>,
    /// Only messages before this Slack timestamp
    pub latest: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            cursor: None,
            oldest: None,
            latest: None,
        }
    }
}

/// A message to post.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingMessage {
    pub channel_id: String,
    pub text: String,
    /// Reply in this thread
    pub thread_ts: Option<String>,
    /// Also show a thread reply in the channel
    pub reply_broadcast: bool,
}

/// Platform operations used by the tool dispatcher.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn list_channels(&self, token: &str, query: &ChannelQuery) -> BridgeResult<Vec<Channel>>;

    async fn fetch_history(
        &self,
        token: &str,
        channel_id: &str,
        query: &HistoryQuery,
    ) -> BridgeResult<HistoryPage>;

    async fn send_message(&self, token: &str, message: &OutgoingMessage) -> BridgeResult<MessageRef>;
}

/// Order key for a Slack `ts`: whole seconds, then the sequence suffix.
/// Unparseable parts sort as zero.
pub(crate) fn ts_key(ts: &str) -> (u64, u64) {
    let (secs, seq) = ts.split_once('.').unwrap_or((ts, "0"));
    (secs.parse().unwrap_or(0), seq.parse().unwrap_or(0))
}

/// Sort most-recent-first; equal timestamps keep their original order.
pub(crate) fn sort_most_recent_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| ts_key(&b.ts).cmp(&ts_key(&a.ts)));
}
