use super::{
    sort_most_recent_first, Channel, ChannelQuery, ChatPlatform, HistoryPage, HistoryQuery,
    Message, MessageRef, OutgoingMessage, RetryPolicy,
};
use crate::config::PlatformConfig;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Largest page requested from `conversations.list`
const CHANNEL_PAGE_MAX: u32 = 200;

/// Largest page requested from `conversations.history`
const HISTORY_PAGE_MAX: u32 = 100;

#[derive(Deserialize, Default)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ConversationsList {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct RawMessage {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Deserialize)]
struct ConversationsHistory {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize, Default)]
struct PostedMessage {
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    channel: String,
    ts: String,
    #[serde(default)]
    message: Option<PostedMessage>,
}

fn next_cursor(meta: Option<ResponseMetadata>) -> Option<String> {
    meta.and_then(|m| m.next_cursor).filter(|c| !c.is_empty())
}

/// HTTP client for the Slack Web API.
pub struct SlackClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl SlackClient {
    /// `base_url` is normally `https://slack.com/api`; tests point it at a mock server.
    pub fn new(base_url: &str, config: &PlatformConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("chatbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Slack HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(config),
        })
    }

    /// One API call with retries for retryable failures.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> BridgeResult<T> {
        self.retry
            .run(endpoint, move || {
                self.call_once(method.clone(), endpoint, token, params)
            })
            .await
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> BridgeResult<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let request = self.http.request(method.clone(), &url).bearer_auth(token);
        let request = if method == Method::GET {
            request.query(params)
        } else {
            request.form(params)
        };

        debug!(endpoint, "Calling Slack API");

        let response = request.send().await.map_err(|e| {
            BridgeError::transient(format!("{} request failed: {}", endpoint, e))
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if !status.is_success() {
            return Err(classify_status(endpoint, status, retry_after));
        }

        let text = response.text().await.map_err(|e| {
            BridgeError::transient(format!("{} response read failed: {}", endpoint, e))
        })?;
        let body: Value = serde_json::from_str(&text).map_err(|e| {
            BridgeError::internal(format!("{} returned malformed JSON: {}", endpoint, e))
        })?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(classify_slack_error(endpoint, code, retry_after));
        }

        serde_json::from_value(body).map_err(|e| {
            BridgeError::internal(format!("{} returned unexpected shape: {}", endpoint, e))
        })
    }
}

/// Map a non-2xx HTTP status to the taxonomy.
fn classify_status(endpoint: &str, status: StatusCode, retry_after: Option<Duration>) -> BridgeError {
    let message = format!("{} returned HTTP {}", endpoint, status);
    match status {
        StatusCode::TOO_MANY_REQUESTS => BridgeError::rate_limited(retry_after, message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BridgeError::new(ErrorKind::AuthRejected, message)
        }
        s if s.is_server_error() => BridgeError::transient(message),
        _ => BridgeError::invalid_argument(message),
    }
}

/// Map a Slack `ok: false` error code to the taxonomy.
fn classify_slack_error(endpoint: &str, code: &str, retry_after: Option<Duration>) -> BridgeError {
    let message = format!("{} failed: {}", endpoint, code);
    match code {
        "ratelimited" | "rate_limited" => BridgeError::rate_limited(retry_after, message),
        "invalid_auth" | "not_authed" | "token_expired" | "token_revoked"
        | "account_inactive" => BridgeError::new(ErrorKind::AuthRejected, message),
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            BridgeError::transient(message)
        }
        _ => BridgeError::invalid_argument(message),
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn list_channels(&self, token: &str, query: &ChannelQuery) -> BridgeResult<Vec<Channel>> {
        let types = if query.include_private {
            "public_channel,private_channel"
        } else {
            "public_channel"
        };
        let limit = query.limit as usize;
        let mut channels: Vec<Channel> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page_size = (limit - channels.len()).min(CHANNEL_PAGE_MAX as usize);
            let mut params = vec![
                ("types", types.to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", page_size.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let page: ConversationsList = self
                .call(Method::GET, "conversations.list", token, &params)
                .await?;
            channels.extend(page.channels);
            cursor = next_cursor(page.response_metadata);

            if channels.len() >= limit || cursor.is_none() {
                break;
            }
        }

        channels.truncate(limit);
        Ok(channels)
    }

    async fn fetch_history(
        &self,
        token: &str,
        channel_id: &str,
        query: &HistoryQuery,
    ) -> BridgeResult<HistoryPage> {
        let limit = query.limit as usize;
        let mut messages: Vec<Message> = Vec::new();
        let mut cursor = query.cursor.clone();

        loop {
            let page_size = (limit - messages.len()).min(HISTORY_PAGE_MAX as usize);
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("limit", page_size.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }
            if let Some(oldest) = &query.oldest {
                params.push(("oldest", oldest.clone()));
            }
            if let Some(latest) = &query.latest {
                params.push(("latest", latest.clone()));
            }

            let page: ConversationsHistory = self
                .call(Method::GET, "conversations.history", token, &params)
                .await?;
            messages.extend(page.messages.into_iter().map(|m| Message {
                ts: m.ts,
                user_id: m.user,
                text: m.text,
                thread_ts: m.thread_ts,
            }));
            cursor = next_cursor(page.response_metadata);

            if messages.len() >= limit || cursor.is_none() {
                break;
            }
            debug!(channel_id, collected = messages.len(), limit, "Following history cursor");
        }

        sort_most_recent_first(&mut messages);
        messages.truncate(limit);

        Ok(HistoryPage {
            messages,
            next_cursor: cursor,
        })
    }

    async fn send_message(&self, token: &str, message: &OutgoingMessage) -> BridgeResult<MessageRef> {
        let mut params = vec![
            ("channel", message.channel_id.clone()),
            ("text", message.text.clone()),
        ];
        if let Some(ts) = &message.thread_ts {
            params.push(("thread_ts", ts.clone()));
            if message.reply_broadcast {
                params.push(("reply_broadcast", "true".to_string()));
            }
        }

        let posted: PostMessageResponse = self
            .call(Method::POST, "chat.postMessage", token, &params)
            .await?;

        Ok(MessageRef {
            ts: posted.ts,
            channel_id: posted.channel,
            thread_ts: posted
                .message
                .and_then(|m| m.thread_ts)
                .or_else(|| message.thread_ts.clone()),
        })
    }
}
