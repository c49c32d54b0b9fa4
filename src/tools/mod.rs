//! Tool registry and dispatch.
//!
//! `dispatch` validates an invocation, applies the per-user throttle,
//! obtains a token from the [`TokenManager`], and runs exactly one platform
//! operation. An `AuthRejected` from the platform triggers one forced
//! refresh and one retry; a second rejection becomes `Unauthenticated`.

mod args;

pub use args::{
    tool_descriptors, FetchHistoryArgs, ListChannelsArgs, SendMessageArgs, ToolCall,
    ToolDescriptor, FETCH_HISTORY, LIST_CHANNELS, SEND_MESSAGE,
};

use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::oauth::TokenManager;
use crate::platform::{ChannelQuery, ChatPlatform, HistoryQuery, OutgoingMessage};
use crate::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client-chosen correlation id. Strings and numbers are accepted and echoed
/// back exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::Text(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

/// One inbound tool request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub request_id: RequestId,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure { kind: ErrorKind, message: String },
}

/// Reply to exactly one [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub request_id: RequestId,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }
}

pub struct ToolDispatcher {
    tokens: Arc<TokenManager>,
    platform: Arc<dyn ChatPlatform>,
    limiter: RateLimiter,
    calls_per_minute: u64,
}

impl ToolDispatcher {
    pub fn new(
        tokens: Arc<TokenManager>,
        platform: Arc<dyn ChatPlatform>,
        calls_per_minute: u64,
    ) -> Self {
        Self {
            tokens,
            platform,
            limiter: RateLimiter::new(),
            calls_per_minute,
        }
    }

    pub async fn dispatch(&self, local_user_id: &str, invocation: ToolInvocation) -> ToolResult {
        let ToolInvocation {
            request_id,
            tool_name,
            arguments,
        } = invocation;

        let outcome = match self.run(local_user_id, &tool_name, &arguments).await {
            Ok(payload) => {
                debug!(
                    user_id = %local_user_id,
                    request_id = %request_id,
                    tool = %tool_name,
                    "Tool call succeeded"
                );
                ToolOutcome::Success(payload)
            }
            Err(e) => {
                info!(
                    user_id = %local_user_id,
                    request_id = %request_id,
                    tool = %tool_name,
                    kind = %e.kind,
                    error = %e.message,
                    "Tool call failed"
                );
                ToolOutcome::Failure {
                    kind: e.kind,
                    message: e.message,
                }
            }
        };

        ToolResult {
            request_id,
            outcome,
        }
    }

    async fn run(&self, local_user_id: &str, tool_name: &str, arguments: &Value) -> BridgeResult<Value> {
        let call = ToolCall::parse(tool_name, arguments)?;

        self.limiter
            .check_and_consume(local_user_id, self.calls_per_minute)
            .map_err(|wait| {
                BridgeError::rate_limited(Some(wait), "Too many tool calls; slow down")
            })?;

        let token = self.tokens.get_valid_token(local_user_id).await?;

        match self.execute(&call, &token).await {
            Err(e) if e.kind == ErrorKind::AuthRejected => {
                warn!(
                    user_id = %local_user_id,
                    tool = call.name(),
                    "Platform rejected token, forcing refresh"
                );
                let token = self.tokens.force_refresh(local_user_id, &token).await?;
                self.execute(&call, &token).await.map_err(|e| {
                    if e.kind == ErrorKind::AuthRejected {
                        BridgeError::new(
                            ErrorKind::Unauthenticated,
                            format!("Token rejected after refresh: {}", e.message),
                        )
                    } else {
                        e
                    }
                })
            }
            other => other,
        }
    }

    async fn execute(&self, call: &ToolCall, token: &str) -> BridgeResult<Value> {
        match call {
            ToolCall::ListChannels(args) => {
                let query = ChannelQuery {
                    limit: args.limit,
                    include_private: args.include_private,
                };
                to_payload(self.platform.list_channels(token, &query).await?)
            }
            ToolCall::FetchHistory(args) => {
                let query = HistoryQuery {
                    limit: args.limit,
                    cursor: args.cursor.clone(),
                    oldest: args.oldest.clone(),
                    latest: args.latest.clone(),
                };
                to_payload(self.platform.fetch_history(token, &args.channel_id, &query).await?)
            }
            ToolCall::SendMessage(args) => {
                let message = OutgoingMessage {
                    channel_id: args.channel_id.clone(),
                    text: args.text.clone(),
                    thread_ts: args.thread_ts.clone(),
                    reply_broadcast: args.reply_broadcast,
                };
                to_payload(self.platform.send_message(token, &message).await?)
            }
        }
    }
}

fn to_payload<T: Serialize>(value: T) -> BridgeResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| BridgeError::internal(format!("Failed to encode payload: {}", e)))
}
