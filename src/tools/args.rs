use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::platform::ts_key;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const LIST_CHANNELS: &str = "list_channels";
pub const FETCH_HISTORY: &str = "fetch_history";
pub const SEND_MESSAGE: &str = "send_message";

const MAX_LIMIT: u32 = 1000;

fn default_channel_limit() -> u32 {
    100
}

fn default_history_limit() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListChannelsArgs {
    #[serde(default = "default_channel_limit")]
    pub limit: u32,
    #[serde(default)]
    pub include_private: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchHistoryArgs {
    pub channel_id: String,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Slack timestamp; only messages after it
    #[serde(default)]
    pub oldest: Option<String>,
    /// Slack timestamp; only messages before it
    #[serde(default)]
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageArgs {
    pub channel_id: String,
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_broadcast: bool,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    ListChannels(ListChannelsArgs),
    FetchHistory(FetchHistoryArgs),
    SendMessage(SendMessageArgs),
}

impl ToolCall {
    /// Resolve `tool_name` against the registry and validate `arguments`.
    pub fn parse(tool_name: &str, arguments: &Value) -> BridgeResult<Self> {
        let call = match tool_name {
            LIST_CHANNELS => Self::ListChannels(decode(tool_name, arguments)?),
            FETCH_HISTORY => Self::FetchHistory(decode(tool_name, arguments)?),
            SEND_MESSAGE => Self::SendMessage(decode(tool_name, arguments)?),
            other => {
                return Err(BridgeError::new(
                    ErrorKind::UnknownTool,
                    format!("Unknown tool: {}", other),
                ))
            }
        };
        call.validate()?;
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListChannels(_) => LIST_CHANNELS,
            Self::FetchHistory(_) => FETCH_HISTORY,
            Self::SendMessage(_) => SEND_MESSAGE,
        }
    }

    fn validate(&self) -> BridgeResult<()> {
        match self {
            Self::ListChannels(args) => check_limit(args.limit),
            Self::FetchHistory(args) => {
                require_non_empty("channel_id", &args.channel_id)?;
                check_limit(args.limit)?;
                check_time_window(args.oldest.as_deref(), args.latest.as_deref())
            }
            Self::SendMessage(args) => {
                require_non_empty("channel_id", &args.channel_id)?;
                require_non_empty("text", &args.text)?;
                if args.reply_broadcast && args.thread_ts.is_none() {
                    return Err(BridgeError::invalid_argument(
                        "reply_broadcast requires thread_ts",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Missing or `null` arguments are treated as an empty object.
fn decode<T: DeserializeOwned>(tool_name: &str, arguments: &Value) -> BridgeResult<T> {
    let value = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments.clone()
    };
    serde_json::from_value(value).map_err(|e| {
        BridgeError::invalid_argument(format!("Invalid arguments for {}: {}", tool_name, e))
    })
}

fn check_limit(limit: u32) -> BridgeResult<()> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(BridgeError::invalid_argument(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )))
    }
}

/// `<seconds>[.<sequence>]`, digits only.
fn is_slack_ts(value: &str) -> bool {
    let (secs, seq) = value.split_once('.').unwrap_or((value, "0"));
    !secs.is_empty()
        && !seq.is_empty()
        && secs.bytes().all(|b| b.is_ascii_digit())
        && seq.bytes().all(|b| b.is_ascii_digit())
}

fn check_time_window(oldest: Option<&str>, latest: Option<&str>) -> BridgeResult<()> {
    for (field, value) in [("oldest", oldest), ("latest", latest)] {
        if let Some(v) = value {
            if !is_slack_ts(v) {
                return Err(BridgeError::invalid_argument(format!(
                    "{} must be a Slack timestamp, got {:?}",
                    field, v
                )));
            }
        }
    }
    if let (Some(oldest), Some(latest)) = (oldest, latest) {
        if ts_key(oldest) > ts_key(latest) {
            return Err(BridgeError::invalid_argument("oldest must not be after latest"));
        }
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> BridgeResult<()> {
    if value.trim().is_empty() {
        Err(BridgeError::invalid_argument(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

/// Registry entry advertised by `list_tools`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: LIST_CHANNELS,
            description: "List Slack channels visible to the connected user",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT, "default": 100},
                    "include_private": {"type": "boolean", "default": false}
                },
                "additionalProperties": false
            }),
        },
        ToolDescriptor {
            name: FETCH_HISTORY,
            description: "Fetch recent messages from a channel, most recent first",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT, "default": 10},
                    "cursor": {"type": "string"},
                    "oldest": {"type": "string", "description": "Only messages after this Slack timestamp"},
                    "latest": {"type": "string", "description": "Only messages before this Slack timestamp"}
                },
                "required": ["channel_id"],
                "additionalProperties": false
            }),
        },
        ToolDescriptor {
            name: SEND_MESSAGE,
            description: "Post a message to a channel, optionally as a thread reply",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "channel_id": {"type": "string"},
                    "text": {"type": "string"},
                    "thread_ts": {"type": "string"},
                    "reply_broadcast": {"type": "boolean", "default": false}
                },
                "required": ["channel_id", "text"],
                "additionalProperties": false
            }),
        },
    ]
}
