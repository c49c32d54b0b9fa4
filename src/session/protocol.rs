use crate::error::ErrorKind;
use crate::tools::{RequestId, ToolDescriptor, ToolOutcome, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "auth")]
    Auth { credential: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        request_id: RequestId,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    #[serde(rename = "list_tools")]
    ListTools { request_id: RequestId },
}

/// Server → Client message types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_ok")]
    AuthOk { session_id: String },
    #[serde(rename = "error")]
    Error {
        /// Present when the offending frame carried a readable request_id
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        kind: ErrorKind,
        message: String,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        request_id: RequestId,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "tools")]
    Tools {
        request_id: RequestId,
        tools: Vec<ToolDescriptor>,
    },
}

impl ServerMessage {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: None,
            kind,
            message: message.into(),
        }
    }

    /// Error frame correlated to a specific request.
    pub fn request_error(
        request_id: RequestId,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            request_id: Some(request_id),
            kind,
            message: message.into(),
        }
    }
}

/// Best-effort `request_id` from a frame that failed to decode.
pub fn salvage_request_id(text: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(text).ok()?;
    serde_json::from_value(value.get("request_id")?.clone()).ok()
}

impl From<ToolResult> for ServerMessage {
    fn from(result: ToolResult) -> Self {
        match result.outcome {
            ToolOutcome::Success(payload) => Self::ToolResult {
                request_id: result.request_id,
                ok: true,
                payload: Some(payload),
                kind: None,
                message: None,
            },
            ToolOutcome::Failure { kind, message } => Self::ToolResult {
                request_id: result.request_id,
                ok: false,
                payload: None,
                kind: Some(kind),
                message: Some(message),
            },
        }
    }
}
