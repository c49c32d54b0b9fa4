use crate::auth::SessionAuthenticator;
use crate::error::ErrorKind;
use crate::session::protocol::{salvage_request_id, ClientMessage, ServerMessage};
use crate::tools::{
    tool_descriptors, RequestId, ToolDispatcher, ToolInvocation, ToolOutcome, ToolResult,
};
use chrono::{DateTime, Utc};
use futures::{FutureExt, Stream, StreamExt};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Frame received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Ping(Vec<u8>),
    Close,
    Error(String),
}

/// Frame to write to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Pong(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// What the loop should do after handling a frame.
enum Flow {
    Continue,
    Close,
}

/// Protocol state machine for one connection.
pub struct SessionEngine {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    state: SessionState,
    local_user_id: Option<String>,
    open_requests: HashSet<RequestId>,
    authenticator: Arc<dyn SessionAuthenticator>,
    dispatcher: Arc<ToolDispatcher>,
}

impl SessionEngine {
    pub fn new(
        authenticator: Arc<dyn SessionAuthenticator>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Self {
        Self {
            session_id: Uuid::now_v7(),
            created_at: Utc::now(),
            state: SessionState::Connecting,
            local_user_id: None,
            open_requests: HashSet::new(),
            authenticator,
            dispatcher,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_user_id(&self) -> Option<&str> {
        self.local_user_id.as_deref()
    }

    /// Drive the session until the transport closes or authentication fails.
    ///
    /// In-flight dispatches are aborted on exit; their results are never sent.
    /// Dropping `outbound` on return signals the transport to close.
    pub async fn run<S>(&mut self, mut inbound: S, outbound: mpsc::Sender<Outbound>)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        self.state = SessionState::Authenticating;
        info!(session_id = %self.session_id, "Session opened");

        let mut tasks: JoinSet<ToolResult> = JoinSet::new();

        loop {
            tokio::select! {
                frame = inbound.next() => {
                    let flow = match frame {
                        Some(Inbound::Text(text)) => self.handle_text(&text, &mut tasks, &outbound).await,
                        Some(Inbound::Ping(data)) => send(&outbound, Outbound::Pong(data)).await,
                        Some(Inbound::Close) | None => {
                            debug!(session_id = %self.session_id, "Client disconnected");
                            Flow::Close
                        }
                        Some(Inbound::Error(e)) => {
                            warn!(session_id = %self.session_id, error = %e, "Transport error");
                            Flow::Close
                        }
                    };
                    if let Flow::Close = flow {
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            self.open_requests.remove(&result.request_id);
                            if let Flow::Close = send(&outbound, Outbound::Message(result.into())).await {
                                break;
                            }
                        }
                        Err(e) => error!(session_id = %self.session_id, error = %e, "Dispatch task failed"),
                    }
                }
            }
        }

        self.state = SessionState::Closing;
        if !tasks.is_empty() {
            info!(
                session_id = %self.session_id,
                cancelled = self.open_requests.len(),
                "Cancelling in-flight requests"
            );
        }
        tasks.shutdown().await;
        self.open_requests.clear();
        self.state = SessionState::Closed;

        info!(
            session_id = %self.session_id,
            user_id = ?self.local_user_id,
            duration_ms = (Utc::now() - self.created_at).num_milliseconds(),
            "Session closed"
        );
    }

    async fn handle_text(
        &mut self,
        text: &str,
        tasks: &mut JoinSet<ToolResult>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> Flow {
        let parsed = serde_json::from_str::<ClientMessage>(text);

        if self.state == SessionState::Authenticating {
            return self.authenticate(parsed.ok(), outbound).await;
        }

        let msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Malformed client message");
                let reply = match salvage_request_id(text) {
                    Some(id) => ServerMessage::request_error(id, ErrorKind::InvalidArgument, format!("Malformed message: {}", e)),
                    None => ServerMessage::error(ErrorKind::InvalidArgument, format!("Malformed message: {}", e)),
                };
                return send(outbound, Outbound::Message(reply)).await;
            }
        };

        match msg {
            ClientMessage::Auth { .. } => {
                send_error(outbound, ErrorKind::InvalidArgument, "Session already authenticated").await
            }
            ClientMessage::ListTools { request_id } => {
                send(
                    outbound,
                    Outbound::Message(ServerMessage::Tools {
                        request_id,
                        tools: tool_descriptors(),
                    }),
                )
                .await
            }
            ClientMessage::ToolCall {
                request_id,
                tool,
                arguments,
            } => {
                if !self.open_requests.insert(request_id.clone()) {
                    warn!(session_id = %self.session_id, request_id = %request_id, "Duplicate in-flight request id");
                    let message = format!("request_id {} is already in flight", request_id);
                    return send(
                        outbound,
                        Outbound::Message(ServerMessage::request_error(request_id, ErrorKind::InvalidArgument, message)),
                    )
                    .await;
                }
                self.spawn_dispatch(
                    tasks,
                    ToolInvocation {
                        request_id,
                        tool_name: tool,
                        arguments,
                    },
                );
                Flow::Continue
            }
        }
    }

    async fn authenticate(
        &mut self,
        msg: Option<ClientMessage>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> Flow {
        let user = match msg {
            Some(ClientMessage::Auth { credential }) => self.authenticator.validate(&credential),
            _ => None,
        };

        match user {
            Some(user) => {
                info!(session_id = %self.session_id, user_id = %user, "Session authenticated");
                self.local_user_id = Some(user);
                self.state = SessionState::Active;
                send(
                    outbound,
                    Outbound::Message(ServerMessage::AuthOk {
                        session_id: self.session_id.to_string(),
                    }),
                )
                .await
            }
            None => {
                warn!(session_id = %self.session_id, "Session authentication failed");
                let _ = send_error(outbound, ErrorKind::Unauthenticated, "Invalid or missing session credential").await;
                Flow::Close
            }
        }
    }

    fn spawn_dispatch(&self, tasks: &mut JoinSet<ToolResult>, invocation: ToolInvocation) {
        let Some(user) = self.local_user_id.clone() else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let request_id = invocation.request_id.clone();

        debug!(
            session_id = %self.session_id,
            request_id = %request_id,
            tool = %invocation.tool_name,
            "Dispatching tool call"
        );

        tasks.spawn(async move {
            // A panicking dispatch still answers its own request
            AssertUnwindSafe(dispatcher.dispatch(&user, invocation))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| ToolResult {
                    request_id,
                    outcome: ToolOutcome::Failure {
                        kind: ErrorKind::Internal,
                        message: "Tool call aborted unexpectedly".to_string(),
                    },
                })
        });
    }
}

async fn send(outbound: &mpsc::Sender<Outbound>, frame: Outbound) -> Flow {
    match outbound.send(frame).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Close,
    }
}

async fn send_error(outbound: &mpsc::Sender<Outbound>, kind: ErrorKind, message: impl Into<String>) -> Flow {
    send(outbound, Outbound::Message(ServerMessage::error(kind, message))).await
}
