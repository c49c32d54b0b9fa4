// End-to-end session tests: SessionEngine → ToolDispatcher → TokenManager →
// SlackClient, with Slack's Web API played by a mockito server.
//
// The engine is driven through in-memory channels exactly as the WebSocket
// handler drives it.

use async_trait::async_trait;
use chatbridge::auth::SessionTokenVerifier;
use chatbridge::config::{OAuthConfig, PlatformConfig};
use chatbridge::credentials::{Credential, CredentialStore, MemoryCredentialStore};
use chatbridge::error::{BridgeError, BridgeResult, ErrorKind};
use chatbridge::oauth::{OAuthProvider, TokenGrant, TokenManager};
use chatbridge::platform::SlackClient;
use chatbridge::session::{Inbound, Outbound, SessionEngine, SessionState};
use chatbridge::tools::ToolDispatcher;
use chrono::Utc;
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const SESSION_SECRET: &str = "integration-test-session-secret";

/// Refreshes always succeed with a fixed new token.
#[derive(Default)]
struct RefreshingSlack {
    refreshes: AtomicUsize,
}

#[async_trait]
impl OAuthProvider for RefreshingSlack {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://slack.test/oauth/v2/authorize?state={}", state)
    }

    async fn exchange_code(&self, _code: &str) -> BridgeResult<TokenGrant> {
        Err(BridgeError::new(ErrorKind::ExchangeFailed, "not scripted"))
    }

    async fn refresh(&self, _refresh_token: &str) -> BridgeResult<TokenGrant> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: "xoxe.xoxb-new".to_string(),
            refresh_token: Some("xoxe-1-rotated".to_string()),
            expires_in: Some(43200),
            team_id: None,
            team_name: None,
            platform_user_id: None,
            scopes: Vec::new(),
        })
    }

    async fn verify(&self, _access_token: &str) -> BridgeResult<()> {
        Ok(())
    }
}

fn credential(user: &str) -> Credential {
    Credential {
        local_user_id: user.to_string(),
        team_id: "T1".to_string(),
        team_name: Some("Acme".to_string()),
        platform_user_id: Some("U123".to_string()),
        access_token: "xoxe.xoxb-old".to_string(),
        refresh_token: Some("xoxe-1-refresh".to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::hours(6)),
        scopes: vec!["chat:write".to_string(), "channels:read".to_string()],
    }
}

struct Session {
    inbound: mpsc::Sender<Inbound>,
    outbound: mpsc::Receiver<Outbound>,
    handle: JoinHandle<SessionEngine>,
    provider: Arc<RefreshingSlack>,
    verifier: SessionTokenVerifier,
}

impl Session {
    fn open(slack_url: &str) -> Self {
        let store = Arc::new(MemoryCredentialStore::new());
        store.upsert(&credential("alice")).unwrap();

        let provider = Arc::new(RefreshingSlack::default());
        let tokens = Arc::new(TokenManager::new(
            store,
            provider.clone(),
            &OAuthConfig::default(),
        ));
        let platform_config = PlatformConfig {
            timeout_seconds: 5,
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_seconds: 1,
        };
        let platform = Arc::new(SlackClient::new(slack_url, &platform_config).unwrap());
        let dispatcher = Arc::new(ToolDispatcher::new(tokens, platform, 0));
        let verifier = SessionTokenVerifier::new(SESSION_SECRET).unwrap();

        let mut engine = SessionEngine::new(Arc::new(verifier.clone()), dispatcher);
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            engine.run(ReceiverStream::new(in_rx), out_tx).await;
            engine
        });

        Self {
            inbound: in_tx,
            outbound: out_rx,
            handle,
            provider,
            verifier,
        }
    }

    async fn send(&self, msg: Value) {
        self.inbound.send(Inbound::Text(msg.to_string())).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("timed out waiting for server frame");
        match frame {
            Some(Outbound::Message(msg)) => serde_json::to_value(msg).unwrap(),
            other => panic!("expected message, got {:?}", other),
        }
    }

    async fn authenticate(&mut self, user: &str) {
        let token = self
            .verifier
            .issue(user, chrono::Duration::minutes(5))
            .unwrap();
        self.send(json!({"type": "auth", "credential": token})).await;
        assert_eq!(self.recv().await["type"], "auth_ok");
    }
}

// ── Handshake ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expired_session_token_rejected() {
    let server = Server::new_async().await;
    let mut session = Session::open(&server.url());
    let expired = session
        .verifier
        .issue("alice", chrono::Duration::seconds(-60))
        .unwrap();

    session
        .send(json!({"type": "auth", "credential": expired}))
        .await;
    let reply = session.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "Unauthenticated");

    let engine = session.handle.await.unwrap();
    assert_eq!(engine.state(), SessionState::Closed);
}

// ── Tool calls against Slack ─────────────────────────────────────────────────

#[tokio::test]
async fn test_list_channels_scenario() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/conversations.list")
        .match_header("authorization", "Bearer xoxe.xoxb-old")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"ok":true,"channels":[{"id":"C1","name":"general","is_member":true}],
                "response_metadata":{"next_cursor":""}}"#,
        )
        .create_async()
        .await;

    let mut session = Session::open(&server.url());
    session.authenticate("alice").await;
    session
        .send(json!({"type": "tool_call", "request_id": "r1", "tool": "list_channels", "arguments": {}}))
        .await;

    let reply = session.recv().await;
    assert_eq!(
        reply,
        json!({
            "type": "tool_result",
            "request_id": "r1",
            "ok": true,
            "payload": [{"id": "C1", "name": "general", "is_member": true, "is_private": false}]
        })
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_send_message_rejected_once_sends_exactly_once() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/chat.postMessage")
        .match_header("authorization", "Bearer xoxe.xoxb-old")
        .expect(1)
        .with_status(200)
        .with_body(r#"{"ok":false,"error":"invalid_auth"}"#)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/chat.postMessage")
        .match_header("authorization", "Bearer xoxe.xoxb-new")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("channel".into(), "C1".into()),
            Matcher::UrlEncoded("text".into(), "hi".into()),
        ]))
        .expect(1)
        .with_status(200)
        .with_body(r#"{"ok":true,"channel":"C1","ts":"1700000003.000001"}"#)
        .create_async()
        .await;

    let mut session = Session::open(&server.url());
    session.authenticate("alice").await;
    session
        .send(json!({"type": "tool_call", "request_id": "s1", "tool": "send_message",
                     "arguments": {"channel_id": "C1", "text": "hi"}}))
        .await;

    let reply = session.recv().await;
    assert_eq!(reply["request_id"], "s1");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["payload"]["channel_id"], "C1");
    assert_eq!(reply["payload"]["ts"], "1700000003.000001");
    assert_eq!(session.provider.refreshes.load(Ordering::SeqCst), 1);

    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_rate_limited_history_retried_transparently() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/conversations.history")
        .match_query(Matcher::Any)
        .expect(1)
        .with_status(429)
        .with_header("retry-after", "0")
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/conversations.history")
        .match_query(Matcher::UrlEncoded("channel".into(), "C1".into()))
        .expect(1)
        .with_status(200)
        .with_body(
            r#"{"ok":true,"messages":[
                {"ts":"1700000001.000001","user":"U1","text":"first"},
                {"ts":"1700000002.000001","user":"U2","text":"second"}
            ]}"#,
        )
        .create_async()
        .await;

    let mut session = Session::open(&server.url());
    session.authenticate("alice").await;
    session
        .send(json!({"type": "tool_call", "request_id": "h1", "tool": "fetch_history",
                     "arguments": {"channel_id": "C1"}}))
        .await;

    let reply = session.recv().await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["payload"]["messages"][0]["text"], "second");
    assert_eq!(reply["payload"]["messages"][1]["text"], "first");
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_platform_error_reported_and_session_continues() {
    let mut server = Server::new_async().await;
    let _missing = server
        .mock("GET", "/conversations.history")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"ok":false,"error":"channel_not_found"}"#)
        .create_async()
        .await;
    let _channels = server
        .mock("GET", "/conversations.list")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"ok":true,"channels":[]}"#)
        .create_async()
        .await;

    let mut session = Session::open(&server.url());
    session.authenticate("alice").await;

    session
        .send(json!({"type": "tool_call", "request_id": "h1", "tool": "fetch_history",
                     "arguments": {"channel_id": "CNOPE"}}))
        .await;
    let reply = session.recv().await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["kind"], "InvalidArgument");
    assert!(reply["message"].as_str().unwrap().contains("channel_not_found"));

    session
        .send(json!({"type": "tool_call", "request_id": "l1", "tool": "list_channels"}))
        .await;
    let reply = session.recv().await;
    assert_eq!(reply["request_id"], "l1");
    assert_eq!(reply["payload"], json!([]));
}

#[tokio::test]
async fn test_unknown_tool_and_bad_arguments_skip_slack() {
    let mut server = Server::new_async().await;
    let untouched = server
        .mock("POST", "/chat.postMessage")
        .expect(0)
        .create_async()
        .await;

    let mut session = Session::open(&server.url());
    session.authenticate("alice").await;

    session
        .send(json!({"type": "tool_call", "request_id": "x1", "tool": "kick_user", "arguments": {}}))
        .await;
    assert_eq!(session.recv().await["kind"], "UnknownTool");

    session
        .send(json!({"type": "tool_call", "request_id": "x2", "tool": "send_message",
                     "arguments": {"channel_id": "C1", "text": ""}}))
        .await;
    assert_eq!(session.recv().await["kind"], "InvalidArgument");

    untouched.assert_async().await;
}

#[tokio::test]
async fn test_user_without_credential_gets_no_credential() {
    let server = Server::new_async().await;
    let mut session = Session::open(&server.url());
    session.authenticate("bob").await;

    session
        .send(json!({"type": "tool_call", "request_id": "r1", "tool": "list_channels"}))
        .await;
    let reply = session.recv().await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["kind"], "NoCredential");

    // Not force-closed: list_tools still answered
    session
        .send(json!({"type": "list_tools", "request_id": "t1"}))
        .await;
    assert_eq!(session.recv().await["type"], "tools");
}
