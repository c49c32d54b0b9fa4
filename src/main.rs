use anyhow::{Context, Result};
use chatbridge::api::{create_router, AppState};
use chatbridge::auth::SessionTokenVerifier;
use chatbridge::config::load_config;
use chatbridge::credentials::SqliteCredentialStore;
use chatbridge::oauth::{run_state_cleanup, SlackOAuthProvider, TokenManager};
use chatbridge::platform::SlackClient;
use chatbridge::tools::ToolDispatcher;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatbridge=info".into()),
        )
        .init();

    info!("Chatbridge starting...");

    let config_path =
        std::env::var("CHATBRIDGE_CONFIG").unwrap_or_else(|_| "chatbridge.toml".to_string());
    let config = load_config(&config_path)?;

    if config.slack.client_id.is_empty() || config.slack.client_secret.is_empty() {
        warn!("SLACK_CLIENT_ID / SLACK_CLIENT_SECRET not set; OAuth exchanges will fail");
    }

    let encryption_key = std::env::var("CHATBRIDGE_ENCRYPTION_KEY")
        .context("CHATBRIDGE_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let session_secret = std::env::var("CHATBRIDGE_SESSION_SECRET")
        .context("CHATBRIDGE_SESSION_SECRET is required")?;

    info!(
        config = %config_path,
        bind_addr = %config.server.bind_addr,
        database = %config.storage.database_path,
        public_base_url = %config.server.public_base_url,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteCredentialStore::new(&config.storage.database_path, &encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let provider = Arc::new(
        SlackOAuthProvider::new(&config.slack, &config.server, config.platform.timeout())
            .context("Failed to initialize OAuth provider")?,
    );
    let tokens = Arc::new(TokenManager::new(store, provider, &config.oauth));

    let platform = Arc::new(
        SlackClient::new(&config.slack.api_base_url, &config.platform)
            .context("Failed to initialize Slack client")?,
    );
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::clone(&tokens),
        platform,
        config.tools.calls_per_minute,
    ));

    let authenticator = Arc::new(
        SessionTokenVerifier::new(&session_secret).context("Invalid session secret")?,
    );

    tokio::spawn(run_state_cleanup(
        tokens.states(),
        config.oauth.state_cleanup_interval_seconds,
    ));

    let app = create_router(AppState {
        tokens,
        dispatcher,
        authenticator,
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Chatbridge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    info!("Chatbridge stopped");
    Ok(())
}
