// Error taxonomy shared by every layer
pub mod error;

// TOML + environment configuration
pub mod config;

// Encrypted credential storage
pub mod credentials;

// Session credentials for connections and HTTP routes
pub mod auth;

// OAuth authorization and token refresh
pub mod oauth;

// Slack Web API client
pub mod platform;

// Per-user tool call throttle
pub mod rate_limit;

// Tool registry and dispatch
pub mod tools;

// Protocol session state machine
pub mod session;

// HTTP and WebSocket APIs
pub mod api;
