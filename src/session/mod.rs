//! Connection-scoped protocol sessions.
//!
//! A session starts in `Authenticating`; the first frame must be
//! `{"type":"auth"}` with a valid session credential. Once `Active`, every
//! `tool_call` runs as its own task so slow platform calls never block the
//! connection. Closing the transport aborts whatever is still in flight.

pub mod engine;
pub mod protocol;

pub use engine::{Inbound, Outbound, SessionEngine, SessionState};
pub use protocol::{ClientMessage, ServerMessage};
