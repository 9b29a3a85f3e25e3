//! WebSocket text conversation transport.

pub mod messages;
mod session;

pub use messages::{ClientEnvelope, ServerEnvelope};
pub use session::{
    CONNECT_TIMEOUT, ConnectionState, MAX_RECONNECT_ATTEMPTS, ReconnectPolicy, TextSession,
};
