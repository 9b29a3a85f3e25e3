//! Session-level error types.
//!
//! Failures inside a transport are contained there: they surface to the UI
//! as system messages plus a state transition, and to the caller of the
//! operation that triggered them as a [`SessionError`]. Nothing in this
//! crate panics on a transport failure.

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::signaling::SignalingError;
use crate::transport::TransportError;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The supplied configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Voice was disabled in the widget configuration
    #[error("voice is disabled in the widget configuration")]
    VoiceDisabled,

    /// Microphone capture was denied or unavailable
    #[error("microphone capture failed: {0}")]
    Media(TransportError),

    /// Peer setup or SDP handling failed
    #[error("negotiation failed: {0}")]
    Negotiation(TransportError),

    /// The HTTP offer/answer exchange failed
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// The signaling answer did not look like usable SDP
    #[error("invalid SDP answer received from server")]
    InvalidAnswer,

    /// The WebSocket connection did not open in time
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// A transport-level send or connect failure
    #[error("transport failure: {0}")]
    Transport(TransportError),

    /// The bounded reconnect budget was spent without reaching the backend
    #[error("unable to connect after repeated attempts")]
    ReconnectExhausted,
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
