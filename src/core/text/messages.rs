//! Envelope types for the realtime text WebSocket.
//!
//! All frames are JSON objects discriminated by their `type` field.
//!
//! Client envelopes (sent to the backend):
//! - `initialize_webrtc` - establish the proxied session, text-only mode
//! - `set_user_id` - announce the configured user identity
//! - `text_message` - one per user-submitted message
//!
//! Server envelopes (received from the backend) mirror the upstream
//! realtime API events the backend proxies through, plus a few frames the
//! proxy itself originates (`connection_closed`, `user_context_loaded`).
//! Unknown `type` values deserialize into [`ServerEnvelope::Unknown`] and
//! are logged, never fatal.

use serde::{Deserialize, Serialize};

// =============================================================================
// Client envelopes (sent to the backend)
// =============================================================================

/// Frames sent to the backend proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    /// Establish the proxied realtime session
    #[serde(rename = "initialize_webrtc")]
    InitializeWebrtc {
        /// Requested response modalities
        modalities: Vec<String>,
    },

    /// Announce the configured user identity
    #[serde(rename = "set_user_id")]
    SetUserId {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// A user-submitted chat message
    #[serde(rename = "text_message")]
    TextMessage { text: String },
}

impl ClientEnvelope {
    /// The initialization envelope for a text-only session.
    pub fn text_only_init() -> Self {
        ClientEnvelope::InitializeWebrtc {
            modalities: vec!["text".to_string()],
        }
    }
}

// =============================================================================
// Server envelopes (received from the backend)
// =============================================================================

/// Session details attached to `session.created`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
}

/// Response details attached to `response.done`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: Option<String>,
}

/// Conversation item details attached to `conversation.item.created`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemInfo {
    #[serde(default)]
    pub id: Option<String>,
}

/// Content part attached to `response.content_part.added`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub content: Option<ContentPartBody>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentPartBody {
    #[serde(default)]
    pub text: Option<String>,
}

/// Frames received from the backend proxy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    /// Proxied session established upstream
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Backend loaded per-user context for a previously announced user id
    #[serde(rename = "user_context_loaded")]
    UserContextLoaded {
        #[serde(default, rename = "userId")]
        user_id: Option<String>,
    },

    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Streamed assistant text fragment
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: Option<String>,
    },

    /// A content part was added to the streaming response
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        #[serde(default)]
        content_part: Option<ContentPart>,
    },

    /// Response generation finished
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseInfo>,
    },

    /// The proxy reports its upstream connection closed
    #[serde(rename = "connection_closed")]
    ConnectionClosed {
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        reason: Option<serde_json::Value>,
    },

    /// An error forwarded by the proxy
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<serde_json::Value>,
    },

    /// Informational; no state change
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: Option<ItemInfo>,
    },

    /// Informational; no state change
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated,

    /// Informational; no state change
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded,

    /// Informational; no state change
    #[serde(rename = "response.output_item.done")]
    OutputItemDone,

    /// Informational; no state change
    #[serde(rename = "response.content_part.done")]
    ContentPartDone,

    /// Any unrecognized `type`; logged and otherwise ignored
    #[serde(other)]
    Unknown,
}

/// Render a loosely typed JSON field as display text.
pub(crate) fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
