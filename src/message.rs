//! Chat message model shared by both transports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Typed or transcribed user input
    User,
    /// Assistant output, possibly a streamed fragment
    Assistant,
    /// Status and error notices surfaced to the user
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A single message emitted by a transport session.
///
/// `user` and `system` messages are immutable once created; `assistant`
/// content may still grow while a response streams (see the router's
/// coalescing rules).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SystemTime>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::System, content)
    }

    fn stamped(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(SystemTime::now()),
        }
    }
}

/// Which transport an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Audio,
    Text,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Audio => write!(f, "audio"),
            TransportKind::Text => write!(f, "text"),
        }
    }
}
