//! Message normalization and delta coalescing.
//!
//! The router consumes the message streams of both transport sessions and
//! republishes one ordered conversation. Streamed assistant fragments are
//! coalesced: a fragment is appended to the last entry when that entry is
//! assistant-styled, otherwise it opens a new entry. System notices from
//! either transport are surfaced as assistant-styled bubbles so the user
//! sees a single conversational thread, but keep their origin tag. A
//! completed voice transcript (a user message arriving from the audio
//! transport) is treated as if the user had typed it: it is pushed through
//! the text send path, which records and transmits it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::text::TextSession;
use crate::events::{EventChannel, EventStream};
use crate::message::{Message, MessageRole, TransportKind};

/// One entry of the normalized conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    /// Role the entry is rendered with
    pub role: MessageRole,
    /// Role the originating event carried, before styling
    pub source: MessageRole,
    pub content: String,
    pub timestamp: Option<SystemTime>,
}

/// Events republished on the unified conversation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A new entry was appended at `index`
    Added { index: usize, entry: ChatEntry },
    /// Streamed content was coalesced into the entry at `index`;
    /// `content` is the full content after the append
    Appended { index: usize, content: String },
}

/// Send path for completed voice transcripts.
#[async_trait]
pub trait TranscriptForwarder: Send + Sync {
    async fn forward_transcript(&self, text: &str);
}

#[async_trait]
impl TranscriptForwarder for TextSession {
    async fn forward_transcript(&self, text: &str) {
        if let Err(error) = self.send_text(text).await {
            tracing::debug!(%error, "voice transcript send failed");
        }
    }
}

struct Inner {
    history: parking_lot::Mutex<Vec<ChatEntry>>,
    events: EventChannel<ChatEvent>,
    forwarder: parking_lot::Mutex<Option<Arc<dyn TranscriptForwarder>>>,
}

/// Merges transport message streams into one ordered conversation.
pub struct MessageRouter {
    inner: Arc<Inner>,
}

impl MessageRouter {
    /// Create a router, optionally seeding the conversation with a welcome
    /// entry.
    pub fn new(welcome_message: Option<&str>) -> Self {
        let mut history = Vec::new();
        if let Some(welcome) = welcome_message {
            history.push(ChatEntry {
                role: MessageRole::Assistant,
                source: MessageRole::Assistant,
                content: welcome.to_owned(),
                timestamp: Some(SystemTime::now()),
            });
        }
        Self {
            inner: Arc::new(Inner {
                history: parking_lot::Mutex::new(history),
                events: EventChannel::new(),
                forwarder: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Route completed voice transcripts into the given send path.
    pub fn forward_transcripts_to(&self, target: Arc<dyn TranscriptForwarder>) {
        *self.inner.forwarder.lock() = Some(target);
    }

    /// Consume a transport's message stream. Events are processed strictly
    /// in arrival order; the task ends when the stream closes.
    pub fn attach(&self, origin: TransportKind, mut stream: EventStream<Message>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                route(&inner, origin, message).await;
            }
            tracing::debug!(%origin, "transport message stream ended");
        });
    }

    /// Subscribe to the unified conversation stream.
    pub fn subscribe(&self) -> EventStream<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<ChatEntry> {
        self.inner.history.lock().clone()
    }
}

async fn route(inner: &Arc<Inner>, origin: TransportKind, message: Message) {
    match message.role {
        MessageRole::User if origin == TransportKind::Audio => {
            // Completed voice transcript: goes through the typed-send path,
            // which records it and transmits it to the backend
            let forwarder = inner.forwarder.lock().clone();
            match forwarder {
                Some(forwarder) => forwarder.forward_transcript(&message.content).await,
                None => {
                    tracing::warn!("no transcript forwarder attached; dropping voice transcript");
                }
            }
        }
        MessageRole::User => push(inner, MessageRole::User, message),
        MessageRole::Assistant => coalesce(inner, message),
        // Styled as an assistant bubble, tagged with its real origin
        MessageRole::System => push(inner, MessageRole::Assistant, message),
    }
}

fn push(inner: &Arc<Inner>, role: MessageRole, message: Message) {
    let entry = ChatEntry {
        role,
        source: message.role,
        content: message.content,
        timestamp: message.timestamp,
    };
    let index = {
        let mut history = inner.history.lock();
        history.push(entry.clone());
        history.len() - 1
    };
    inner.events.emit(ChatEvent::Added { index, entry });
}

fn coalesce(inner: &Arc<Inner>, message: Message) {
    let event = {
        let mut history = inner.history.lock();
        let len = history.len();
        match history.last_mut() {
            Some(last) if last.role == MessageRole::Assistant => {
                last.content.push_str(&message.content);
                ChatEvent::Appended {
                    index: len - 1,
                    content: last.content.clone(),
                }
            }
            _ => {
                let entry = ChatEntry {
                    role: MessageRole::Assistant,
                    source: MessageRole::Assistant,
                    content: message.content,
                    timestamp: message.timestamp,
                };
                history.push(entry.clone());
                ChatEvent::Added { index: len, entry }
            }
        }
    };
    inner.events.emit(event);
}
