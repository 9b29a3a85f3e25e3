//! Realtime session core for the Echo embeddable assistant widget.
//!
//! This crate implements the session-management layer that sits between a
//! chat UI and its backend: a WebRTC audio session for voice conversation
//! and a WebSocket text session for typed conversation with a streaming
//! assistant. The two transports are normalized into one ordered,
//! UI-consumable message stream.
//!
//! # Architecture
//!
//! - [`SignalingClient`] performs the HTTP SDP offer/answer exchange.
//! - [`AudioSession`] owns one WebRTC peer connection and drives its
//!   lifecycle state machine.
//! - [`TextSession`] owns one WebSocket connection and drives its lifecycle
//!   and reconnection state machine.
//! - [`MessageRouter`] merges both transports into a single ordered
//!   conversation, coalescing streamed assistant fragments.
//! - [`SessionFacade`] is the widget-facing surface: start/stop controls and
//!   the three observable feeds (listening flag, processing flag, message
//!   stream).
//!
//! The transports are abstracted behind the capability traits in
//! [`transport`], so both state machines can be exercised against fakes
//! without real network or media hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! use echo_session::{SessionConfig, SessionFacade};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::new("https://backend.example.com")
//!         .with_user_id("user-42");
//!
//!     let facade = SessionFacade::new(config, mic_source, speaker_sink).unwrap();
//!     let mut messages = facade.messages();
//!
//!     facade.connect_text().await.unwrap();
//!     facade.send_text("Hello!").await.unwrap();
//!
//!     while let Some(event) = messages.next().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod message;
pub mod transport;

// Re-export commonly used items for convenience
pub use config::{ConfigError, DEFAULT_MODEL, SessionConfig};
pub use core::audio::{AudioSession, AudioState};
pub use core::facade::{SessionFacade, SessionTransports};
pub use core::router::{ChatEntry, ChatEvent, MessageRouter, TranscriptForwarder};
pub use core::signaling::{SignalingClient, SignalingError};
pub use core::text::{ConnectionState, ReconnectPolicy, TextSession};
pub use error::{SessionError, SessionResult};
pub use events::{EventChannel, EventStream, StateFlag};
pub use message::{Message, MessageRole, TransportKind};
