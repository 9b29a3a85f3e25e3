//! Widget-facing session facade.
//!
//! The facade wires the two transport sessions and the router together and
//! exposes the surface the dialog UI consumes: start/stop for voice,
//! connect/send/disconnect for text, and the three observable feeds
//! (listening flag, processing flag, unified message stream). Collaborators
//! are constructor-injected; there is no ambient registry.

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::core::audio::{AudioSession, AudioState};
use crate::core::router::{ChatEntry, ChatEvent, MessageRouter, TranscriptForwarder};
use crate::core::signaling::SignalingClient;
use crate::core::text::TextSession;
use crate::error::SessionResult;
use crate::events::{EventStream, StateFlag};
use crate::message::TransportKind;
use crate::transport::rtc::RtcPeerConnector;
use crate::transport::ws::WsConnector;
use crate::transport::{MediaSource, PeerConnector, PlaybackSink, SocketConnector};

/// Transport implementations injected into a facade.
pub struct SessionTransports {
    pub socket: Arc<dyn SocketConnector>,
    pub peers: Arc<dyn PeerConnector>,
    pub media: Arc<dyn MediaSource>,
    pub playback: Arc<dyn PlaybackSink>,
}

/// The widget's entry point to the realtime session layer.
pub struct SessionFacade {
    audio: Arc<AudioSession>,
    text: Arc<TextSession>,
    router: Arc<MessageRouter>,
    processing: StateFlag<bool>,
}

impl SessionFacade {
    /// Build a facade on the real network transports. Media capture and
    /// playback stay host-supplied: they depend on the embedding
    /// environment's audio devices.
    pub fn new(
        config: SessionConfig,
        media: Arc<dyn MediaSource>,
        playback: Arc<dyn PlaybackSink>,
    ) -> SessionResult<Self> {
        Self::with_transports(
            config,
            SessionTransports {
                socket: Arc::new(WsConnector),
                peers: Arc::new(RtcPeerConnector::default()),
                media,
                playback,
            },
        )
    }

    /// Build a facade with every transport injected.
    pub fn with_transports(
        config: SessionConfig,
        transports: SessionTransports,
    ) -> SessionResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let signaling = Arc::new(SignalingClient::new(Arc::clone(&config)));
        let text = Arc::new(TextSession::new(Arc::clone(&config), transports.socket));
        let audio = Arc::new(AudioSession::new(
            Arc::clone(&config),
            signaling,
            transports.peers,
            transports.media,
            transports.playback,
        ));

        let router = Arc::new(MessageRouter::new(config.welcome_message.as_deref()));
        let text_forwarder: Arc<dyn TranscriptForwarder> = text.clone();
        router.forward_transcripts_to(text_forwarder);
        router.attach(TransportKind::Audio, audio.messages());
        router.attach(TransportKind::Text, text.messages());

        let processing = StateFlag::new(false);
        spawn_processing_combiner(audio.processing(), text.processing(), processing.clone());

        Ok(Self {
            audio,
            text,
            router,
            processing,
        })
    }

    // -------------------------------------------------------------------------
    // Controls
    // -------------------------------------------------------------------------

    /// Start the voice session.
    pub async fn start_audio(&self) -> SessionResult<()> {
        self.audio.start().await
    }

    /// Stop the voice session.
    pub async fn stop_audio(&self) {
        self.audio.stop().await
    }

    /// Open the text conversation transport.
    pub async fn connect_text(&self) -> SessionResult<()> {
        self.text.connect().await
    }

    /// Submit a typed user message.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        self.text.send_text(text).await
    }

    /// Close the text conversation transport.
    pub async fn disconnect_text(&self) {
        self.text.disconnect().await
    }

    /// Tear both transports down.
    pub async fn shutdown(&self) {
        self.audio.stop().await;
        self.text.disconnect().await;
    }

    // -------------------------------------------------------------------------
    // Observable surfaces
    // -------------------------------------------------------------------------

    /// Watch the listening indicator (voice capture active).
    pub fn listening(&self) -> watch::Receiver<bool> {
        self.audio.listening()
    }

    pub fn is_listening(&self) -> bool {
        self.audio.is_listening()
    }

    /// Watch the processing indicator; raised while either transport is
    /// waiting on the assistant.
    pub fn processing(&self) -> watch::Receiver<bool> {
        self.processing.watch()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.get()
    }

    /// Subscribe to the unified conversation stream.
    pub fn messages(&self) -> EventStream<ChatEvent> {
        self.router.subscribe()
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<ChatEntry> {
        self.router.history()
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio.state()
    }

    // -------------------------------------------------------------------------
    // Component access
    // -------------------------------------------------------------------------

    pub fn audio(&self) -> &AudioSession {
        &self.audio
    }

    pub fn text(&self) -> &TextSession {
        &self.text
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }
}

/// Keep the combined processing flag equal to the OR of both transports'.
fn spawn_processing_combiner(
    mut audio: watch::Receiver<bool>,
    mut text: watch::Receiver<bool>,
    combined: StateFlag<bool>,
) {
    tokio::spawn(async move {
        loop {
            let value = *audio.borrow_and_update() || *text.borrow_and_update();
            combined.set(value);
            tokio::select! {
                changed = audio.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = text.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("processing combiner task ended");
    });
}
