//! Transport capability traits.
//!
//! The session state machines never talk to a socket, a peer connection or
//! a microphone directly. They drive the minimal capabilities defined here,
//! which lets the connection logic run unchanged against the real
//! implementations ([`ws::WsConnector`], [`rtc::RtcPeerConnector`]) or
//! against scripted fakes in tests.
//!
//! Event delivery is push-based: a connector is handed the sending half of
//! an unbounded channel and forwards transport events in arrival order.
//! Handlers on the consuming side re-check that the resource an event
//! belongs to is still the current one before acting on it.

pub mod rtc;
pub mod ws;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Establishing the connection failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// Sending on an established connection failed
    #[error("send failed: {0}")]
    Send(String),

    /// Closing the connection failed
    #[error("close failed: {0}")]
    Close(String),

    /// Peer setup or SDP handling failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Media capture or playback failed
    #[error("media failed: {0}")]
    Media(String),
}

// =============================================================================
// Text socket capability
// =============================================================================

/// Events forwarded from an open socket, in arrival order.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A text frame
    Text(String),
    /// A binary frame; only the length is reported, the payload is rejected
    Binary(usize),
    /// A transport error; the socket is unusable afterwards
    Error(String),
    /// The socket closed. `clean` is true for a normal closure handshake.
    Closed { code: u16, reason: String, clean: bool },
}

/// Opens WebSocket connections.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Connect to `url` and forward inbound events through `events`.
    /// Resolves once the connection is open.
    async fn connect(
        &self,
        url: &str,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<Arc<dyn SocketHandle>, TransportError>;
}

/// An open socket connection.
#[async_trait]
pub trait SocketHandle: Send + Sync {
    /// Whether the connection is still open.
    fn is_open(&self) -> bool;

    /// Send a text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection with the given code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}

// =============================================================================
// Peer connection capability
// =============================================================================

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// ICE connectivity states reported by a peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for IceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceState::New => "new",
            IceState::Checking => "checking",
            IceState::Connected => "connected",
            IceState::Completed => "completed",
            IceState::Disconnected => "disconnected",
            IceState::Failed => "failed",
            IceState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// A locally captured media track, ready to attach to a peer connection.
#[derive(Clone)]
pub struct LocalMediaTrack {
    id: String,
    inner: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalMediaTrack {
    pub fn new(id: impl Into<String>, inner: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            id: id.into(),
            inner,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The underlying track to hand to a peer connection.
    pub fn as_webrtc(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.inner)
    }
}

impl fmt::Debug for LocalMediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaTrack").field("id", &self.id).finish()
    }
}

/// A media track received from the remote peer.
///
/// Real peer transports attach the RTP source so a playback sink can pull
/// samples; detached tracks carry metadata only.
#[derive(Clone)]
pub struct RemoteMediaTrack {
    id: String,
    kind: MediaKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteMediaTrack {
    /// A track without an RTP source, for transports that cannot expose one.
    pub fn detached(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            rtp: None,
        }
    }

    /// A track backed by a live RTP receiver.
    pub fn with_rtp(id: impl Into<String>, kind: MediaKind, rtp: Arc<TrackRemote>) -> Self {
        Self {
            id: id.into(),
            kind,
            rtp: Some(rtp),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// The RTP source, when the transport exposes one.
    pub fn rtp(&self) -> Option<&Arc<TrackRemote>> {
        self.rtp.as_ref()
    }
}

impl fmt::Debug for RemoteMediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Events forwarded from a peer connection, in arrival order.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// ICE connectivity changed
    Ice(IceState),
    /// The remote side added a media track
    Track(RemoteMediaTrack),
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer connection with the given local tracks attached and
    /// forward its events through `events`.
    async fn create_peer(
        &self,
        tracks: &[LocalMediaTrack],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, TransportError>;
}

/// A live peer connection.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Create a local SDP offer and install it as the local description.
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Install the remote SDP answer.
    async fn apply_answer(&self, sdp: &str) -> Result<(), TransportError>;

    /// Tear the connection down. Never fails; close errors are logged.
    async fn close(&self);
}

// =============================================================================
// Media capture and playback
// =============================================================================

/// Captures local media. Acquisition is the suspension point where the host
/// prompts for microphone permission; it resolves once capture is granted
/// and fails when it is denied or unavailable.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire the local capture track(s).
    async fn acquire(&self) -> Result<Vec<LocalMediaTrack>, TransportError>;

    /// Stop capture and release the device. Safe to call when nothing is
    /// captured.
    async fn release(&self);
}

/// Plays remote audio. Implemented by the embedding host; a playback
/// failure is surfaced to the user but never terminates the session.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Start playing the given remote track.
    async fn play(&self, track: RemoteMediaTrack) -> Result<(), TransportError>;

    /// Stop playback and detach any current track.
    async fn stop(&self);
}
