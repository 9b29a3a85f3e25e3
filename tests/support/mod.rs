//! Shared test infrastructure: an in-process mock backend (WebSocket
//! proxy + helpers) and scripted fakes for the peer/media capabilities.

// Allow dead code in test infrastructure - not every test binary uses
// every helper
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use echo_session::events::EventStream;
use echo_session::transport::{
    IceState, LocalMediaTrack, MediaKind, MediaSource, PeerConnector, PeerEvent, PeerHandle,
    PlaybackSink, RemoteMediaTrack, TransportError,
};
use echo_session::{Message, MessageRole, SessionConfig};

const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Mock backend (WebSocket proxy)
// =============================================================================

enum Directive {
    Frame(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

/// One accepted WebSocket connection, scriptable from the test body.
pub struct BackendConn {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Directive>,
}

impl BackendConn {
    /// Next client envelope, parsed as JSON.
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a client envelope")
            .expect("client connection ended")
    }

    /// Push a server frame to the client.
    pub fn send_json(&self, value: Value) {
        self.outgoing
            .send(Directive::Frame(value.to_string()))
            .expect("backend connection task ended");
    }

    /// Push a binary frame to the client.
    pub fn send_binary(&self, payload: Vec<u8>) {
        self.outgoing
            .send(Directive::Binary(payload))
            .expect("backend connection task ended");
    }

    /// Close the connection with the given code and reason.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Directive::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

/// In-process stand-in for the backend realtime proxy.
pub struct MockBackend {
    addr: SocketAddr,
    connections: Mutex<mpsc::UnboundedReceiver<BackendConn>>,
    accepted: Arc<AtomicUsize>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let accepted_counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                accepted_counter.fetch_add(1, Ordering::SeqCst);
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                tokio::spawn(serve_connection(ws, in_tx, out_rx));
                let _ = conn_tx.send(BackendConn {
                    incoming: in_rx,
                    outgoing: out_tx,
                });
            }
        });

        Self {
            addr,
            connections: Mutex::new(conn_rx),
            accepted,
        }
    }

    /// Backend base URL to put into a [`SessionConfig`]. The derived
    /// WebSocket URL lands on this same listener.
    pub fn backend_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.backend_url())
    }

    /// Wait for the next accepted connection.
    pub async fn next_conn(&self) -> BackendConn {
        timeout(WAIT, async { self.connections.lock().await.recv().await })
            .await
            .expect("timed out waiting for a backend connection")
            .expect("backend accept loop ended")
    }

    /// Number of completed WebSocket handshakes.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    in_tx: mpsc::UnboundedSender<Value>,
    mut out_rx: mpsc::UnboundedReceiver<Directive>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = in_tx.send(value);
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    // complete the closing handshake
                    let _ = write.send(WsMessage::Close(frame)).await;
                    break;
                }
                None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            directive = out_rx.recv() => match directive {
                Some(Directive::Frame(text)) => {
                    if write.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Directive::Binary(payload)) => {
                    if write.send(WsMessage::Binary(payload.into())).await.is_err() {
                        break;
                    }
                }
                Some(Directive::Close { code, reason }) => {
                    let _ = write
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await;
                    // drain until the close handshake completes
                    while let Some(frame) = read.next().await {
                        if matches!(frame, Ok(WsMessage::Close(_)) | Err(_)) {
                            break;
                        }
                    }
                    break;
                }
                None => break,
            },
        }
    }
}

/// An endpoint that accepts TCP but never answers the WebSocket handshake.
pub async fn hanging_backend_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                // keep the socket open forever, never respond
                Ok((stream, _)) => std::mem::forget(stream),
                Err(_) => break,
            }
        }
    });
    format!("http://{addr}")
}

/// An endpoint nothing listens on; connects fail immediately.
pub async fn dead_backend_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// =============================================================================
// Scripted fakes for the audio capabilities
// =============================================================================

fn opus_track(id: &str) -> LocalMediaTrack {
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        "audio".to_owned(),
        id.to_owned(),
    ));
    LocalMediaTrack::new(id, track as Arc<dyn TrackLocal + Send + Sync>)
}

/// Microphone stand-in with scriptable permission handling.
#[derive(Default)]
pub struct FakeMediaSource {
    pub deny: AtomicBool,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
}

impl FakeMediaSource {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        let source = Self::default();
        source.deny.store(true, Ordering::SeqCst);
        Arc::new(source)
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self) -> Result<Vec<LocalMediaTrack>, TransportError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(TransportError::Media("permission denied".into()));
        }
        Ok(vec![opus_track("fake-mic")])
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Peer connection stand-in; tests drive ICE and track events through it.
#[derive(Default)]
pub struct FakePeerConnector {
    pub fail_create: AtomicBool,
    pub created: AtomicUsize,
    current: parking_lot::Mutex<Option<(mpsc::UnboundedSender<PeerEvent>, Arc<FakePeerHandle>)>>,
}

impl FakePeerConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn send_ice(&self, state: IceState) {
        let guard = self.current.lock();
        let (events, _) = guard.as_ref().expect("no peer created yet");
        events
            .send(PeerEvent::Ice(state))
            .expect("peer event channel closed");
    }

    pub fn send_remote_audio_track(&self) {
        let guard = self.current.lock();
        let (events, _) = guard.as_ref().expect("no peer created yet");
        events
            .send(PeerEvent::Track(RemoteMediaTrack::detached(
                "remote-0",
                MediaKind::Audio,
            )))
            .expect("peer event channel closed");
    }

    pub fn handle(&self) -> Arc<FakePeerHandle> {
        let guard = self.current.lock();
        let (_, handle) = guard.as_ref().expect("no peer created yet");
        Arc::clone(handle)
    }
}

#[async_trait]
impl PeerConnector for FakePeerConnector {
    async fn create_peer(
        &self,
        _tracks: &[LocalMediaTrack],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("peer construction refused".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(FakePeerHandle::default());
        *self.current.lock() = Some((events, Arc::clone(&handle)));
        Ok(handle)
    }
}

#[derive(Default)]
pub struct FakePeerHandle {
    pub fail_offer: AtomicBool,
    pub applied_answer: parking_lot::Mutex<Option<String>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl PeerHandle for FakePeerHandle {
    async fn create_offer(&self) -> Result<String, TransportError> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("offer refused".into()));
        }
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n".to_owned())
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), TransportError> {
        *self.applied_answer.lock() = Some(sdp.to_owned());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Playback stand-in with scriptable failure.
#[derive(Default)]
pub struct FakePlaybackSink {
    pub fail: AtomicBool,
    pub played: parking_lot::Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl FakePlaybackSink {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }
}

#[async_trait]
impl PlaybackSink for FakePlaybackSink {
    async fn play(&self, track: RemoteMediaTrack) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Media("playback refused".into()));
        }
        self.played.lock().push(track.id().to_owned());
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Assertion helpers
// =============================================================================

/// Wait until a watched flag reaches `expected`.
pub async fn wait_flag(rx: &mut watch::Receiver<bool>, expected: bool) {
    timeout(WAIT, async {
        loop {
            if *rx.borrow_and_update() == expected {
                return;
            }
            rx.changed().await.expect("flag channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for flag to become {expected}"));
}

/// Next event on any session stream.
pub async fn next_event<T: Clone>(stream: &mut EventStream<T>) -> T {
    timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Next message on a session stream.
pub async fn next_message(stream: &mut EventStream<Message>) -> Message {
    next_event(stream).await
}

/// Skip ahead to the next system message containing `needle`.
pub async fn expect_system_containing(stream: &mut EventStream<Message>, needle: &str) -> Message {
    timeout(WAIT, async {
        loop {
            let message = stream.next().await.expect("message stream closed");
            if message.role == MessageRole::System && message.content.contains(needle) {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for a system message containing {needle:?}"))
}

/// Drain whatever is already buffered on a message stream.
pub fn drain_messages(stream: &mut EventStream<Message>) -> Vec<Message> {
    let mut drained = Vec::new();
    while let Some(message) = stream.try_next() {
        drained.push(message);
    }
    drained
}
