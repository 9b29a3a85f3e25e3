//! WebRTC audio session state machine.
//!
//! One `AudioSession` lives for the whole widget lifetime; each `start`
//! walks the machine from rest to rest: `Idle -> AcquiringMedia ->
//! Negotiating -> IceChecking -> Connected`, with `Failed` as a transient
//! stop on every failure path. `Failed` is never terminal: cleanup runs and
//! the machine returns to `Idle`, so the session is always restartable.
//!
//! `start` returns once signaling completes (the remote answer is applied).
//! ICE connectivity continues in the background and its outcomes arrive
//! through the state and message streams. `stop` is idempotent, callable
//! from any state, and releases the peer connection and capture device on
//! every exit path.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::SessionConfig;
use crate::core::signaling::SignalingClient;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventChannel, EventStream, StateFlag};
use crate::message::Message;
use crate::transport::{
    IceState, LocalMediaTrack, MediaKind, MediaSource, PeerConnector, PeerEvent, PeerHandle,
    PlaybackSink, RemoteMediaTrack,
};

/// How long ICE may stay `disconnected` before the session gives up. The
/// underlying stack has no bound of its own here; without one a session
/// that never recovers would sit half-dead forever.
pub const ICE_RECOVERY_WINDOW: Duration = Duration::from_secs(15);

/// Audio session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Idle,
    AcquiringMedia,
    Negotiating,
    IceChecking,
    Connected,
    Failed,
}

impl fmt::Display for AudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioState::Idle => "Idle",
            AudioState::AcquiringMedia => "AcquiringMedia",
            AudioState::Negotiating => "Negotiating",
            AudioState::IceChecking => "IceChecking",
            AudioState::Connected => "Connected",
            AudioState::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

struct Shared {
    config: Arc<SessionConfig>,
    media: Arc<dyn MediaSource>,
    playback: Arc<dyn PlaybackSink>,
    peer: Mutex<Option<Arc<dyn PeerHandle>>>,
    state: parking_lot::Mutex<AudioState>,
    /// Latest ICE state of the current peer; read by the recovery timer.
    ice: parking_lot::Mutex<IceState>,
    states: EventChannel<AudioState>,
    messages: EventChannel<Message>,
    listening: StateFlag<bool>,
    processing: StateFlag<bool>,
    /// Bumped whenever the peer is created or torn down; callbacks carrying
    /// an older generation belong to a replaced peer and are ignored.
    generation: AtomicU64,
    starting: AtomicBool,
}

impl Shared {
    fn state(&self) -> AudioState {
        *self.state.lock()
    }

    fn set_state(&self, next: AudioState) {
        let mut guard = self.state.lock();
        if *guard != next {
            tracing::debug!(from = %*guard, to = %next, "audio state transition");
            *guard = next;
            drop(guard);
            self.states.emit(next);
        }
    }

    fn current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn system(&self, text: impl Into<String>) {
        self.messages.emit(Message::system(text));
    }

    /// Release every transport resource. Runs on every exit path; each step
    /// proceeds regardless of the previous one failing.
    async fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let peer = self.peer.lock().await.take();
        if let Some(peer) = peer {
            peer.close().await;
        }
        self.media.release().await;
        self.playback.stop().await;
        *self.ice.lock() = IceState::New;
    }

    /// Failure path: surface `Failed`, clean up, return to `Idle`.
    async fn fail_and_reset(&self) {
        self.set_state(AudioState::Failed);
        self.teardown().await;
        self.listening.set(false);
        self.processing.set(false);
        self.set_state(AudioState::Idle);
    }

    /// Orderly or unexpected stop: clean up and return to `Idle`.
    async fn stop_to_idle(&self) {
        self.teardown().await;
        self.listening.set(false);
        self.processing.set(false);
        self.set_state(AudioState::Idle);
    }
}

/// WebRTC session for voice conversation.
pub struct AudioSession {
    signaling: Arc<SignalingClient>,
    peers: Arc<dyn PeerConnector>,
    shared: Arc<Shared>,
}

impl AudioSession {
    pub fn new(
        config: Arc<SessionConfig>,
        signaling: Arc<SignalingClient>,
        peers: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaSource>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            signaling,
            peers,
            shared: Arc::new(Shared {
                config,
                media,
                playback,
                peer: Mutex::new(None),
                state: parking_lot::Mutex::new(AudioState::Idle),
                ice: parking_lot::Mutex::new(IceState::New),
                states: EventChannel::new(),
                messages: EventChannel::new(),
                listening: StateFlag::new(false),
                processing: StateFlag::new(false),
                generation: AtomicU64::new(0),
                starting: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> AudioState {
        self.shared.state()
    }

    /// Subscribe to state transitions.
    pub fn states(&self) -> EventStream<AudioState> {
        self.shared.states.subscribe()
    }

    /// Subscribe to the session's message stream.
    pub fn messages(&self) -> EventStream<Message> {
        self.shared.messages.subscribe()
    }

    /// Watch the listening indicator.
    pub fn listening(&self) -> watch::Receiver<bool> {
        self.shared.listening.watch()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.get()
    }

    /// Watch the processing indicator.
    pub fn processing(&self) -> watch::Receiver<bool> {
        self.shared.processing.watch()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.get()
    }

    /// Start a voice session: capture the microphone, negotiate a peer
    /// connection and apply the remote answer.
    ///
    /// Returns once signaling completes; it does not wait for ICE to
    /// connect. No-op when the session is already active or another start
    /// is in flight.
    pub async fn start(&self) -> SessionResult<()> {
        if !self.shared.config.voice_enabled {
            tracing::warn!("voice is disabled in the configuration");
            return Err(SessionError::VoiceDisabled);
        }
        if self.shared.state() != AudioState::Idle {
            tracing::warn!(state = %self.shared.state(), "audio session already active; ignoring start");
            return Ok(());
        }
        if self.shared.starting.swap(true, Ordering::SeqCst) {
            tracing::warn!("audio start already in flight; ignoring duplicate");
            return Ok(());
        }
        let result = self.run_start().await;
        self.shared.starting.store(false, Ordering::SeqCst);
        result
    }

    /// Stop the session and release all resources. Idempotent; safe to call
    /// from any state. Never preempts an in-flight operation: it clears the
    /// shared context so the operation observes the teardown when it
    /// resumes.
    pub async fn stop(&self) {
        if self.shared.state() == AudioState::Idle && !self.shared.starting.load(Ordering::SeqCst) {
            tracing::debug!("stop called while already idle");
            return;
        }
        tracing::info!("stopping audio session");
        self.shared.stop_to_idle().await;
    }

    async fn run_start(&self) -> SessionResult<()> {
        tracing::info!("starting audio session");
        self.shared.listening.set(true);
        self.shared.processing.set(true);
        self.shared.set_state(AudioState::AcquiringMedia);

        let tracks = match self.shared.media.acquire().await {
            Ok(tracks) => tracks,
            Err(error) => {
                tracing::error!(%error, "microphone capture failed");
                self.shared
                    .system("Error: Microphone access denied or unavailable.");
                self.shared.fail_and_reset().await;
                return Err(SessionError::Media(error));
            }
        };
        tracing::debug!(tracks = tracks.len(), "microphone capture granted");

        self.shared.set_state(AudioState::Negotiating);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match self.negotiate(generation, &tracks).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Stopped mid-negotiation; teardown already ran elsewhere
                tracing::debug!("start abandoned: session stopped during negotiation");
                Ok(())
            }
            Err(error) => {
                if !self.shared.current(generation) {
                    tracing::debug!(%error, "ignoring negotiation failure after teardown");
                    return Ok(());
                }
                tracing::error!(%error, "audio negotiation failed");
                self.shared.system(format!("Error: {error}"));
                self.shared.fail_and_reset().await;
                Err(error)
            }
        }
    }

    /// Create the peer, exchange SDP with the backend and apply the answer.
    /// Returns `Ok(false)` when the session was stopped under it.
    async fn negotiate(
        &self,
        generation: u64,
        tracks: &[LocalMediaTrack],
    ) -> SessionResult<bool> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = self
            .peers
            .create_peer(tracks, events_tx)
            .await
            .map_err(SessionError::Negotiation)?;
        if !self.shared.current(generation) {
            peer.close().await;
            return Ok(false);
        }
        *self.shared.peer.lock().await = Some(Arc::clone(&peer));
        tokio::spawn(run_peer_events(
            Arc::clone(&self.shared),
            generation,
            events_rx,
        ));

        let offer = peer.create_offer().await.map_err(SessionError::Negotiation)?;
        tracing::debug!(bytes = offer.len(), "local offer created");

        let answer = self
            .signaling
            .exchange_offer(&offer, self.shared.config.model())
            .await?;
        if !self.shared.current(generation) {
            return Ok(false);
        }
        // Minimal sanity check; the SDP payload itself stays opaque
        if !answer.contains("a=candidate") {
            return Err(SessionError::InvalidAnswer);
        }
        peer.apply_answer(&answer)
            .await
            .map_err(SessionError::Negotiation)?;
        if !self.shared.current(generation) {
            return Ok(false);
        }

        tracing::info!("signaling complete; waiting for ICE connectivity");
        self.shared.set_state(AudioState::IceChecking);
        Ok(true)
    }
}

// =============================================================================
// Peer event handling
// =============================================================================

/// Consume events from one peer, strictly in arrival order. Events from a
/// peer that has since been torn down only get logged.
async fn run_peer_events(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        if !shared.current(generation) {
            tracing::debug!("discarding event for a torn-down peer");
            continue;
        }
        match event {
            PeerEvent::Ice(state) => handle_ice_state(&shared, generation, state).await,
            PeerEvent::Track(track) => handle_remote_track(&shared, track).await,
        }
    }
    tracing::debug!("peer event task ended");
}

async fn handle_ice_state(shared: &Arc<Shared>, generation: u64, state: IceState) {
    tracing::debug!(%state, "ice connection state");
    *shared.ice.lock() = state;
    match state {
        IceState::New => {}
        IceState::Checking => shared.processing.set(true),
        IceState::Connected | IceState::Completed => {
            tracing::info!("ice connectivity established");
            shared.processing.set(false);
            shared.set_state(AudioState::Connected);
        }
        IceState::Disconnected => {
            // Transient by contract, but bounded: see ICE_RECOVERY_WINDOW
            shared.processing.set(true);
            shared.system("Audio connection unstable...");
            arm_recovery_window(shared, generation);
        }
        IceState::Failed => {
            shared.system("Audio connection failed.");
            shared.fail_and_reset().await;
        }
        IceState::Closed => {
            if shared.listening.get() {
                tracing::warn!("ice reported closed while still listening; stopping");
                shared.stop_to_idle().await;
            } else {
                shared.processing.set(false);
            }
        }
    }
}

/// Give a disconnected peer [`ICE_RECOVERY_WINDOW`] to come back. If the
/// same peer is still disconnected when the window expires, the session
/// takes the failure path instead of idling half-dead.
fn arm_recovery_window(shared: &Arc<Shared>, generation: u64) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(ICE_RECOVERY_WINDOW).await;
        if !shared.current(generation) {
            return;
        }
        if *shared.ice.lock() == IceState::Disconnected {
            tracing::error!(
                window_secs = ICE_RECOVERY_WINDOW.as_secs(),
                "ice did not recover; giving up"
            );
            shared.system("Audio connection failed.");
            shared.fail_and_reset().await;
        }
    });
}

async fn handle_remote_track(shared: &Arc<Shared>, track: RemoteMediaTrack) {
    if track.kind() != MediaKind::Audio {
        tracing::warn!(kind = %track.kind(), "ignoring non-audio remote track");
        return;
    }
    tracing::info!(id = track.id(), "remote audio track received");
    match shared.playback.play(track).await {
        Ok(()) => shared.processing.set(false),
        Err(error) => {
            // Non-fatal: the session stays up, only playback is missing
            tracing::error!(%error, "audio playback failed to start");
            shared.system("Audio playback could not be started.");
            shared.processing.set(false);
        }
    }
}
