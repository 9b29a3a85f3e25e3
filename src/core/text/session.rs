//! WebSocket text session state machine.
//!
//! One `TextSession` lives for the whole widget lifetime; its *connections*
//! come and go. Each connection walks `Disconnected -> Connecting -> Open ->
//! Disconnected`, with a parallel reconnecting flag that is only raised
//! while disconnected. Connects are single-flight: while one is in
//! progress, further `connect` and reconnect requests are no-ops.
//!
//! Failures never escape this module as panics or unhandled errors; they
//! are converted into system messages on the message stream plus a state
//! transition, and the triggering caller gets a typed error.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};

use super::messages::{ClientEnvelope, ServerEnvelope, value_text};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventChannel, EventStream, StateFlag};
use crate::message::Message;
use crate::transport::{SocketConnector, SocketEvent, SocketHandle};

/// How long a connect may stay half-open before it is forcibly abandoned.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded reconnect budget for `send_text`.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

// =============================================================================
// Reconnect policy
// =============================================================================

/// Decision returned when a reconnect attempt is claimed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReconnectDecision {
    /// Attempt `n` of the budget may proceed
    Retry(u32),
    /// The budget is spent; the counter has been reset
    Exhausted,
}

/// Bounded retry counter with a single-flight guard.
///
/// The counter only accumulates across failed connects; any successful open
/// resets it to zero.
#[derive(Debug)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    attempts: AtomicU32,
    in_flight: AtomicBool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS)
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the next attempt. Exhaustion resets the counter so the user
    /// can explicitly retry later.
    pub(crate) fn begin(&self) -> ReconnectDecision {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.max_attempts {
            self.attempts.store(0, Ordering::SeqCst);
            self.in_flight.store(false, Ordering::SeqCst);
            ReconnectDecision::Exhausted
        } else {
            self.in_flight.store(true, Ordering::SeqCst);
            ReconnectDecision::Retry(attempt)
        }
    }

    /// Lower the in-flight flag once an attempt finished, win or lose.
    pub(crate) fn finish(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Record a successful open.
    pub(crate) fn succeed(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Clear all counters and flags.
    pub(crate) fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Session
// =============================================================================

struct Shared {
    config: Arc<SessionConfig>,
    socket: Mutex<Option<Arc<dyn SocketHandle>>>,
    connecting: AtomicBool,
    policy: ReconnectPolicy,
    /// Bumped on every connect; events carrying an older epoch belong to a
    /// replaced connection and must not mutate current state.
    epoch: AtomicU64,
    processing: StateFlag<bool>,
    messages: EventChannel<Message>,
}

impl Shared {
    fn current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn system(&self, text: impl Into<String>) {
        self.messages.emit(Message::system(text));
    }
}

/// WebSocket session for typed conversation with the streaming assistant.
pub struct TextSession {
    connector: Arc<dyn SocketConnector>,
    shared: Arc<Shared>,
}

impl TextSession {
    pub fn new(config: Arc<SessionConfig>, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                config,
                socket: Mutex::new(None),
                connecting: AtomicBool::new(false),
                policy: ReconnectPolicy::default(),
                epoch: AtomicU64::new(0),
                processing: StateFlag::new(false),
                messages: EventChannel::new(),
            }),
        }
    }

    /// Subscribe to the session's message stream.
    pub fn messages(&self) -> EventStream<Message> {
        self.shared.messages.subscribe()
    }

    /// Watch the processing ("assistant is thinking") indicator.
    pub fn processing(&self) -> watch::Receiver<bool> {
        self.shared.processing.watch()
    }

    pub fn is_processing(&self) -> bool {
        self.shared.processing.get()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared
            .socket
            .lock()
            .await
            .as_ref()
            .is_some_and(|socket| socket.is_open())
    }

    pub async fn connection_state(&self) -> ConnectionState {
        if self.is_connected().await {
            ConnectionState::Open
        } else if self.shared.policy.is_in_flight() {
            ConnectionState::Reconnecting
        } else if self.shared.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Open the realtime connection and initialize the proxied session.
    ///
    /// No-op when a connection is already open or a connect is in flight.
    /// Arms a [`CONNECT_TIMEOUT`]; a connect that does not reach `Open` in
    /// time is abandoned and surfaced as a timeout system message.
    pub async fn connect(&self) -> SessionResult<()> {
        if self.shared.connecting.load(Ordering::SeqCst) {
            tracing::debug!("connect already in progress; skipping duplicate attempt");
            return Ok(());
        }
        let stale = {
            let mut guard = self.shared.socket.lock().await;
            match guard.as_ref() {
                Some(socket) if socket.is_open() => {
                    tracing::debug!("connection already open; reusing it");
                    return Ok(());
                }
                _ => guard.take(),
            }
        };

        let url = self.shared.config.signaling_socket_url()?;
        self.shared.connecting.store(true, Ordering::SeqCst);

        if let Some(stale) = stale {
            tracing::debug!("closing stale socket before opening a new one");
            let _ = stale.close(1001, "replacing stale connection").await;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tracing::info!(%url, "connecting to realtime endpoint");

        let attempt = tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.connector.connect(url.as_str(), events_tx),
        )
        .await;

        match attempt {
            Ok(Ok(socket)) => {
                *self.shared.socket.lock().await = Some(Arc::clone(&socket));
                self.shared.connecting.store(false, Ordering::SeqCst);
                self.shared.policy.succeed();
                tokio::spawn(run_dispatch(Arc::clone(&self.shared), epoch, events_rx));
                tracing::info!("websocket connection opened");
                self.initialize_session(&socket).await;
                Ok(())
            }
            Ok(Err(error)) => {
                tracing::error!(%error, "websocket connect failed");
                self.shared.connecting.store(false, Ordering::SeqCst);
                self.shared.processing.set(false);
                self.shared
                    .system("Connection error. Please check your network or try again later.");
                Err(SessionError::Transport(error))
            }
            Err(_) => {
                // Dropping the pending connect tears down the half-open
                // socket; nothing further can arrive for this epoch.
                tracing::error!(timeout_secs = CONNECT_TIMEOUT.as_secs(), "connect timed out");
                self.shared.connecting.store(false, Ordering::SeqCst);
                self.shared.system("Connection timed out. Please try again.");
                Err(SessionError::ConnectTimeout)
            }
        }
    }

    /// Submit a user message.
    ///
    /// The message is appended to the outward stream immediately, whatever
    /// the transport state. When the socket is not open, a bounded
    /// reconnect (at most [`MAX_RECONNECT_ATTEMPTS`]) is attempted and the
    /// pending text is resent on success; while a reconnect is already in
    /// flight the send is dropped with a log.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        if text.trim().is_empty() {
            tracing::warn!("ignoring empty text message");
            return Ok(());
        }

        self.shared.messages.emit(Message::user(text));

        if let Some(socket) = self.open_socket().await {
            return self.transmit_user_text(&socket, text).await;
        }

        tracing::warn!("socket not open; trying to reconnect before sending");
        if self.shared.policy.is_in_flight() || self.shared.connecting.load(Ordering::SeqCst) {
            tracing::debug!("connect already in flight; dropping this send");
            return Ok(());
        }

        match self.shared.policy.begin() {
            ReconnectDecision::Exhausted => {
                tracing::error!(
                    max_attempts = self.shared.policy.max_attempts(),
                    "reconnect attempts exhausted"
                );
                self.shared.processing.set(false);
                self.shared.system(
                    "Unable to connect to the server after multiple attempts. Please try again later.",
                );
                Err(SessionError::ReconnectExhausted)
            }
            ReconnectDecision::Retry(attempt) => {
                tracing::info!(attempt, max = self.shared.policy.max_attempts(), "reconnecting");
                let connected = self.connect().await;
                let result = match self.open_socket().await {
                    Some(socket) => {
                        tracing::info!("reconnected; sending pending message");
                        self.transmit_user_text(&socket, text).await
                    }
                    None => {
                        tracing::warn!("reconnect finished but socket is not open");
                        connected
                    }
                };
                self.shared.policy.finish();
                result
            }
        }
    }

    /// Request a clean close. Flags, counters and the processing indicator
    /// are cleared even if the close itself fails.
    pub async fn disconnect(&self) {
        let socket = self.shared.socket.lock().await.take();
        match socket {
            Some(socket) => {
                tracing::info!("disconnecting websocket");
                if let Err(error) = socket.close(1000, "client disconnecting normally").await {
                    tracing::error!(%error, "error closing websocket");
                }
            }
            None => tracing::debug!("disconnect called with no active socket"),
        }
        self.shared.connecting.store(false, Ordering::SeqCst);
        self.shared.policy.reset();
        self.shared.processing.set(false);
    }

    async fn open_socket(&self) -> Option<Arc<dyn SocketHandle>> {
        self.shared
            .socket
            .lock()
            .await
            .as_ref()
            .filter(|socket| socket.is_open())
            .cloned()
    }

    /// Establish the proxied session in text-only mode, then announce the
    /// configured user identity.
    async fn initialize_session(&self, socket: &Arc<dyn SocketHandle>) {
        tracing::debug!("initializing proxied session in text-only mode");
        self.transmit_envelope(socket, &ClientEnvelope::text_only_init())
            .await;
        if let Some(user_id) = &self.shared.config.user_id {
            self.transmit_envelope(
                socket,
                &ClientEnvelope::SetUserId {
                    user_id: user_id.clone(),
                },
            )
            .await;
        }
    }

    async fn transmit_envelope(&self, socket: &Arc<dyn SocketHandle>, envelope: &ClientEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(frame) => {
                if let Err(error) = socket.send_text(&frame).await {
                    tracing::error!(%error, "failed to send envelope");
                }
            }
            Err(error) => tracing::error!(%error, "failed to serialize envelope"),
        }
    }

    async fn transmit_user_text(
        &self,
        socket: &Arc<dyn SocketHandle>,
        text: &str,
    ) -> SessionResult<()> {
        let envelope = ClientEnvelope::TextMessage {
            text: text.to_owned(),
        };
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(%error, "failed to serialize text message");
                return Ok(());
            }
        };
        if let Err(error) = socket.send_text(&frame).await {
            tracing::error!(%error, "failed to send text message");
            self.shared.processing.set(false);
            self.shared.system("Error sending message. Please try again.");
            return Err(SessionError::Transport(error));
        }
        tracing::debug!("text message sent");
        Ok(())
    }
}

// =============================================================================
// Inbound dispatch
// =============================================================================

/// Consume events from one connection, strictly in arrival order. Events
/// from a connection that has since been replaced only get logged.
async fn run_dispatch(
    shared: Arc<Shared>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
) {
    while let Some(event) = events.recv().await {
        if !shared.current(epoch) {
            tracing::debug!("discarding event from a replaced connection");
            continue;
        }
        match event {
            SocketEvent::Text(text) => handle_frame(&shared, &text).await,
            SocketEvent::Binary(len) => {
                tracing::warn!(len, "rejecting unexpected binary frame");
            }
            SocketEvent::Error(error) => {
                tracing::error!(%error, "websocket error");
                shared.processing.set(false);
                shared.connecting.store(false, Ordering::SeqCst);
                shared.policy.finish();
                *shared.socket.lock().await = None;
                shared.system("Connection error. Please check your network or try again later.");
            }
            SocketEvent::Closed { code, reason, clean } => {
                tracing::info!(code, %reason, clean, "websocket closed");
                shared.processing.set(false);
                shared.connecting.store(false, Ordering::SeqCst);
                *shared.socket.lock().await = None;
                if clean {
                    shared.system("Connection closed.");
                } else {
                    let detail = if reason.is_empty() {
                        "Please try reconnecting.".to_string()
                    } else {
                        reason
                    };
                    shared.system(format!("Connection closed unexpectedly. {detail}"));
                }
            }
        }
    }
    tracing::debug!("dispatch task ended");
}

async fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(%error, "failed to parse frame as JSON");
            return;
        }
    };
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_owned();
    let envelope: ServerEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, kind, "failed to parse envelope");
            return;
        }
    };

    match envelope {
        ServerEnvelope::SessionCreated { session } => {
            let id = session.and_then(|s| s.id);
            tracing::info!(id = id.as_deref().unwrap_or("-"), "proxied session created");
        }
        ServerEnvelope::UserContextLoaded { user_id } => {
            tracing::info!(user_id = user_id.as_deref().unwrap_or("-"), "user context loaded");
        }
        ServerEnvelope::ResponseCreated { response_id } => {
            tracing::debug!(
                response_id = response_id.as_deref().unwrap_or("-"),
                "response generation started"
            );
            shared.processing.set(true);
        }
        ServerEnvelope::TextDelta { delta } => {
            if let Some(delta) = delta.filter(|d| !d.trim().is_empty()) {
                shared.messages.emit(Message::assistant(delta));
            }
        }
        ServerEnvelope::ContentPartAdded { content_part } => {
            let text = content_part
                .and_then(|part| part.content)
                .and_then(|content| content.text)
                .filter(|text| !text.is_empty());
            if let Some(text) = text {
                shared.messages.emit(Message::assistant(text));
            }
        }
        ServerEnvelope::ResponseDone { response } => {
            let id = response.and_then(|r| r.id);
            tracing::debug!(id = id.as_deref().unwrap_or("-"), "response generation complete");
            shared.processing.set(false);
        }
        ServerEnvelope::ConnectionClosed { code, reason } => {
            let reason = reason
                .as_ref()
                .map(value_text)
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "Proxied connection closed".to_string());
            tracing::info!(?code, %reason, "backend reported upstream connection closed");
            handle_connection_closure(shared, code, reason).await;
        }
        ServerEnvelope::Error { error } => {
            let detail = error
                .as_ref()
                .map(value_text)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "An unknown error occurred.".to_string());
            tracing::error!(%detail, "backend reported an error");
            shared.system(format!("Error: {detail}"));
            shared.processing.set(false);
        }
        ServerEnvelope::ConversationItemCreated { item } => {
            let id = item.and_then(|i| i.id);
            tracing::debug!(id = id.as_deref().unwrap_or("-"), "conversation item acknowledged");
        }
        ServerEnvelope::RateLimitsUpdated
        | ServerEnvelope::OutputItemAdded
        | ServerEnvelope::OutputItemDone
        | ServerEnvelope::ContentPartDone => {
            tracing::debug!(kind, "informational event");
        }
        ServerEnvelope::Unknown => {
            tracing::warn!(kind, "unhandled envelope type");
        }
    }
}

/// Upstream closure reported by the proxy; treated like a socket close
/// event with the provided code and reason.
async fn handle_connection_closure(shared: &Arc<Shared>, code: Option<u16>, reason: String) {
    *shared.socket.lock().await = None;
    shared.processing.set(false);
    shared.connecting.store(false, Ordering::SeqCst);
    shared.policy.reset();

    let clean = matches!(code, Some(1000) | Some(1005));
    if clean {
        shared.system("Connection closed.");
    } else {
        shared.system(format!("Connection closed unexpectedly. {reason}"));
    }
}
