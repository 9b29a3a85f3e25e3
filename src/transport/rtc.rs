//! WebRTC peer transport backed by the `webrtc` crate.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::{
    IceState, LocalMediaTrack, MediaKind, PeerConnector, PeerEvent, PeerHandle, RemoteMediaTrack,
    TransportError,
};

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceState::Checking,
            RTCIceConnectionState::Connected => IceState::Connected,
            RTCIceConnectionState::Completed => IceState::Completed,
            RTCIceConnectionState::Disconnected => IceState::Disconnected,
            RTCIceConnectionState::Failed => IceState::Failed,
            RTCIceConnectionState::Closed => IceState::Closed,
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceState::New,
        }
    }
}

/// STUN/TURN configuration for the peer connector.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// ICE server URLs (e.g. `stun:stun.l.google.com:19302`)
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// Connector producing real WebRTC peer connections.
#[derive(Debug, Default)]
pub struct RtcPeerConnector {
    config: RtcConfig,
}

impl RtcPeerConnector {
    pub fn new(config: RtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn create_peer(
        &self,
        tracks: &[LocalMediaTrack],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Negotiation(format!("codec registration failed: {e}")))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| TransportError::Negotiation(format!("interceptor setup failed: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self
                .config
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::Negotiation(e.to_string()))?,
        );

        for track in tracks {
            pc.add_track(track.as_webrtc())
                .await
                .map_err(|e| TransportError::Negotiation(format!("add_track failed: {e}")))?;
            tracing::debug!(id = track.id(), "local track attached");
        }

        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            tracing::debug!(%state, "ice connection state changed");
            let _ = ice_events.send(PeerEvent::Ice(state.into()));
            Box::pin(async {})
        }));

        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    RTPCodecType::Unspecified => {
                        tracing::warn!("ignoring remote track of unspecified kind");
                        return;
                    }
                };
                tracing::debug!(id = %track.id(), %kind, "remote track added");
                let _ = events.send(PeerEvent::Track(RemoteMediaTrack::with_rtp(
                    track.id(),
                    kind,
                    track,
                )));
            })
        }));

        Ok(Arc::new(RtcPeer { pc }))
    }
}

/// Handle to a live peer connection.
struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerHandle for RtcPeer {
    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Negotiation(format!("create_offer failed: {e}")))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| TransportError::Negotiation(format!("set_local_description failed: {e}")))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description after offer".into()))?;

        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| TransportError::Negotiation(format!("invalid answer SDP: {e}")))?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Negotiation(format!("set_remote_description failed: {e}")))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!(error = %e, "error closing peer connection");
        }
    }
}
