//! Widget session configuration.
//!
//! A [`SessionConfig`] is supplied once when the widget is constructed and
//! stays read-only for the lifetime of the session objects. It carries the
//! backend endpoint, the negotiation model and the optional user identity.
//! Hosts may build it programmatically or deserialize it from an embedding
//! page's JSON/YAML config blob.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Model requested from the backend when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Port assumed for the realtime endpoints when the backend URL does not
/// carry an explicit one.
pub const DEFAULT_SIGNALING_PORT: u16 = 4000;

/// Errors that can occur while validating a session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The backend URL field was empty
    #[error("backend URL is required")]
    MissingBackendUrl,

    /// The backend URL could not be parsed
    #[error("invalid backend URL: {0}")]
    InvalidBackendUrl(#[from] url::ParseError),

    /// The backend URL uses a scheme other than http/https
    #[error("backend URL must use http or https, got: {0}")]
    UnsupportedScheme(String),

    /// The backend URL has no host component
    #[error("backend URL must have a host")]
    MissingHost,
}

/// Immutable configuration for one widget instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the backend API (e.g. `https://backend.example.com:4000`)
    pub backend_url: String,

    /// Model identifier passed to the negotiation endpoints.
    /// Defaults to [`DEFAULT_MODEL`] when absent.
    #[serde(default)]
    pub model: Option<String>,

    /// Whether the voice (WebRTC audio) transport may be started.
    #[serde(default = "default_voice_enabled")]
    pub voice_enabled: bool,

    /// User identifier announced to the backend after the text transport
    /// opens, so it can load per-user context.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Bearer token attached to signaling requests when present.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// First assistant message seeded into the conversation.
    #[serde(default)]
    pub welcome_message: Option<String>,
}

fn default_voice_enabled() -> bool {
    true
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the backend.
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            model: None,
            voice_enabled: true,
            user_id: None,
            auth_token: None,
            welcome_message: None,
        }
    }

    /// Override the negotiation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable or disable the voice transport.
    pub fn with_voice_enabled(mut self, enabled: bool) -> Self {
        self.voice_enabled = enabled;
        self
    }

    /// Attach a user identifier.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a bearer token for signaling requests.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Seed the conversation with a custom welcome message.
    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = Some(message.into());
        self
    }

    /// The effective model identifier.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Check that the backend URL is present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::MissingBackendUrl);
        }
        let url = Url::parse(&self.backend_url)?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(ConfigError::MissingHost);
        }
        Ok(())
    }

    /// Endpoint for the HTTP SDP offer/answer exchange.
    pub fn webrtc_init_url(&self) -> Result<Url, ConfigError> {
        self.validate()?;
        let base = Url::parse(&self.backend_url)?;
        let mut url = base.join("/api/webrtc-init")?;
        url.query_pairs_mut().append_pair("model", self.model());
        Ok(url)
    }

    /// Endpoint for the realtime text WebSocket, derived from the backend
    /// URL: the scheme is upgraded to its WebSocket counterpart, the host is
    /// preserved and a missing port falls back to
    /// [`DEFAULT_SIGNALING_PORT`].
    pub fn signaling_socket_url(&self) -> Result<Url, ConfigError> {
        self.validate()?;
        let base = Url::parse(&self.backend_url)?;
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        let host = base.host_str().ok_or(ConfigError::MissingHost)?;
        let port = base.port().unwrap_or(DEFAULT_SIGNALING_PORT);
        let mut url = Url::parse(&format!("{scheme}://{host}:{port}/api/webrtc-signaling"))?;
        url.query_pairs_mut().append_pair("model", self.model());
        Ok(url)
    }
}
