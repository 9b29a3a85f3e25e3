//! HTTP SDP offer/answer exchange.
//!
//! Voice negotiation does not trickle ICE candidates through a signaling
//! channel. The complete local offer is posted to the backend in one
//! request and the complete answer comes back in the response body. The
//! client is stateless per call and never retries; a user-initiated retry
//! is a fresh start of the audio session.

use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, SessionConfig};

/// Errors raised by the offer/answer exchange.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The negotiation endpoint could not be derived from the configuration
    #[error("invalid signaling configuration: {0}")]
    Config(#[from] ConfigError),

    /// The request never produced a response
    #[error("signaling request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("signaling failed ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The backend answered 2xx but sent no SDP
    #[error("signaling answer was empty")]
    EmptyAnswer,
}

/// Client for the backend's WebRTC negotiation endpoint.
pub struct SignalingClient {
    http: reqwest::Client,
    config: Arc<SessionConfig>,
}

impl SignalingClient {
    pub fn new(config: Arc<SessionConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Post `sdp_offer` to the negotiation endpoint for `model` and return
    /// the SDP answer text.
    pub async fn exchange_offer(
        &self,
        sdp_offer: &str,
        model: &str,
    ) -> Result<String, SignalingError> {
        let mut url = self.config.webrtc_init_url()?;
        url.query_pairs_mut().clear().append_pair("model", model);

        tracing::debug!(%url, "sending SDP offer");
        let mut request = self
            .http
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(sdp_offer.to_owned());
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "signaling response received");

        if !status.is_success() {
            return Err(SignalingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(SignalingError::EmptyAnswer);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Arc<SessionConfig> {
        Arc::new(SessionConfig::new(server.uri()))
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webrtc-init"))
            .and(query_param("model", "gpt-4o-realtime-preview"))
            .and(header("content-type", "application/sdp"))
            .and(body_string("v=0 offer"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v=0 answer\r\na=candidate:1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = SignalingClient::new(config_for(&server));
        let answer = client
            .exchange_offer("v=0 offer", "gpt-4o-realtime-preview")
            .await
            .unwrap();
        assert!(answer.contains("a=candidate"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webrtc-init"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let client = SignalingClient::new(config_for(&server));
        let err = client.exchange_offer("v=0", "m").await.unwrap_err();
        match err {
            SignalingError::Rejected { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream unavailable");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webrtc-init"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  "))
            .mount(&server)
            .await;

        let client = SignalingClient::new(config_for(&server));
        let err = client.exchange_offer("v=0", "m").await.unwrap_err();
        assert!(matches!(err, SignalingError::EmptyAnswer));
    }

    #[tokio::test]
    async fn test_auth_token_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webrtc-init"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a=candidate:1"))
            .expect(1)
            .mount(&server)
            .await;

        let config = Arc::new(SessionConfig::new(server.uri()).with_auth_token("sekrit"));
        let client = SignalingClient::new(config);
        client.exchange_offer("v=0", "m").await.unwrap();
    }
}
