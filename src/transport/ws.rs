//! WebSocket transport backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{SocketConnector, SocketEvent, SocketHandle, TransportError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Code reported when the stream ends without a closing handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Connector producing real WebSocket connections.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<Arc<dyn SocketHandle>, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url, "websocket connected");

        let (sink, mut read) = stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let open = Arc::new(AtomicBool::new(true));

        let reader_sink = Arc::clone(&sink);
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            let mut reported_close = false;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let _ = events.send(SocketEvent::Text(text.to_string()));
                    }
                    Ok(Message::Binary(payload)) => {
                        let _ = events.send(SocketEvent::Binary(payload.len()));
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = reader_sink.lock().await.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let (code, reason) = match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                            // Close without a status code
                            None => (1005, String::new()),
                        };
                        let _ = events.send(SocketEvent::Closed {
                            code,
                            reason,
                            clean: code == 1000,
                        });
                        reported_close = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = events.send(SocketEvent::Error(e.to_string()));
                        reported_close = true;
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            if !reported_close {
                let _ = events.send(SocketEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: String::new(),
                    clean: false,
                });
            }
            tracing::debug!("websocket reader task ended");
        });

        Ok(Arc::new(WsHandle { sink, open }))
    }
}

/// Handle to an open WebSocket connection.
struct WsHandle {
    sink: Arc<Mutex<WsSink>>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SocketHandle for WsHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Send("socket is closed".into()));
        }
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_owned().into(),
            })))
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
