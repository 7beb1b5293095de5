// ABOUTME: WebSocket event channel delivering build output and termination events
// Manages the connection handshake, then a reader task feeding an unbounded channel

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::http::SessionToken;
use super::{EventChannel, SessionEvent, TransportError};
use crate::protocol::{WireEvent, API_PREFIX, EVENTS_PATH, SESSION_HEADER};

pub struct WsEventChannel {
    url: String,
    session: SessionToken,
}

impl WsEventChannel {
    /// `base_url` is the server's HTTP base URL; the channel connects to
    /// the matching ws:// (or wss://) events endpoint. `session` is the
    /// token slot filled by the HTTP handshake.
    pub fn new(base_url: &str, session: SessionToken) -> Self {
        let url = events_url(base_url);
        Self { url, session }
    }
}

#[async_trait::async_trait]
impl EventChannel for WsEventChannel {
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, TransportError> {
        debug!("connecting event channel on {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::EventConnect(e.to_string()))?;
        if let Some(sid) = self.session.read().await.as_deref() {
            let value = HeaderValue::from_str(sid)
                .map_err(|e| TransportError::EventConnect(e.to_string()))?;
            request.headers_mut().insert(SESSION_HEADER, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::EventConnect(e.to_string()))?;
        info!("event channel connected on {}", self.url);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(stream, tx));
        Ok(rx)
    }
}

/// Reads frames until the stream ends. Any close or transport error
/// becomes a single `Disconnected` event; there is no reconnect.
async fn read_loop(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<WireEvent>(&text) {
                Ok(event) => {
                    if tx.send(event.into()).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("dropping unparseable event: {e}"),
            },
            Ok(Message::Close(frame)) => {
                debug!("event channel closed by server");
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                let _ = tx.send(SessionEvent::Disconnected(reason));
                return;
            }
            // Ping/pong handled by tungstenite, binary frames unused
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(SessionEvent::Disconnected(Some(e.to_string())));
                return;
            }
        }
    }
    let _ = tx.send(SessionEvent::Disconnected(None));
}

fn events_url(base_url: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base_url}")
    };
    format!("{}{}{}", ws_base.trim_end_matches('/'), API_PREFIX, EVENTS_PATH)
}
