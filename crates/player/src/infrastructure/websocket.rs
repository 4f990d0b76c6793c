//! WebSocket client for the engine's `/ws` endpoint, using tokio-tungstenite.

use std::time::Duration;

use comfyui_mini_shared::{ProtocolError, ServerMessage, WorkflowSubmission};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid engine address: {0}")]
    InvalidAddress(String),
    #[error("Failed to connect to engine: {0}")]
    Connect(String),
    #[error("Engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    Transport(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// `http(s)://host:port` or `ws(s)://host:port[/path]` to the engine's
/// WebSocket URL. A bare host gets the `/ws` path.
pub fn ws_endpoint(server: &str) -> Result<String, ClientError> {
    let mut url = Url::parse(server).map_err(|e| ClientError::InvalidAddress(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ClientError::InvalidAddress(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::InvalidAddress(server.to_string()))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/ws");
    }
    Ok(url.to_string())
}

/// Client for submitting workflows to the engine.
pub struct EngineClient {
    url: String,
    connect_timeout: Duration,
}

impl EngineClient {
    pub fn new(server: &str, connect_timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            url: ws_endpoint(server)?,
            connect_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and send `submission`; the returned stream yields the run's
    /// messages.
    pub async fn submit(&self, submission: &WorkflowSubmission) -> Result<RunStream, ClientError> {
        let connect = connect_async(self.url.as_str());
        let (mut stream, _) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| ClientError::Timeout(self.connect_timeout))?
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        tracing::info!(url = %self.url, "Connected to engine");

        let json = serde_json::to_string(submission)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        stream
            .send(Message::Text(json))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(RunStream { stream })
    }
}

/// Messages of one submitted run.
pub struct RunStream {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RunStream {
    /// Next engine message; `None` once the engine closed the connection.
    /// Frames that are not valid messages are logged and skipped.
    pub async fn next_message(&mut self) -> Option<Result<ServerMessage, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(message) => return Some(Ok(message)),
                    Err(e) => tracing::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("Server closed connection");
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(ClientError::Transport(e.to_string()))),
            }
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Engine WebSocket close failed");
        }
    }
}
