//! ComfyUI event WebSocket, one connection per run.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::infrastructure::ports::{
    BackendError, BackendFrame, BackendSocket, BackendSocketConnector,
};

/// Opens backend sockets with a bounded connect time.
pub struct TungsteniteConnector {
    ws_url: String,
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(ws_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            connect_timeout,
        }
    }

    fn url_for(&self, client_id: &str) -> String {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        format!("{}{}clientId={}", self.ws_url, separator, client_id)
    }
}

#[async_trait]
impl BackendSocketConnector for TungsteniteConnector {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BackendSocket>, BackendError> {
        let url = self.url_for(client_id);
        tracing::debug!(url = %url, "Connecting to backend WebSocket");

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| BackendError::Timeout(self.connect_timeout))?
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl BackendSocket for TungsteniteSocket {
    async fn next_frame(&mut self) -> Option<Result<BackendFrame, BackendError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(BackendFrame::Text(text.to_string()))),
                Ok(Message::Binary(bytes)) => return Some(Ok(BackendFrame::Binary(bytes.to_vec()))),
                Ok(Message::Close(_)) => return None,
                // Ping/pong is answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(BackendError::RequestFailed(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Backend WebSocket close failed");
        }
    }
}
