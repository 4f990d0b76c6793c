//! Port traits for infrastructure boundaries.
//!
//! Ports exist for:
//! - The backend HTTP API (queue, history, interrupt, file view)
//! - The backend event WebSocket (one connection per run)
//! - Clock (for testing)

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use comfyui_mini_domain::{OutputFile, PromptId, QueueSnapshot, WorkflowGraph};
use futures_util::stream::BoxStream;
use serde::Deserialize;
use serde_json::Value;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    RequestFailed(String),
    #[error("Backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Backend unavailable")]
    Unavailable,
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("Backend WebSocket connection failed: {0}")]
    Connect(String),
    #[error("Backend WebSocket did not open within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

// =============================================================================
// Backend HTTP API
// =============================================================================

/// Answer of `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptAccepted {
    pub prompt_id: PromptId,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub node_errors: Value,
}

/// A file streamed from `GET /view`, chunk by chunk as the backend sends it.
pub struct FileStream {
    pub content_type: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, BackendError>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendPort: Send + Sync {
    /// Queue `workflow` for execution on behalf of the socket `client_id`.
    async fn queue_prompt(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<PromptAccepted, BackendError>;
    async fn get_queue(&self) -> Result<QueueSnapshot, BackendError>;
    /// Raw history document; its shape varies between backend versions.
    async fn get_history(&self, prompt_id: &PromptId) -> Result<Value, BackendError>;
    async fn interrupt(&self) -> Result<(), BackendError>;
    async fn view(&self, file: &OutputFile) -> Result<FileStream, BackendError>;
}

// =============================================================================
// Backend Event Socket
// =============================================================================

/// One frame received on the backend WebSocket.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// An open backend WebSocket. Dropping it drops the connection.
#[async_trait]
pub trait BackendSocket: Send {
    /// Next data frame; `None` once the backend closed the connection.
    async fn next_frame(&mut self) -> Option<Result<BackendFrame, BackendError>>;
    async fn close(&mut self);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendSocketConnector: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BackendSocket>, BackendError>;
}

// =============================================================================
// Clock
// =============================================================================

pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
