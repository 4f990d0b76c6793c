//! ComfyUI HTTP client
//!
//! Implements [`BackendPort`] on top of ComfyUI's REST API.

use std::time::Duration;

use async_trait::async_trait;
use comfyui_mini_domain::{OutputFile, PromptId, QueueSnapshot, WorkflowGraph};
use comfyui_mini_shared::QueueStatusResponse;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;

use crate::infrastructure::ports::{BackendError, BackendPort, FileStream, PromptAccepted};

/// Per-request timeout; runs themselves are tracked over the WebSocket.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for ComfyUI API
#[derive(Clone)]
pub struct ComfyUIClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct QueuePromptRequest<'a> {
    prompt: &'a WorkflowGraph,
    client_id: &'a str,
}

impl ComfyUIClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fail on non-2xx, carrying the backend's error body.
    async fn check(response: Response) -> Result<Response, BackendError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(BackendError::Status { status, body })
    }
}

fn request_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() {
        BackendError::Unavailable
    } else {
        BackendError::RequestFailed(e.to_string())
    }
}

#[async_trait]
impl BackendPort for ComfyUIClient {
    async fn queue_prompt(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<PromptAccepted, BackendError> {
        let request = QueuePromptRequest {
            prompt: workflow,
            client_id,
        };

        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn get_queue(&self) -> Result<QueueSnapshot, BackendError> {
        let response = self
            .client
            .get(self.url("/queue"))
            .send()
            .await
            .map_err(request_error)?;

        let status: QueueStatusResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        if !status.queue_completed.is_empty() {
            tracing::debug!(
                count = status.queue_completed.len(),
                "Backend reported completed entries; using local history instead"
            );
        }
        Ok(status.into_snapshot())
    }

    async fn get_history(&self, prompt_id: &PromptId) -> Result<Value, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/history/{prompt_id}")))
            .send()
            .await
            .map_err(request_error)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn interrupt(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/interrupt"))
            .send()
            .await
            .map_err(request_error)?;

        Self::check(response).await.map(|_| ())
    }

    async fn view(&self, file: &OutputFile) -> Result<FileStream, BackendError> {
        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", file.kind.as_str()),
            ])
            .send()
            .await
            .map_err(request_error)?;

        let response = Self::check(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map_err(|e| BackendError::RequestFailed(e.to_string()))
            .boxed();

        Ok(FileStream { content_type, body })
    }
}
