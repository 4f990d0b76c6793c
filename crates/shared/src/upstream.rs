//! JSON events sent by the backend over its WebSocket.
//!
//! Frames are `{"type": ..., "data": {...}}`. Decoding happens in two steps so
//! an event type this crate does not know is reported as
//! [`BackendEvent::Unknown`] instead of failing the frame.

use comfyui_mini_domain::PromptId;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FrameError;
use crate::messages::{NodeExecutedData, NodeExecutingData, ProgressData};

/// Queue status broadcast.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub status: Option<StatusInfo>,
    /// Session id, only sent on the first status after connecting
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecInfo {
    #[serde(default)]
    pub queue_remaining: Option<u32>,
}

impl StatusData {
    pub fn queue_remaining(&self) -> Option<u32> {
        self.status
            .as_ref()
            .and_then(|status| status.exec_info.queue_remaining)
    }
}

/// Payload of `execution_success` / `execution_interrupted`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionResult {
    pub prompt_id: PromptId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Events the backend emits over its WebSocket.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Status(StatusData),
    Progress(ProgressData),
    Executing(NodeExecutingData),
    Executed(NodeExecutedData),
    ExecutionSuccess(ExecutionResult),
    ExecutionInterrupted(ExecutionResult),
    /// Any other event type (`execution_start`, `execution_cached`, ...)
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl BackendEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        let data = frame.data;
        let event = match frame.kind.as_str() {
            "status" => Self::Status(serde_json::from_value(data)?),
            "progress" => Self::Progress(serde_json::from_value(data)?),
            "executing" => Self::Executing(serde_json::from_value(data)?),
            "executed" => Self::Executed(serde_json::from_value(data)?),
            "execution_success" => Self::ExecutionSuccess(serde_json::from_value(data)?),
            "execution_interrupted" => Self::ExecutionInterrupted(serde_json::from_value(data)?),
            other => Self::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Status(_) => "status",
            Self::Progress(_) => "progress",
            Self::Executing(_) => "executing",
            Self::Executed(_) => "executed",
            Self::ExecutionSuccess(_) => "execution_success",
            Self::ExecutionInterrupted(_) => "execution_interrupted",
            Self::Unknown { kind } => kind,
        }
    }
}
