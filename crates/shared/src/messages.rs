//! WebSocket message types for browser ↔ server communication
//!
//! The browser sends a [`WorkflowSubmission`]; the server answers with a
//! stream of [`ServerMessage`]s. On the wire every server message is
//! `{"type": ..., "data": ...}` except `error`, which carries its text as a
//! top-level `message` field.
//!
//! Payloads relayed from the backend (`progress`, `node_executing`,
//! `node_executed`) keep every field the backend sent, including ones this
//! crate does not name.

use comfyui_mini_domain::{NodeId, OutputImageMap, PromptId, WorkflowGraph};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// =============================================================================
// Client Messages (browser → server)
// =============================================================================

/// A filled-in workflow submitted for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSubmission {
    pub workflow: WorkflowGraph,
    #[serde(default)]
    pub workflow_name: String,
}

impl WorkflowSubmission {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidPayload {
            kind: "submission".to_string(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Server Messages (server → browser)
// =============================================================================

/// Graph of the run that just started executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStructure {
    pub total_nodes: usize,
    pub workflow: Value,
    pub prompt_id: PromptId,
}

/// Progress of the executing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    pub value: f64,
    pub max: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressData {
    pub fn new(value: f64, max: f64) -> Self {
        Self {
            value,
            max,
            extra: Map::new(),
        }
    }
}

/// Node that started executing. `node == None` means the run has no node left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutingData {
    pub node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_node: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<PromptId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Node that finished, with whatever output it reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutedData {
    pub node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_node: Option<NodeId>,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<PromptId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Live preview image, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub image: String,
    pub mimetype: String,
}

/// Messages from server to browser
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    WorkflowStructure(WorkflowStructure),
    Progress(ProgressData),
    NodeExecuting(NodeExecutingData),
    NodeExecuted(NodeExecutedData),
    Preview(PreviewImage),
    /// Number of output URLs in the `Completed` message that follows
    TotalImages(usize),
    Completed(OutputImageMap),
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowStructure(_) => "workflow_structure",
            Self::Progress(_) => "progress",
            Self::NodeExecuting(_) => "node_executing",
            Self::NodeExecuted(_) => "node_executed",
            Self::Preview(_) => "preview",
            Self::TotalImages(_) => "total_images",
            Self::Completed(_) => "completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(|e| {
            ProtocolError::InvalidPayload {
                kind: "envelope".to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_envelope(envelope)
    }

    fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::WorkflowStructure(data) => serde_json::to_value(data),
            Self::Progress(data) => serde_json::to_value(data),
            Self::NodeExecuting(data) => serde_json::to_value(data),
            Self::NodeExecuted(data) => serde_json::to_value(data),
            Self::Preview(data) => serde_json::to_value(data),
            Self::TotalImages(count) => serde_json::to_value(count),
            Self::Completed(map) => serde_json::to_value(map),
            Self::Error { .. } => Ok(Value::Null),
        }
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope {
            kind,
            data,
            message,
        } = envelope;

        if kind == "error" {
            return Ok(Self::Error {
                message: message.unwrap_or_default(),
            });
        }

        let data = data.unwrap_or(Value::Null);
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind: kind.clone(),
            reason: e.to_string(),
        };
        let message = match kind.as_str() {
            "workflow_structure" => {
                Self::WorkflowStructure(serde_json::from_value(data).map_err(invalid)?)
            }
            "progress" => Self::Progress(serde_json::from_value(data).map_err(invalid)?),
            "node_executing" => Self::NodeExecuting(serde_json::from_value(data).map_err(invalid)?),
            "node_executed" => Self::NodeExecuted(serde_json::from_value(data).map_err(invalid)?),
            "preview" => Self::Preview(serde_json::from_value(data).map_err(invalid)?),
            "total_images" => Self::TotalImages(serde_json::from_value(data).map_err(invalid)?),
            "completed" => Self::Completed(serde_json::from_value(data).map_err(invalid)?),
            _ => return Err(ProtocolError::UnknownType(kind.clone())),
        };
        Ok(message)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            Self::Error { message } => Envelope {
                kind: self.kind().to_string(),
                data: None,
                message: Some(message.clone()),
            },
            _ => Envelope {
                kind: self.kind().to_string(),
                data: Some(self.data().map_err(S::Error::custom)?),
                message: None,
            },
        };
        envelope.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServerMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = Envelope::deserialize(deserializer)?;
        Self::from_envelope(envelope).map_err(D::Error::custom)
    }
}
