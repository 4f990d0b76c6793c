//! Discovery of the literal inputs a workflow exposes for editing.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::NodeId;
use crate::workflow::graph::as_link;
use crate::workflow::WorkflowGraph;

/// Parsed input from a workflow (for UI display)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    /// The node ID this input belongs to
    pub node_id: NodeId,
    /// The class type of the node (e.g., "KSampler", "CLIPTextEncode")
    pub node_type: String,
    /// The node's display title (from _meta)
    pub node_title: Option<String>,
    /// The input parameter name
    pub input_name: String,
    /// Detected type of the input
    pub input_type: InputType,
    /// Current value in the workflow
    pub current_value: Value,
}

impl WorkflowInput {
    /// Get the path as "node_id.input_name"
    pub fn path(&self) -> String {
        format!("{}.{}", self.node_id, self.input_name)
    }

    /// Get display name for this input
    pub fn display_name(&self) -> String {
        let owner = self.node_title.as_deref().unwrap_or(&self.node_type);
        format!("{} → {}", owner, self.input_name)
    }
}

/// Detected input type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputType {
    Text,
    Integer,
    Float,
    Boolean,
    Unknown,
}

impl InputType {
    /// Detect the type from a JSON value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::Text,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::Bool(_) => Self::Boolean,
            _ => Self::Unknown,
        }
    }
}

/// List every literal (non-link) input of `graph`.
///
/// Inputs are ordered by node id, numerically when both ids are numbers, then
/// by input name.
pub fn discover_inputs(graph: &WorkflowGraph) -> Vec<WorkflowInput> {
    let mut inputs: Vec<WorkflowInput> = graph
        .nodes()
        .flat_map(|(id, node)| {
            node.inputs
                .iter()
                .filter(|(_, value)| as_link(value).is_none())
                .map(move |(name, value)| WorkflowInput {
                    node_id: id.clone(),
                    node_type: node.class_type.clone(),
                    node_title: node.title().map(str::to_string),
                    input_name: name.clone(),
                    input_type: InputType::from_value(value),
                    current_value: value.clone(),
                })
        })
        .collect();

    inputs.sort_by(|a, b| {
        compare_node_ids(a.node_id.as_str(), b.node_id.as_str())
            .then_with(|| a.input_name.cmp(&b.input_name))
    });
    inputs
}

fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
