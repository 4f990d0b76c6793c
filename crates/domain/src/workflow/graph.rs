//! Workflow graph in the backend's API format.
//!
//! A graph maps node ids to nodes; each node input is either a literal value or
//! a link `[sourceNodeId, outputSlot]` to another node's output. Inputs are kept
//! as raw JSON so a submitted graph is forwarded to the backend byte-for-byte
//! equivalent to what the browser sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DomainError;
use crate::ids::NodeId;

/// A single unit of work in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Node class as registered in the backend (e.g. "KSampler")
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Anything else the editor stored on the node (`_meta`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A reference from one node input to another node's output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLink<'a> {
    pub input_name: &'a str,
    pub source: &'a str,
    pub slot: Option<u64>,
}

impl WorkflowNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Display title stored by the editor under `_meta.title`, if any.
    pub fn title(&self) -> Option<&str> {
        self.extra
            .get("_meta")
            .and_then(|meta| meta.get("title"))
            .and_then(Value::as_str)
    }

    /// All link-shaped inputs, in input order.
    ///
    /// This is purely syntactic: whether the source actually exists is a
    /// question for the owning graph.
    pub fn links(&self) -> impl Iterator<Item = NodeLink<'_>> {
        self.inputs.iter().filter_map(|(name, value)| {
            as_link(value).map(|(source, slot)| NodeLink {
                input_name: name.as_str(),
                source,
                slot,
            })
        })
    }
}

/// Interpret a value as a link: an array of at least two elements whose first
/// element is a string.
pub fn as_link(value: &Value) -> Option<(&str, Option<u64>)> {
    let items = value.as_array()?;
    if items.len() < 2 {
        return None;
    }
    let source = items[0].as_str()?;
    Some((source, items[1].as_u64()))
}

/// Mapping from node id to node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, WorkflowNode>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, id: impl Into<NodeId>, node: WorkflowNode) -> Self {
        self.insert(id, node);
        self
    }

    pub fn insert(&mut self, id: impl Into<NodeId>, node: WorkflowNode) {
        self.nodes.insert(id.into(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &WorkflowNode)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Links of `node` whose source is a node of this graph.
    pub fn resolved_links<'a>(
        &'a self,
        node: &'a WorkflowNode,
    ) -> impl Iterator<Item = NodeLink<'a>> + 'a {
        node.links().filter(move |link| self.contains(link.source))
    }

    /// Check that every link names a node present in the graph.
    pub fn validate(&self) -> Result<(), DomainError> {
        for (id, node) in &self.nodes {
            if let Some(link) = node.links().find(|link| !self.contains(link.source)) {
                return Err(DomainError::malformed(format!(
                    "node {} input '{}' references missing node {}",
                    id, link.input_name, link.source
                )));
            }
        }
        Ok(())
    }

    /// Parse a graph from a JSON value.
    pub fn from_value(value: Value) -> Result<Self, DomainError> {
        serde_json::from_value(value).map_err(|e| DomainError::parse(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        let nodes = self
            .nodes
            .iter()
            .filter_map(|(id, node)| {
                serde_json::to_value(node)
                    .ok()
                    .map(|value| (id.to_string(), value))
            })
            .collect::<Map<String, Value>>();
        Value::Object(nodes)
    }
}

impl FromIterator<(NodeId, WorkflowNode)> for WorkflowGraph {
    fn from_iter<T: IntoIterator<Item = (NodeId, WorkflowNode)>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::fixtures::txt2img;
    use serde_json::json;

    #[test]
    fn parses_api_format_and_keeps_meta() {
        let graph = WorkflowGraph::from_value(json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a cat", "clip": ["4", 1] },
                "_meta": { "title": "Positive Prompt" }
            },
            "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "x.ckpt" } }
        }))
        .unwrap();

        assert_eq!(graph.len(), 2);
        let node = graph.get("6").unwrap();
        assert_eq!(node.class_type, "CLIPTextEncode");
        assert_eq!(node.title(), Some("Positive Prompt"));

        let round_trip = graph.to_value();
        assert_eq!(round_trip["6"]["_meta"]["title"], "Positive Prompt");
        assert_eq!(round_trip["6"]["inputs"]["clip"], json!(["4", 1]));
    }

    #[test]
    fn links_are_two_element_arrays_starting_with_a_string() {
        let node = WorkflowNode::new("KSampler")
            .with_input("model", json!(["4", 0]))
            .with_input("seed", json!(42))
            .with_input("size", json!([512, 512]))
            .with_input("single", json!(["4"]));

        let links: Vec<_> = node.links().collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].input_name, "model");
        assert_eq!(links[0].source, "4");
        assert_eq!(links[0].slot, Some(0));
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        assert!(txt2img().validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_reference() {
        let graph = WorkflowGraph::new()
            .with_node("1", WorkflowNode::new("VAEDecode").with_input("samples", json!(["9", 0])));

        let err = graph.validate().unwrap_err();
        assert!(matches!(err, DomainError::MalformedWorkflow(_)));
        assert!(err.to_string().contains("missing node 9"));
    }

    #[test]
    fn resolved_links_skip_unknown_sources() {
        let graph = WorkflowGraph::new()
            .with_node("1", WorkflowNode::new("A"))
            .with_node(
                "2",
                WorkflowNode::new("B")
                    .with_input("x", json!(["1", 0]))
                    .with_input("y", json!(["missing", 0])),
            );

        let node = graph.get("2").unwrap();
        let sources: Vec<_> = graph.resolved_links(node).map(|l| l.source).collect();
        assert_eq!(sources, vec!["1"]);
    }
}
