//! Client-side view of one workflow run.
//!
//! `RunTracker` consumes the messages relayed by the engine and keeps the
//! progress aggregator, the latest preview and the final outputs in sync with
//! them. It does no I/O.

use comfyui_mini_domain::{
    NodeId, OutputImageMap, ProgressAggregator, PromptId, WorkflowGraph,
};
use comfyui_mini_shared::{PreviewImage, ServerMessage, WorkflowStructure};
use serde::Serialize;

/// Where the run stands, as far as the buttons are concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Finished,
}

/// Percentages shown by the two progress bars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub current_percent: u8,
    pub total_percent: u8,
}

#[derive(Debug, Default)]
pub struct RunTracker {
    aggregator: ProgressAggregator,
    state: RunState,
    submitted: Option<WorkflowGraph>,
    prompt_id: Option<PromptId>,
    executing: Option<NodeId>,
    preview: Option<PreviewImage>,
    expected_images: Option<usize>,
    outputs: Option<OutputImageMap>,
    last_error: Option<String>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly submitted workflow.
    pub fn submit(&mut self, workflow: WorkflowGraph) {
        self.aggregator.reset();
        self.aggregator.initialize(&workflow);
        self.submitted = Some(workflow);
        self.state = RunState::Running;
        self.prompt_id = None;
        self.executing = None;
        self.preview = None;
        self.expected_images = None;
        self.outputs = None;
        self.last_error = None;
    }

    pub fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::WorkflowStructure(structure) => self.on_structure(structure),
            ServerMessage::Progress(data) => {
                self.aggregator.on_progress(data.value, data.max);
            }
            ServerMessage::NodeExecuting(data) => {
                if data.node.is_none() {
                    tracing::debug!("Last node finished");
                }
                self.executing = data.node;
            }
            ServerMessage::NodeExecuted(data) => {
                tracing::debug!(node = %data.node, "Node executed");
            }
            ServerMessage::Preview(image) => self.preview = Some(image),
            ServerMessage::TotalImages(count) => self.expected_images = Some(count),
            ServerMessage::Completed(outputs) => {
                self.aggregator.complete();
                self.executing = None;
                self.outputs = Some(outputs);
                self.state = RunState::Finished;
            }
            ServerMessage::Error { message } => {
                self.aggregator.reset();
                self.executing = None;
                self.last_error = Some(message);
                self.state = RunState::Idle;
            }
        }
    }

    fn on_structure(&mut self, structure: WorkflowStructure) {
        if self.prompt_id.as_ref() == Some(&structure.prompt_id) {
            // Repeated on every queue status change while the run executes
            return;
        }

        match &self.submitted {
            Some(local) => {
                if local.len() != structure.total_nodes {
                    tracing::warn!(
                        local = local.len(),
                        server = structure.total_nodes,
                        prompt_id = %structure.prompt_id,
                        "Node count mismatch between submitted and running workflow"
                    );
                }
                self.aggregator.initialize(local);
            }
            None => match WorkflowGraph::from_value(structure.workflow) {
                Ok(graph) => self.aggregator.initialize(&graph),
                Err(e) => {
                    tracing::warn!(error = %e, "Running workflow could not be parsed");
                    self.aggregator.reset();
                }
            },
        }

        self.prompt_id = Some(structure.prompt_id);
        self.state = RunState::Running;
    }

    pub fn view(&self) -> ProgressView {
        ProgressView {
            current_percent: self.aggregator.current_percentage(),
            total_percent: self.aggregator.total_percentage(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn prompt_id(&self) -> Option<&PromptId> {
        self.prompt_id.as_ref()
    }

    pub fn executing_node(&self) -> Option<&NodeId> {
        self.executing.as_ref()
    }

    pub fn latest_preview(&self) -> Option<&PreviewImage> {
        self.preview.as_ref()
    }

    pub fn expected_images(&self) -> Option<usize> {
        self.expected_images
    }

    pub fn outputs(&self) -> Option<&OutputImageMap> {
        self.outputs.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comfyui_mini_domain::WorkflowNode;
    use comfyui_mini_shared::{NodeExecutingData, ProgressData};
    use serde_json::{json, Map};

    fn independent(n: usize) -> WorkflowGraph {
        (1..=n)
            .map(|i| (NodeId::from(i.to_string()), WorkflowNode::new("LoadImage")))
            .collect()
    }

    fn structure(prompt_id: &str, total_nodes: usize, workflow: serde_json::Value) -> ServerMessage {
        ServerMessage::WorkflowStructure(WorkflowStructure {
            total_nodes,
            workflow,
            prompt_id: PromptId::from(prompt_id),
        })
    }

    fn progress(value: f64, max: f64) -> ServerMessage {
        ServerMessage::Progress(ProgressData::new(value, max))
    }

    #[test]
    fn independent_nodes_progress_linearly() {
        let mut tracker = RunTracker::new();
        tracker.submit(independent(3));
        tracker.handle(structure("p1", 3, json!({})));

        let mut totals = Vec::new();
        for _ in 0..3 {
            tracker.handle(progress(100.0, 100.0));
            totals.push(tracker.view().total_percent);
        }
        assert_eq!(totals, [33, 67, 100]);
        assert_eq!(tracker.state(), RunState::Running);
    }

    #[test]
    fn repeated_structure_keeps_progress() {
        let mut tracker = RunTracker::new();
        tracker.submit(independent(2));
        tracker.handle(structure("p1", 2, json!({})));
        tracker.handle(progress(1.0, 1.0));
        tracker.handle(structure("p1", 2, json!({})));

        assert_eq!(tracker.view().total_percent, 50);
        assert_eq!(tracker.prompt_id().map(PromptId::as_str), Some("p1"));
    }

    #[test]
    fn server_graph_is_used_without_local_submission() {
        let mut tracker = RunTracker::new();
        tracker.handle(structure(
            "p9",
            2,
            json!({
                "1": {"class_type": "A", "inputs": {}},
                "2": {"class_type": "B", "inputs": {}}
            }),
        ));
        tracker.handle(progress(5.0, 5.0));

        assert_eq!(tracker.view().total_percent, 50);
        assert_eq!(tracker.state(), RunState::Running);
    }

    #[test]
    fn completion_forces_full_bars() {
        let mut tracker = RunTracker::new();
        tracker.submit(independent(4));
        tracker.handle(progress(3.0, 10.0));
        tracker.handle(ServerMessage::TotalImages(1));

        let mut outputs = OutputImageMap::new();
        outputs.extend_node("9", vec!["/comfyui/image?filename=a.png&type=output".to_string()]);
        tracker.handle(ServerMessage::Completed(outputs));

        assert_eq!(
            tracker.view(),
            ProgressView {
                current_percent: 100,
                total_percent: 100
            }
        );
        assert_eq!(tracker.state(), RunState::Finished);
        assert_eq!(tracker.expected_images(), Some(1));
        assert_eq!(tracker.outputs().map(OutputImageMap::total_count), Some(1));
    }

    #[test]
    fn error_resets_to_idle() {
        let mut tracker = RunTracker::new();
        tracker.submit(independent(2));
        tracker.handle(progress(1.0, 1.0));
        tracker.handle(ServerMessage::error("Backend unavailable"));

        assert_eq!(tracker.state(), RunState::Idle);
        assert_eq!(tracker.view(), ProgressView::default());
        assert_eq!(tracker.last_error(), Some("Backend unavailable"));
    }

    #[test]
    fn executing_node_and_preview_are_tracked() {
        let mut tracker = RunTracker::new();
        tracker.submit(independent(1));
        tracker.handle(ServerMessage::NodeExecuting(NodeExecutingData {
            node: Some(NodeId::from("1")),
            display_node: None,
            prompt_id: None,
            extra: Map::new(),
        }));
        assert_eq!(tracker.executing_node().map(NodeId::as_str), Some("1"));

        tracker.handle(ServerMessage::Preview(PreviewImage {
            image: "dGVzdA==".to_string(),
            mimetype: "image/jpeg".to_string(),
        }));
        assert_eq!(
            tracker.latest_preview().map(|p| p.mimetype.as_str()),
            Some("image/jpeg")
        );

        tracker.handle(ServerMessage::NodeExecuting(NodeExecutingData {
            node: None,
            display_node: None,
            prompt_id: None,
            extra: Map::new(),
        }));
        assert!(tracker.executing_node().is_none());
    }
}
