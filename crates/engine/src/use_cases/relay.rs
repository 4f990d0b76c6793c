//! Upstream relay: turns backend frames into browser messages.
//!
//! Frames are handled one at a time in arrival order. Binary frames are live
//! previews, text frames are JSON events. A frame that cannot be decoded is
//! logged and dropped; any other failure while handling a frame becomes a
//! single `error` message to the browser.
//!
//! The backend socket also carries broadcasts that have nothing to do with
//! the run: the greeting `status` sent on connect and queue updates caused
//! by other clients. A drained-queue status only ends the run once an
//! execution event for the run's prompt has been seen, and terminal events
//! of other prompts are ignored.

use std::sync::Arc;

use comfyui_mini_domain::{DomainError, PromptId};
use comfyui_mini_shared::{
    decode_preview, BackendEvent, ServerMessage, StatusData, WorkflowStructure,
};
use tokio::sync::mpsc;

use crate::infrastructure::ports::{BackendError, BackendFrame};
use crate::use_cases::outputs::OutputImageResolver;
use crate::use_cases::queue::QueueMonitor;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(#[from] DomainError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("No output images found for prompt {0}")]
    NoOutputs(PromptId),
    #[error("Backend closed the connection before the run finished")]
    BackendClosed,
    #[error("Browser connection closed")]
    ClientGone,
}

/// What the session should do with the backend socket after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Continue,
    Close,
}

/// Send one message to the browser side of the session.
pub(crate) async fn send(
    out: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
) -> Result<(), RelayError> {
    out.send(message).await.map_err(|_| RelayError::ClientGone)
}

/// What the relay knows about the run it is following.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWatch {
    prompt_id: PromptId,
    started: bool,
}

impl RunWatch {
    pub fn new(prompt_id: PromptId) -> Self {
        Self {
            prompt_id,
            started: false,
        }
    }

    pub fn prompt_id(&self) -> &PromptId {
        &self.prompt_id
    }

    /// Whether the backend reported execution of this run yet.
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Execution events are only sent to the run's own socket; older
    /// backends omit the prompt id.
    fn observe(&mut self, prompt_id: Option<&str>) {
        if prompt_id.is_none_or(|id| id == self.prompt_id.as_str()) {
            self.started = true;
        }
    }

    fn owns(&self, prompt_id: &PromptId) -> bool {
        *prompt_id == self.prompt_id
    }
}

pub struct UpstreamRelay {
    queue: Arc<QueueMonitor>,
    resolver: Arc<OutputImageResolver>,
}

impl UpstreamRelay {
    pub fn new(queue: Arc<QueueMonitor>, resolver: Arc<OutputImageResolver>) -> Self {
        Self { queue, resolver }
    }

    /// Handle one backend frame.
    ///
    /// Only [`RelayError::ClientGone`] is returned; every other failure is
    /// reported to the browser and the run goes on, unless the frame was the
    /// run's terminal event.
    pub async fn handle_frame(
        &self,
        frame: BackendFrame,
        watch: &mut RunWatch,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<RelayOutcome, RelayError> {
        match frame {
            BackendFrame::Binary(bytes) => {
                match decode_preview(&bytes) {
                    Ok(image) => send(out, ServerMessage::Preview(image)).await?,
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable preview frame"),
                }
                Ok(RelayOutcome::Continue)
            }
            BackendFrame::Text(text) => {
                let event = match BackendEvent::decode(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed backend frame");
                        return Ok(RelayOutcome::Continue);
                    }
                };
                let terminal = match &event {
                    BackendEvent::ExecutionSuccess(result)
                    | BackendEvent::ExecutionInterrupted(result) => watch.owns(&result.prompt_id),
                    _ => false,
                };

                match self.handle_event(event, watch, out).await {
                    Ok(outcome) => Ok(outcome),
                    Err(RelayError::ClientGone) => Err(RelayError::ClientGone),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to relay backend event");
                        send(out, ServerMessage::error(e.to_string())).await?;
                        Ok(if terminal {
                            RelayOutcome::Close
                        } else {
                            RelayOutcome::Continue
                        })
                    }
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: BackendEvent,
        watch: &mut RunWatch,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<RelayOutcome, RelayError> {
        match event {
            BackendEvent::Status(status) => self.handle_status(status, watch, out).await,
            BackendEvent::Progress(data) => {
                watch.observe(data.extra.get("prompt_id").and_then(|id| id.as_str()));
                send(out, ServerMessage::Progress(data)).await?;
                Ok(RelayOutcome::Continue)
            }
            BackendEvent::Executing(data) => {
                watch.observe(data.prompt_id.as_ref().map(|id| id.as_str()));
                send(out, ServerMessage::NodeExecuting(data)).await?;
                Ok(RelayOutcome::Continue)
            }
            BackendEvent::Executed(data) => {
                watch.observe(data.prompt_id.as_ref().map(|id| id.as_str()));
                send(out, ServerMessage::NodeExecuted(data)).await?;
                Ok(RelayOutcome::Continue)
            }
            BackendEvent::ExecutionSuccess(result) | BackendEvent::ExecutionInterrupted(result)
                if !watch.owns(&result.prompt_id) =>
            {
                tracing::debug!(
                    prompt_id = %result.prompt_id,
                    watching = %watch.prompt_id(),
                    "Ignoring terminal event of another prompt"
                );
                Ok(RelayOutcome::Continue)
            }
            BackendEvent::ExecutionSuccess(result) | BackendEvent::ExecutionInterrupted(result) => {
                let outputs = self.resolver.resolve(&result.prompt_id).await?;
                if outputs.is_empty() {
                    tracing::info!(
                        prompt_id = %result.prompt_id,
                        "Run finished without resolvable outputs"
                    );
                } else {
                    send(out, ServerMessage::TotalImages(outputs.total_count())).await?;
                    send(out, ServerMessage::Completed(outputs)).await?;
                }
                Ok(RelayOutcome::Close)
            }
            BackendEvent::Unknown { kind } => {
                tracing::debug!(kind = %kind, "Ignoring unrecognized backend event");
                Ok(RelayOutcome::Continue)
            }
        }
    }

    async fn handle_status(
        &self,
        status: StatusData,
        watch: &RunWatch,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<RelayOutcome, RelayError> {
        if status.sid.is_some() {
            tracing::debug!("Skipping backend connect greeting");
            return Ok(RelayOutcome::Continue);
        }
        if status.queue_remaining() == Some(0) {
            if !watch.has_started() {
                tracing::debug!(
                    prompt_id = %watch.prompt_id(),
                    "Ignoring drained-queue status received before the run started"
                );
                return Ok(RelayOutcome::Continue);
            }
            tracing::debug!("Backend queue drained, closing backend connection");
            return Ok(RelayOutcome::Close);
        }

        let queue = self.queue.poll().await?;
        if let Some(item) = queue.running.into_iter().next() {
            send(out, ServerMessage::WorkflowStructure(structure_of(item))).await?;
        }
        Ok(RelayOutcome::Continue)
    }
}

pub(crate) fn structure_of(item: comfyui_mini_domain::QueueItem) -> WorkflowStructure {
    WorkflowStructure {
        total_nodes: item.node_count(),
        prompt_id: item.prompt_id,
        workflow: item.workflow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::ports::MockBackendPort;
    use crate::use_cases::outputs::RetryPolicy;
    use comfyui_mini_domain::{QueueItem, QueueSnapshot};
    use serde_json::json;
    use std::time::Duration;

    fn relay(backend: MockBackendPort) -> UpstreamRelay {
        let backend: Arc<dyn crate::infrastructure::ports::BackendPort> = Arc::new(backend);
        let queue = Arc::new(QueueMonitor::new(
            backend.clone(),
            Arc::new(FixedClock::at(0)),
            50,
        ));
        let resolver = Arc::new(OutputImageResolver::new(
            backend,
            "comfyui",
            RetryPolicy {
                max_retries: 3,
                delay: Duration::ZERO,
            },
        ));
        UpstreamRelay::new(queue, resolver)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn watch() -> RunWatch {
        RunWatch::new(PromptId::from("p1"))
    }

    fn started() -> RunWatch {
        let mut watch = watch();
        watch.observe(Some("p1"));
        watch
    }

    fn text(value: serde_json::Value) -> BackendFrame {
        BackendFrame::Text(value.to_string())
    }

    #[tokio::test]
    async fn drained_queue_closes_without_querying() {
        let mut backend = MockBackendPort::new();
        backend.expect_get_queue().times(0);
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(
                text(json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 0}}}})),
                &mut started(),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Close);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn busy_queue_announces_running_workflow() {
        let mut backend = MockBackendPort::new();
        backend.expect_get_queue().times(1).returning(|| {
            Ok(QueueSnapshot {
                running: vec![QueueItem::new(
                    1,
                    "p1",
                    json!({"1": {"class_type": "A", "inputs": {}}, "2": {"class_type": "B", "inputs": {}}}),
                )],
                pending: Vec::new(),
            })
        });
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(
                text(json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}}})),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Continue);
        match drain(&mut rx).as_slice() {
            [ServerMessage::WorkflowStructure(structure)] => {
                assert_eq!(structure.total_nodes, 2);
                assert_eq!(structure.prompt_id.as_str(), "p1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn idle_queue_emits_nothing() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_queue()
            .returning(|| Ok(QueueSnapshot::default()));
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        relay
            .handle_frame(
                text(json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 2}}}})),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn execution_events_are_renamed() {
        let relay = relay(MockBackendPort::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut watch = watch();

        for frame in [
            json!({"type": "progress", "data": {"value": 3, "max": 20, "prompt_id": "p1"}}),
            json!({"type": "executing", "data": {"node": "3", "display_node": "3", "prompt_id": "p1"}}),
            json!({"type": "executed", "data": {"node": "9", "output": {"images": []}, "prompt_id": "p1"}}),
            json!({"type": "execution_cached", "data": {"nodes": []}}),
        ] {
            let outcome = relay
                .handle_frame(text(frame), &mut watch, &tx)
                .await
                .unwrap();
            assert_eq!(outcome, RelayOutcome::Continue);
        }

        let kinds: Vec<_> = drain(&mut rx).iter().map(ServerMessage::kind).collect();
        assert_eq!(kinds, ["progress", "node_executing", "node_executed"]);
        assert!(watch.has_started());
    }

    #[tokio::test]
    async fn preview_frames_become_base64_images() {
        let relay = relay(MockBackendPort::new());
        let (tx, mut rx) = mpsc::channel(8);

        relay
            .handle_frame(
                BackendFrame::Binary(vec![0, 0, 0, 1, 0, 0, 0, 0, b't', b'e', b's', b't']),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();
        relay
            .handle_frame(BackendFrame::Binary(vec![0, 0, 1]), &mut watch(), &tx)
            .await
            .unwrap();

        match drain(&mut rx).as_slice() {
            [ServerMessage::Preview(image)] => {
                assert_eq!(image.image, "dGVzdA==");
                assert_eq!(image.mimetype, "image/jpeg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let relay = relay(MockBackendPort::new());
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(BackendFrame::Text("{not json".to_string()), &mut watch(), &tx)
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn success_without_images_sends_nothing() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(4)
            .returning(|_| Ok(json!({})));
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(
                text(json!({"type": "execution_success", "data": {"prompt_id": "p1"}})),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Close);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn success_sends_count_then_outputs() {
        let mut backend = MockBackendPort::new();
        backend.expect_get_history().returning(|_| {
            Ok(json!({"outputs": {"9": {"images": [
                {"filename": "a.png", "subfolder": "", "type": "output"},
                {"filename": "b.png", "subfolder": "", "type": "output"}
            ]}}}))
        });
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        relay
            .handle_frame(
                text(json!({"type": "execution_interrupted", "data": {"prompt_id": "p1"}})),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();

        match drain(&mut rx).as_slice() {
            [ServerMessage::TotalImages(2), ServerMessage::Completed(outputs)] => {
                assert_eq!(outputs.total_count(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_failure_becomes_error_message() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .returning(|_| Err(BackendError::Unavailable));
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(
                text(json!({"type": "execution_success", "data": {"prompt_id": "p1"}})),
                &mut watch(),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Close);
        assert_eq!(
            drain(&mut rx),
            [ServerMessage::error("Backend unavailable")]
        );
    }

    #[tokio::test]
    async fn closed_browser_stops_the_relay() {
        let relay = relay(MockBackendPort::new());
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let result = relay
            .handle_frame(
                text(json!({"type": "progress", "data": {"value": 1, "max": 2}})),
                &mut watch(),
                &tx,
            )
            .await;
        assert!(matches!(result, Err(RelayError::ClientGone)));
    }

    #[tokio::test]
    async fn connect_greeting_is_skipped() {
        let mut backend = MockBackendPort::new();
        backend.expect_get_queue().times(0);
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay
            .handle_frame(
                text(json!({"type": "status", "data": {
                    "status": {"exec_info": {"queue_remaining": 0}},
                    "sid": "c1"
                }})),
                &mut started(),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Continue);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn drained_queue_before_run_started_is_ignored() {
        let relay = relay(MockBackendPort::new());
        let (tx, _rx) = mpsc::channel(8);
        let mut watch = watch();
        let drained =
            json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 0}}}});

        let outcome = relay
            .handle_frame(text(drained.clone()), &mut watch, &tx)
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Continue);

        relay
            .handle_frame(
                text(json!({"type": "executing", "data": {"node": "3", "prompt_id": "p1"}})),
                &mut watch,
                &tx,
            )
            .await
            .unwrap();
        let outcome = relay
            .handle_frame(text(drained), &mut watch, &tx)
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Close);
    }

    #[tokio::test]
    async fn other_prompts_do_not_start_or_finish_the_run() {
        let mut backend = MockBackendPort::new();
        backend.expect_get_history().times(0);
        let relay = relay(backend);
        let (tx, mut rx) = mpsc::channel(8);
        let mut watch = watch();

        relay
            .handle_frame(
                text(json!({"type": "executing", "data": {"node": "3", "prompt_id": "other"}})),
                &mut watch,
                &tx,
            )
            .await
            .unwrap();
        assert!(!watch.has_started());

        let outcome = relay
            .handle_frame(
                text(json!({"type": "execution_success", "data": {"prompt_id": "other"}})),
                &mut watch,
                &tx,
            )
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Continue);
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
