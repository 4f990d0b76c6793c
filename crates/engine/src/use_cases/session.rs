//! One workflow run, from submission to the final browser message.
//!
//! Each run owns its backend socket outright and closes it on every exit
//! path. Failures are reported to the browser as a single `error` message;
//! the browser connection stays usable for the next submission.

use std::sync::Arc;

use comfyui_mini_shared::{ServerMessage, WorkflowSubmission};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::infrastructure::ports::{BackendPort, BackendSocket, BackendSocketConnector};
use crate::use_cases::outputs::OutputImageResolver;
use crate::use_cases::queue::QueueMonitor;
use crate::use_cases::relay::{
    send, structure_of, RelayError, RelayOutcome, RunWatch, UpstreamRelay,
};

pub struct WorkflowRunner {
    backend: Arc<dyn BackendPort>,
    connector: Arc<dyn BackendSocketConnector>,
    queue: Arc<QueueMonitor>,
    resolver: Arc<OutputImageResolver>,
    relay: UpstreamRelay,
}

impl WorkflowRunner {
    pub fn new(
        backend: Arc<dyn BackendPort>,
        connector: Arc<dyn BackendSocketConnector>,
        queue: Arc<QueueMonitor>,
        resolver: Arc<OutputImageResolver>,
    ) -> Self {
        let relay = UpstreamRelay::new(queue.clone(), resolver.clone());
        Self {
            backend,
            connector,
            queue,
            resolver,
            relay,
        }
    }

    /// Run `submission` and stream its messages into `out`.
    pub async fn run(&self, submission: WorkflowSubmission, out: &mpsc::Sender<ServerMessage>) {
        match self.try_run(submission, out).await {
            Ok(()) => {}
            Err(RelayError::ClientGone) => {
                tracing::debug!("Browser went away; run continues on the backend");
            }
            Err(e) => {
                tracing::error!(error = %e, "Workflow run failed");
                // The browser may be gone already; nothing else to do then.
                let _ = out.send(ServerMessage::error(e.to_string())).await;
            }
        }
    }

    async fn try_run(
        &self,
        submission: WorkflowSubmission,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), RelayError> {
        submission.workflow.validate()?;

        let client_id = Uuid::new_v4().to_string();
        let mut socket = self.connector.connect(&client_id).await?;
        let result = self
            .drive(socket.as_mut(), &submission, &client_id, out)
            .await;
        socket.close().await;
        result
    }

    async fn drive(
        &self,
        socket: &mut dyn BackendSocket,
        submission: &WorkflowSubmission,
        client_id: &str,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), RelayError> {
        let accepted = self
            .backend
            .queue_prompt(&submission.workflow, client_id)
            .await?;
        tracing::info!(
            prompt_id = %accepted.prompt_id,
            client_id = %client_id,
            nodes = submission.workflow.len(),
            "Workflow queued"
        );

        if !submission.workflow_name.is_empty() {
            self.queue
                .remember_name(&accepted.prompt_id, &submission.workflow_name)
                .await;
        }

        let queue = self.queue.poll().await?;
        let Some(running) = queue.running.into_iter().next() else {
            // Nothing running right after queueing: the backend served the
            // prompt from its cache.
            tracing::debug!(
                prompt_id = %accepted.prompt_id,
                "Prompt finished before tracking began"
            );
            self.queue.forget_name(&accepted.prompt_id).await;
            let outputs = self.resolver.resolve(&accepted.prompt_id).await?;
            if outputs.is_empty() {
                return Err(RelayError::NoOutputs(accepted.prompt_id));
            }
            send(out, ServerMessage::TotalImages(outputs.total_count())).await?;
            send(out, ServerMessage::Completed(outputs)).await?;
            return Ok(());
        };
        send(out, ServerMessage::WorkflowStructure(structure_of(running))).await?;

        let mut watch = RunWatch::new(accepted.prompt_id.clone());
        while let Some(frame) = socket.next_frame().await {
            if self.relay.handle_frame(frame?, &mut watch, out).await? == RelayOutcome::Close {
                tracing::info!(prompt_id = %accepted.prompt_id, "Run finished");
                return Ok(());
            }
        }
        Err(RelayError::BackendClosed)
    }
}
