//! Browser WebSocket: workflow submissions in, run messages out.
//!
//! A connection runs at most one workflow at a time. A new submission
//! replaces the previous run, which drops its backend socket. Closing the
//! browser connection stops relaying but never interrupts the prompt on the
//! backend; queued work keeps running.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use comfyui_mini_shared::{ServerMessage, WorkflowSubmission};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app::App;

/// Buffer size for per-connection message channels.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<Arc<App>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, app: Arc<App>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Forward run messages from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_json() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, kind = msg.kind(), "Failed to encode message"),
            }
        }
    });

    let mut run: Option<JoinHandle<()>> = None;

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match WorkflowSubmission::from_json(text.as_str()) {
                Ok(submission) => {
                    if let Some(previous) = run.take() {
                        previous.abort();
                    }
                    tracing::info!(
                        connection_id = %connection_id,
                        workflow_name = %submission.workflow_name,
                        nodes = submission.workflow.len(),
                        "Workflow submitted"
                    );

                    let runner = app.runner.clone();
                    let tx = tx.clone();
                    run = Some(tokio::spawn(async move {
                        runner.run(submission, &tx).await;
                    }));
                }
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse message");
                    let error = ServerMessage::error(format!("Invalid message format: {e}"));
                    if tx.try_send(error).is_err() {
                        tracing::warn!(
                            connection_id = %connection_id,
                            "Failed to send response, channel full or closed"
                        );
                    }
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "WebSocket closed by client");
                break;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Clean up
    if let Some(run) = run {
        run.abort();
    }
    send_task.abort();

    tracing::info!(connection_id = %connection_id, "WebSocket connection terminated");
}
