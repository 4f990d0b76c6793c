//! ComfyUIMini Player - submit a workflow file and follow its progress.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use comfyui_mini_domain::WorkflowGraph;
use comfyui_mini_player::{EngineClient, RunState, RunTracker};
use comfyui_mini_shared::{ServerMessage, WorkflowSubmission};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Submit a ComfyUI API-format workflow to a ComfyUIMini engine
#[derive(Parser, Debug)]
#[command(name = "comfyui-mini-player")]
#[command(version, about, long_about = None)]
struct Args {
    /// Engine address (`http://host:port` or a `ws://` URL)
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Name shown in the engine's queue (default: file name)
    #[arg(long)]
    name: Option<String>,

    /// Connection timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Path to the workflow JSON file
    workflow_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyui_mini_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let raw = tokio::fs::read_to_string(&args.workflow_file)
        .await
        .with_context(|| format!("reading {}", args.workflow_file.display()))?;
    let workflow: WorkflowGraph =
        serde_json::from_str(&raw).context("workflow file is not an API-format workflow")?;
    let workflow_name = args.name.clone().unwrap_or_else(|| {
        args.workflow_file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let client = EngineClient::new(&args.server, Duration::from_millis(args.connect_timeout_ms))?;
    let mut tracker = RunTracker::new();
    tracker.submit(workflow.clone());

    let submission = WorkflowSubmission {
        workflow,
        workflow_name,
    };
    let mut run = client.submit(&submission).await?;
    tracing::info!(
        url = client.url(),
        workflow = %submission.workflow_name,
        nodes = submission.workflow.len(),
        "Workflow submitted"
    );

    loop {
        let message = tokio::select! {
            message = run.next_message() => message,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopped listening; the queued run keeps going on the server");
                break;
            }
        };

        let Some(message) = message else {
            bail!("engine closed the connection before the run finished");
        };
        let message = message?;
        let kind = message.kind();
        let status_changed = matches!(
            message,
            ServerMessage::Progress(_) | ServerMessage::WorkflowStructure(_)
        );
        tracker.handle(message);

        if status_changed {
            let view = tracker.view();
            println!(
                "node {:>3}% | total {:>3}%",
                view.current_percent, view.total_percent
            );
        }

        match tracker.state() {
            RunState::Finished => {
                if let Some(outputs) = tracker.outputs() {
                    for (node, urls) in outputs.iter() {
                        for url in urls {
                            println!("{node}: {url}");
                        }
                    }
                }
                break;
            }
            RunState::Idle if kind == "error" => {
                bail!(
                    "run failed: {}",
                    tracker.last_error().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }

    run.close().await;
    Ok(())
}
