//! ComfyUIMini Protocol - wire types for the browser, the server and the backend
//!
//! - Browser ↔ server WebSocket messages ([`WorkflowSubmission`], [`ServerMessage`])
//! - Backend WebSocket events ([`BackendEvent`]) and binary preview frames
//! - Backend HTTP response shapes (`/queue`, `/history`)
//!
//! No I/O happens here; the engine and the player own the sockets.

pub mod error;
pub mod history;
pub mod messages;
pub mod preview;
pub mod queue;
pub mod upstream;

pub use error::{FrameError, ProtocolError};
pub use history::{build_output_map, extract_outputs};
pub use messages::{
    NodeExecutedData, NodeExecutingData, PreviewImage, ProgressData, ServerMessage,
    WorkflowStructure, WorkflowSubmission,
};
pub use preview::{decode_preview, PreviewFormat, PreviewFrame, PREVIEW_HEADER_LEN};
pub use queue::{parse_queue_entry, QueueStatusResponse};
pub use upstream::{BackendEvent, ExecutionResult, StatusData};
