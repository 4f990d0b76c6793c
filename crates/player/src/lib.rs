//! ComfyUIMini Player.
//!
//! Client side of a workflow run: the engine WebSocket client and the run
//! tracker that turns relayed messages into progress percentages.

pub mod infrastructure;
pub mod state;

pub use infrastructure::{ClientError, EngineClient, RunStream};
pub use state::{ProgressView, RunState, RunTracker};
