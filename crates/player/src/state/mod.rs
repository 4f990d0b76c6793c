//! Client-side run state.

pub mod run_tracker;

pub use run_tracker::{ProgressView, RunState, RunTracker};
