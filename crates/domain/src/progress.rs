//! Progress aggregation for one workflow run.
//!
//! The backend reports `(value, max)` for whichever node is currently
//! executing, with no node id attached. The aggregator turns that stream plus
//! the count of finished nodes into one total percentage. For graphs with
//! inter-node dependencies the linear estimate is scaled by a multiplier
//! derived from node depths: deep nodes (samplers, decoders) dominate run
//! time, so the bar would otherwise sit near 0% while the cheap depth-0
//! loaders finish.
//!
//! Every terminal event (`value >= max`) counts one finished node. A
//! backend that repeats the terminal event for the same node makes the count
//! run ahead of the real number of finished nodes; the clamp to `total_nodes`
//! is the only guard.
//!
//! A finished node clears the current-node counters, which also drops the
//! in-flight boost of the multiplier. The total therefore never reports less
//! than the highest value it reported since `initialize`.

use serde::Serialize;

use crate::workflow::{analyze, WorkflowGraph};

const DEPTH_WEIGHT: f64 = 0.8;
const PROGRESS_WEIGHT: f64 = 0.6;
const MAX_MULTIPLIER: f64 = 2.0;

/// Snapshot of the counters of an active run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub total_nodes: u32,
    pub completed_nodes: u32,
    pub current_node_progress: f64,
    pub current_node_max: f64,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            total_nodes: 0,
            completed_nodes: 0,
            current_node_progress: 0.0,
            current_node_max: 1.0,
        }
    }
}

/// Depth statistics cached at initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ComplexityProfile {
    average_depth: f64,
    max_depth: u32,
    has_dependencies: bool,
}

/// Converts per-node progress events into a monotonic run percentage.
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    state: ProgressState,
    profile: Option<ComplexityProfile>,
    completed: bool,
    /// Highest total reported since `initialize`
    floor: u8,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a run of `graph`.
    pub fn initialize(&mut self, graph: &WorkflowGraph) {
        let analysis = analyze(graph);
        self.state = ProgressState {
            total_nodes: u32::try_from(graph.len()).unwrap_or(u32::MAX),
            ..ProgressState::default()
        };
        self.profile = Some(ComplexityProfile {
            average_depth: analysis.average_depth(),
            max_depth: analysis.max_depth,
            has_dependencies: analysis.has_dependencies(),
        });
        self.completed = false;
        self.floor = 0;
    }

    /// Zero all counters and forget the cached analysis.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a progress event for the executing node.
    ///
    /// A terminal event (`max > 0 && value >= max`) counts one finished node
    /// and clears the current-node counters, so the finished node is not
    /// counted again through its partial contribution.
    pub fn on_progress(&mut self, value: f64, max: f64) {
        if max > 0.0 && value >= max {
            self.state.completed_nodes = self
                .state
                .completed_nodes
                .saturating_add(1)
                .min(self.state.total_nodes);
            self.state.current_node_progress = 0.0;
            self.state.current_node_max = 1.0;
        } else {
            self.state.current_node_progress = value;
            self.state.current_node_max = max;
        }
        self.floor = self.floor.max(self.estimated_total());
    }

    /// Mark the run finished; both percentages read 100 until the next
    /// `initialize` or `reset`.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Progress of the executing node, 0-100.
    pub fn current_percentage(&self) -> u8 {
        if self.completed {
            return 100;
        }
        to_percent(self.current_ratio())
    }

    /// Progress of the whole run, 0-100.
    pub fn total_percentage(&self) -> u8 {
        if self.completed {
            return 100;
        }
        self.estimated_total().max(self.floor)
    }

    fn estimated_total(&self) -> u8 {
        let total = f64::from(self.state.total_nodes);
        if total <= 0.0 {
            return 0;
        }

        let base = (f64::from(self.state.completed_nodes) / total + self.current_ratio() / total).min(1.0);
        to_percent(base * self.dependency_multiplier())
    }

    fn current_ratio(&self) -> f64 {
        let ProgressState {
            current_node_progress: value,
            current_node_max: max,
            ..
        } = self.state;
        if max <= 0.0 {
            return 0.0;
        }
        let ratio = value / max;
        if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn dependency_multiplier(&self) -> f64 {
        let Some(profile) = self.profile else {
            return 1.0;
        };
        let current = self.current_ratio();
        if !profile.has_dependencies || current <= 0.0 {
            return 1.0;
        }

        let max_depth = f64::from(profile.max_depth);
        let base_multiplier = if max_depth > 0.0 {
            1.0 + (profile.average_depth / max_depth) * DEPTH_WEIGHT
        } else {
            1.0
        };
        let progress_multiplier = 1.0 + current * PROGRESS_WEIGHT;
        let total = f64::from(self.state.total_nodes);
        let complexity_boost = if profile.max_depth > 1 && total > 0.0 {
            1.0 + max_depth / total
        } else {
            1.0
        };

        (base_multiplier * progress_multiplier * complexity_boost).min(MAX_MULTIPLIER)
    }
}

fn to_percent(ratio: f64) -> u8 {
    if !ratio.is_finite() {
        return 0;
    }
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}
