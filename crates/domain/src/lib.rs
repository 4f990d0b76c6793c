pub mod error;
pub mod ids;
pub mod outputs;
pub mod progress;
pub mod queue;
pub mod workflow;

pub use error::DomainError;
pub use ids::{NodeId, PromptId};
pub use outputs::{OutputFile, OutputImageMap, StorageArea};
pub use progress::{ProgressAggregator, ProgressState};
pub use queue::{
    CompletedItem, EnrichedQueue, QueueHistoryTracker, QueueItem, QueueSnapshot,
    DEFAULT_COMPLETED_CAPACITY,
};
pub use workflow::{
    analyze, discover_inputs, DependencyAnalysis, InputType, NodeDependencyInfo, WorkflowGraph,
    WorkflowInput, WorkflowNode,
};
