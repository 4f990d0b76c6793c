//! Workflow graphs and their static analysis.

pub mod dependency;
pub mod graph;
pub mod inputs;

pub use dependency::{analyze, DependencyAnalysis, NodeDependencyInfo};
pub use graph::{as_link, NodeLink, WorkflowGraph, WorkflowNode};
pub use inputs::{discover_inputs, InputType, WorkflowInput};
