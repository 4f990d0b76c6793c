//! Backend queue items and the history kept about them between polls.
//!
//! The backend only reports what is running or pending right now. Anything
//! that disappears from both lists between two polls has finished; the
//! [`QueueHistoryTracker`] remembers those runs (bounded) together with the
//! human-readable workflow name the browser submitted them under.
//!
//! A name survives one poll after it was remembered. After that it is kept
//! only while its run is queued or listed as finished; runs that finished
//! before any poll saw them lose their name.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, PromptId};

/// Default number of finished runs kept by the tracker.
pub const DEFAULT_COMPLETED_CAPACITY: usize = 50;

/// One entry of the backend queue.
///
/// The backend sends `[priority, promptId, graph, extraData, outputNodeIds]`;
/// the relay exposes it as an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub priority: i64,
    pub prompt_id: PromptId,
    /// Graph snapshot the run was queued with
    pub workflow: Value,
    #[serde(default)]
    pub extra_data: Value,
    #[serde(default)]
    pub output_node_ids: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
}

impl QueueItem {
    pub fn new(priority: i64, prompt_id: impl Into<PromptId>, workflow: Value) -> Self {
        Self {
            priority,
            prompt_id: prompt_id.into(),
            workflow,
            extra_data: Value::Null,
            output_node_ids: Vec::new(),
            workflow_name: None,
        }
    }

    /// Number of nodes in the queued graph snapshot (0 if it is not an object).
    pub fn node_count(&self) -> usize {
        self.workflow.as_object().map_or(0, |nodes| nodes.len())
    }
}

/// What the backend reported at one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub running: Vec<QueueItem>,
    pub pending: Vec<QueueItem>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    fn active_ids(&self) -> HashSet<&PromptId> {
        self.running
            .iter()
            .chain(self.pending.iter())
            .map(|item| &item.prompt_id)
            .collect()
    }
}

/// A run that left the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedItem {
    #[serde(flatten)]
    pub item: QueueItem,
    pub finished_at: DateTime<Utc>,
}

/// Queue view handed to the browser: backend lists plus finished runs, all
/// carrying their workflow names where known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedQueue {
    pub running: Vec<QueueItem>,
    pub pending: Vec<QueueItem>,
    pub completed: Vec<CompletedItem>,
}

/// Bounded memory of finished runs and of the names runs were submitted under.
#[derive(Debug, Clone)]
pub struct QueueHistoryTracker {
    capacity: usize,
    previous: Vec<QueueItem>,
    completed: Vec<CompletedItem>,
    names: HashMap<PromptId, String>,
    /// Names remembered since the last `observe`
    fresh: HashSet<PromptId>,
}

impl Default for QueueHistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_CAPACITY)
    }
}

impl QueueHistoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            previous: Vec::new(),
            completed: Vec::new(),
            names: HashMap::new(),
            fresh: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remember the name a run was submitted under.
    pub fn remember_name(&mut self, prompt_id: impl Into<PromptId>, name: impl Into<String>) {
        let prompt_id = prompt_id.into();
        self.fresh.insert(prompt_id.clone());
        self.names.insert(prompt_id, name.into());
    }

    /// Drop the name of a run that never showed up in the queue.
    pub fn forget_name(&mut self, prompt_id: &str) {
        self.names.remove(prompt_id);
        self.fresh.remove(prompt_id);
    }

    pub fn name_of(&self, prompt_id: &str) -> Option<&str> {
        self.names.get(prompt_id).map(String::as_str)
    }

    /// Record a new poll result.
    ///
    /// Items of the previous poll that are neither running nor pending any more
    /// are recorded as finished at `now`. Returns the prompt ids recorded by
    /// this call.
    pub fn observe(&mut self, snapshot: &QueueSnapshot, now: DateTime<Utc>) -> Vec<PromptId> {
        let active = snapshot.active_ids();
        let mut finished = Vec::new();

        for item in &self.previous {
            if active.contains(&item.prompt_id) {
                continue;
            }
            if self
                .completed
                .iter()
                .any(|done| done.item.prompt_id == item.prompt_id)
            {
                continue;
            }
            finished.push(item.prompt_id.clone());
            self.completed.push(CompletedItem {
                item: item.clone(),
                finished_at: now,
            });
        }

        self.evict_overflow();
        self.prune_names(&active);
        self.previous = snapshot
            .running
            .iter()
            .chain(snapshot.pending.iter())
            .cloned()
            .collect();
        finished
    }

    /// Attach the remembered workflow name to `item`.
    pub fn enrich(&self, mut item: QueueItem) -> QueueItem {
        if let Some(name) = self.names.get(&item.prompt_id) {
            item.workflow_name = Some(name.clone());
        }
        item
    }

    /// Finished runs, most recently finished first.
    pub fn completed(&self) -> Vec<CompletedItem> {
        let mut items: Vec<CompletedItem> = self
            .completed
            .iter()
            .map(|done| CompletedItem {
                item: self.enrich(done.item.clone()),
                finished_at: done.finished_at,
            })
            .collect();
        // ties: later insertion first
        items.reverse();
        items.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        items
    }

    /// Enriched view of `snapshot` plus the finished runs.
    pub fn view(&self, snapshot: &QueueSnapshot) -> EnrichedQueue {
        EnrichedQueue {
            running: snapshot.running.iter().cloned().map(|i| self.enrich(i)).collect(),
            pending: snapshot.pending.iter().cloned().map(|i| self.enrich(i)).collect(),
            completed: self.completed(),
        }
    }

    fn prune_names(&mut self, active: &HashSet<&PromptId>) {
        let completed = &self.completed;
        let fresh = &self.fresh;
        self.names.retain(|prompt_id, _| {
            fresh.contains(prompt_id)
                || active.contains(prompt_id)
                || completed.iter().any(|done| done.item.prompt_id == *prompt_id)
        });
        self.fresh.clear();
    }

    fn evict_overflow(&mut self) {
        while self.completed.len() > self.capacity {
            let Some(oldest) = self
                .completed
                .iter()
                .enumerate()
                .min_by_key(|(_, done)| done.finished_at)
                .map(|(index, _)| index)
            else {
                break;
            };
            let evicted = self.completed.remove(oldest);
            self.names.remove(&evicted.item.prompt_id);
        }
    }
}
