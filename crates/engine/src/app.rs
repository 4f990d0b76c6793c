//! Application state and composition.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::infrastructure::ports::{BackendPort, BackendSocketConnector, ClockPort};
use crate::use_cases::{OutputImageResolver, QueueMonitor, WorkflowRunner};

/// Main application state.
///
/// Built once at startup and passed to HTTP/WebSocket handlers via Axum state.
/// The queue monitor is shared by every session so the finished-run history
/// is process wide.
pub struct App {
    pub config: EngineConfig,
    pub backend: Arc<dyn BackendPort>,
    pub queue: Arc<QueueMonitor>,
    pub runner: Arc<WorkflowRunner>,
}

impl App {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn BackendPort>,
        connector: Arc<dyn BackendSocketConnector>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let queue = Arc::new(QueueMonitor::new(
            backend.clone(),
            clock,
            config.completed_cache_capacity,
        ));
        let resolver = Arc::new(OutputImageResolver::new(
            backend.clone(),
            config.proxy_prefix.clone(),
            config.history_retry,
        ));
        let runner = Arc::new(WorkflowRunner::new(
            backend.clone(),
            connector,
            queue.clone(),
            resolver,
        ));

        Self {
            config,
            backend,
            queue,
            runner,
        }
    }
}
