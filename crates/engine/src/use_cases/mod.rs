//! Use cases - run orchestration on top of the infrastructure ports.
//!
//! - `outputs`: history to output image map, with retries
//! - `queue`: queue polling and finished-run history
//! - `relay`: backend frame to browser message translation
//! - `session`: one submitted workflow run, end to end

pub mod outputs;
pub mod queue;
pub mod relay;
pub mod session;

pub use outputs::{OutputImageResolver, RetryPolicy};
pub use queue::QueueMonitor;
pub use relay::{RelayError, RelayOutcome, RunWatch, UpstreamRelay};
pub use session::WorkflowRunner;
