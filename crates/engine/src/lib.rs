//! ComfyUIMini Engine library.
//!
//! Server side of ComfyUIMini: relays ComfyUI run progress to browsers and
//! fronts the ComfyUI HTTP API.
//!
//! ## Structure
//!
//! - `use_cases/` - Run orchestration (relay, queue history, output resolution)
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - HTTP and WebSocket entry points
//! - `app` - Application composition
//! - `config` - Environment configuration

pub mod api;
pub mod app;
pub mod config;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
pub use config::EngineConfig;
