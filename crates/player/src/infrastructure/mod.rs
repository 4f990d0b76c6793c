//! Infrastructure adapters.

pub mod websocket;

pub use websocket::{ws_endpoint, ClientError, EngineClient, RunStream};
