//! Infrastructure - external dependency implementations (ports + adapters).

pub mod backend_socket;
pub mod clock;
pub mod comfyui;
pub mod ports;
