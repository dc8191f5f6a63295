//! Infrastructure adapters and runtime bootstrap.

pub mod archive;
pub mod client;
pub mod error;
pub mod render;
pub mod telemetry;
