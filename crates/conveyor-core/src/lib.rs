//! # Conveyor Core
//!
//! Shared error definitions and tracing setup for the Conveyor
//! queue-consumer crates.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_tracing, TracingConfig};

// Re-export shaku for dependency injection
pub use shaku::Interface;
