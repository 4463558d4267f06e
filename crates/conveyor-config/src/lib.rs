//! # Conveyor Config
//!
//! Layered configuration for the Conveyor consumer: TOML files, a `.env`
//! file, and `CONVEYOR__*` environment variables.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
