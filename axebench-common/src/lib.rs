//! # axebench common library
//!
//! Shared code for the benchmark engine and its front ends:
//! - Event types (BenchEvent enum) and the EventBus broadcaster
//! - Result and sample data model
//! - Configuration model, validation and loading

pub mod config;
pub mod error;
pub mod events;

pub use config::BenchmarkConfig;
pub use error::{Error, Result};
