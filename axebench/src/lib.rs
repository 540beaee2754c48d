//! # axebench
//!
//! Voltage/frequency auto-tuning benchmark for Bitaxe mining hardware.
//!
//! **Purpose:** Sweep core voltage and frequency on one device, measure
//! hashrate, temperature and power at each operating point, and leave the
//! device at the best safe setting found.
//!
//! **Architecture:** One [`session::BenchSession`] per service owns the
//! configuration, event bus and [`tuning::SweepController`]; the HTTP/SSE
//! surface in [`api`] and the `axebench-run` console binary are both thin
//! front ends over it.

pub mod api;
pub mod device;
pub mod error;
pub mod results;
pub mod session;
pub mod tuning;

pub use error::{Error, Result};
pub use session::BenchSession;
