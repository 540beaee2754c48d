//! HTTP control surface
//!
//! REST endpoints for configuration, run control and result files, plus an
//! SSE stream of benchmark events at `/events`.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
