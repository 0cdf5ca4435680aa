//! ClipCraft Common Utilities
//!
//! Shared infrastructure for all ClipCraft crates:
//! - Error types and result aliases
//! - Export clock and render-loop pacing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
