//! Progress reporting module
//!
//! `tracker` is the engine-core progress tracker (C2): atomic counters with
//! parent aggregation and debounced reporting. `reporter` is a presentation
//! layer on top of it for interactive use by the demo binary.

mod reporter;
mod tracker;

pub use reporter::*;
pub use tracker::{ProgressHandler, ProgressSnapshot, ProgressTracker};
