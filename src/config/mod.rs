//! Configuration module
//!
//! Provides the engine's process-wide configuration record and the minimal
//! CLI surface used by the demo binary.

mod settings;

pub use settings::*;
