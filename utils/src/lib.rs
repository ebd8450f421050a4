//! Shared utilities for the harbor workspace.

pub mod logging;

pub use logging::init_tracing;
