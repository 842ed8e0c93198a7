//! # memgate Utilities
//!
//! Shared helpers for the memgate workspace. Currently the `tracing`
//! subscriber setup used by the CLI.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_for_interactive, init_logging_with_level, LogFormat, LogGuard, LogLevel, LogSettings,
};
pub use tracing::{debug, error, info, trace, warn};
