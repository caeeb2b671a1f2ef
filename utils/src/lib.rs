//! Shared infrastructure utilities for Anvil.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`ansi`**: Terminal escape stripping for captured process output
//! - **`diff`**: Unified patches and change stats
//! - **`text`**: Output truncation

pub mod ansi;
pub mod atomic_write;
pub mod diff;
pub mod text;

pub use ansi::strip_terminal_escapes;
pub use atomic_write::atomic_write;
pub use diff::{DiffStats, diff_stats, unified_patch};
pub use text::{TRUNCATION_MARKER, truncate_output};
