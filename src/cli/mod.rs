//! CLI-specific utilities for butterfly-compare
//!
//! Progress rendering and row output live here, separate from the library.

pub mod output;
pub mod progress;

pub use output::print_rows;
pub use progress::ProgressManager;
