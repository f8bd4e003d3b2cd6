//! Helper modules for cargo-rvtest command implementations
//!
//! Shared output, argument and progress handling used by every command
//! handler.

pub mod global_args;
pub mod output;
pub mod progress;

// Re-export commonly used items
pub use global_args::{
    should_use_colors,
    GlobalArgs,
};
pub use output::{
    excerpt,
    render_json,
    OutputFormat,
    OutputManager,
};
pub use progress::{
    format_duration,
    CaseProgress,
};
