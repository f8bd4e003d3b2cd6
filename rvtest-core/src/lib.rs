//! rvtest core - regression pipeline for Rust programs on simulated RISC-V cores
//!
//! This library turns a directory of embedded Rust projects and a directory of
//! HDL core descriptions into a set of regression cases, and runs each case
//! through the same four stages:
//!
//! - **Build**: `cargo build` for the bare-metal target and locate the
//!   produced executable ([`project`])
//! - **Encode**: convert the executable into a `$readmemh` memory image sized
//!   for the core ([`hex`], [`prepare`])
//! - **Simulate**: compile the HDL sources with the external simulator and run
//!   them under a wall-clock timeout ([`simulate`])
//! - **Verify**: compare the captured UART output against the expected text
//!   ([`regression`])
//!
//! Every stage receives an explicit [`RunContext`] naming its working
//! directory. Nothing in this crate reads or changes the process current
//! directory, which lets the command line front end run cases in parallel.

#![forbid(unsafe_code)]
// Lints configured in Cargo.toml

pub use std::path::{
    Path,
    PathBuf,
};

pub use anyhow::{
    Context,
    Result,
};

pub mod config;
pub mod context;
pub mod cores;
pub mod error;
pub mod hex;
pub mod prepare;
pub mod project;
pub mod regression;
pub mod simulate;
pub mod templates;
pub mod tools;

// Public API
pub use config::{
    BuildProfile,
    RvTestConfig,
};
pub use context::RunContext;
pub use cores::{
    CoreDescriptor,
    CoreRegistry,
};
pub use error::{
    RvTestError,
    RvTestResult,
};
pub use hex::{
    EncodeOptions,
    EncodedImage,
    Endianness,
};
pub use project::{
    BuildArtifact,
    ProjectManager,
};
pub use regression::{
    RegressionReport,
    RegressionRunner,
    TestCase,
    Verdict,
};
pub use simulate::{
    MarkerStatus,
    RunResult,
};
pub use tools::{
    PathToolResolver,
    ToolResolver,
};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Find the regression workspace enclosing the current directory
pub fn detect_workspace_root() -> Result<PathBuf> {
    let current = std::env::current_dir().context("Failed to get current directory")?;
    find_workspace_root(&current).ok_or_else(|| {
        anyhow::anyhow!(
            "Could not find workspace root ({} or a directory with cores/ and projects/)",
            config::CONFIG_FILE
        )
    })
}

/// Walk up from `start` looking for a regression workspace
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| is_workspace_root(dir))
        .map(Path::to_path_buf)
}

fn is_workspace_root(dir: &Path) -> bool {
    dir.join(config::CONFIG_FILE).is_file()
        || (dir.join("cores").is_dir() && dir.join("projects").is_dir())
}
