//! Error taxonomy for the regression pipeline
//!
//! Every fallible operation in this crate returns [`RvTestResult`]. Errors are
//! grouped by the pipeline stage that produced them so the regression engine
//! can turn them into tagged verdict diagnostics.

use std::{
    io,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use thiserror::Error;

/// Result alias used throughout the crate
pub type RvTestResult<T> = Result<T, RvTestError>;

/// Errors raised while building, preparing, simulating or verifying a test
#[derive(Debug, Error)]
pub enum RvTestError {
    /// Malformed or missing configuration, descriptor or test specification
    #[error("{0}")]
    Config(String),

    /// Core directory or descriptor missing, or descriptor invalid
    #[error("core '{name}' not found: {reason}")]
    CoreNotFound {
        /// Requested core name
        name:   String,
        /// Why the core could not be loaded
        reason: String,
    },

    /// Project directory does not exist
    #[error("project '{name}' not found in {}", .dir.display())]
    ProjectNotFound {
        /// Requested project name
        name: String,
        /// Directory that was searched
        dir:  PathBuf,
    },

    /// External build exited with a non-zero status
    #[error("build failed for project '{project}':\n{stderr}")]
    Build {
        /// Project being built
        project: String,
        /// Captured standard error of the build
        stderr:  String,
    },

    /// Naming-convention search for the built executable came up empty
    #[error(
        "binary not found in {}. Tried: {attempted:?}. Available executables: {available:?}",
        .searched.display()
    )]
    ArtifactNotFound {
        /// Build profile directory that was searched
        searched:  PathBuf,
        /// Candidate names in search order
        attempted: Vec<String>,
        /// Executable files actually present
        available: Vec<String>,
    },

    /// None of the candidate tools is installed
    #[error("no {purpose} found on the search path (tried: {})", .candidates.join(", "))]
    ToolNotFound {
        /// What the tool is needed for
        purpose:    String,
        /// Candidate program names in probe order
        candidates: Vec<String>,
    },

    /// ELF to raw binary conversion failed
    #[error("binary conversion failed: {stderr}")]
    Conversion {
        /// Captured standard error of the converter
        stderr: String,
    },

    /// Simulator compiler rejected the prepared sources
    #[error("simulation compile failed:\n{stderr}")]
    CompilationFailed {
        /// Compiler standard output
        stdout: String,
        /// Compiler standard error
        stderr: String,
    },

    /// Simulation ran but exited unsuccessfully
    #[error("simulation exited with {}{}", exit_label(.exit_code), stderr_suffix(.stderr))]
    SimulationFailed {
        /// Exit code, absent when killed by a signal
        exit_code: Option<i32>,
        /// Simulator standard error
        stderr:    String,
    },

    /// Simulation did not finish within its budget and was killed
    #[error("simulation exceeded its timeout of {}ms and was killed", .limit.as_millis())]
    Timeout {
        /// The enforced wall-clock limit
        limit: Duration,
    },

    /// Captured device output lacks an expected substring
    #[error("expected output not found: '{expected}'")]
    ExpectedOutputMissing {
        /// First expected substring that was missing
        expected: String,
    },

    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path involved in the failing operation
        path:   PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// External program could not be started at all
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source:  io::Error,
    },
}

impl RvTestError {
    /// Wrap an I/O error with the path it concerns
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a spawn failure with the program name
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Stable tag naming the error class, used as the verdict diagnostic prefix
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::CoreNotFound { .. } => "CoreNotFound",
            Self::ProjectNotFound { .. } => "ProjectNotFound",
            Self::Build { .. } => "BuildError",
            Self::ArtifactNotFound { .. } => "ArtifactNotFoundError",
            Self::ToolNotFound { .. } => "ToolNotFoundError",
            Self::Conversion { .. } => "ConversionError",
            Self::CompilationFailed { .. } => "CompilationFailed",
            Self::SimulationFailed { .. } => "SimulationError",
            Self::Timeout { .. } => "TimeoutError",
            Self::ExpectedOutputMissing { .. } => "ExpectedOutputMissing",
            Self::Io { .. } => "IoError",
            Self::Spawn { .. } => "SpawnError",
        }
    }

    /// Whether this error needs operator intervention rather than a code fix
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::CoreNotFound { .. }
                | Self::ProjectNotFound { .. }
                | Self::ToolNotFound { .. }
                | Self::Spawn { .. }
        )
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() { String::new() } else { format!(":\n{}", trimmed) }
}
