//! External tool resolution
//!
//! The pipeline shells out to cargo, an objcopy-compatible converter, the
//! HDL compiler and the simulation runtime. Where a tool is picked from a list
//! of candidates the choice goes through a [`ToolResolver`], so tests and
//! pinned toolchains can substitute their own lookup.

use std::{
    collections::HashMap,
    ffi::OsString,
    fmt,
    path::{
        Path,
        PathBuf,
    },
    process::Command,
};

use serde::Serialize;
use tracing::debug;

use crate::{
    config::RvTestConfig,
    error::{
        RvTestError,
        RvTestResult,
    },
};

/// Converters able to turn an ELF executable into a raw binary, probed in
/// order
pub const DEFAULT_OBJCOPY_CANDIDATES: [&str; 7] = [
    "riscv64-unknown-elf-objcopy",
    "riscv32-unknown-elf-objcopy",
    "riscv64-linux-gnu-objcopy",
    "riscv-none-elf-objcopy",
    "llvm-objcopy",
    "rust-objcopy",
    "objcopy",
];

/// A tool picked from a candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTool {
    /// Candidate name that matched
    pub name:    String,
    /// Full path of the executable
    pub path:    PathBuf,
    /// What the tool is used for
    pub purpose: String,
}

impl ResolvedTool {
    /// Start a command running this tool
    pub fn command(&self) -> Command {
        Command::new(&self.path)
    }
}

/// Lookup strategy for external programs
pub trait ToolResolver: fmt::Debug + Send + Sync {
    /// Full path of `program`, if it is available
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Resolve a single configured program
    fn resolve_one(&self, purpose: &str, program: &str) -> RvTestResult<ResolvedTool> {
        self.resolve(purpose, &[program.to_string()])
    }

    /// First available candidate, in order
    fn resolve(&self, purpose: &str, candidates: &[String]) -> RvTestResult<ResolvedTool> {
        for candidate in candidates {
            if let Some(path) = self.locate(candidate) {
                debug!(purpose, tool = %candidate, path = %path.display(), "resolved tool");
                return Ok(ResolvedTool {
                    name: candidate.clone(),
                    path,
                    purpose: purpose.to_string(),
                });
            }
        }

        Err(RvTestError::ToolNotFound {
            purpose:    purpose.to_string(),
            candidates: candidates.to_vec(),
        })
    }
}

/// Resolves programs through `PATH` or an explicit search path
#[derive(Debug, Clone, Default)]
pub struct PathToolResolver {
    search_path: Option<OsString>,
}

impl PathToolResolver {
    /// Search the process `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Search only the given directories
    pub fn with_search_path<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let joined = std::env::join_paths(dirs.into_iter().map(|d| d.as_ref().to_path_buf()))
            .unwrap_or_default();
        Self {
            search_path: Some(joined),
        }
    }
}

impl ToolResolver for PathToolResolver {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => which::which_in(program, Some(paths), Path::new(".")).ok(),
            None => which::which(program).ok(),
        }
    }
}

/// Resolves programs from a fixed name to path table
#[derive(Debug, Clone, Default)]
pub struct StaticToolResolver {
    tools: HashMap<String, PathBuf>,
}

impl StaticToolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as the location of `name`
    pub fn with_tool(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(name.into(), path.into());
        self
    }
}

impl ToolResolver for StaticToolResolver {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.tools.get(program).cloned()
    }
}

/// Availability of one external tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    /// What the pipeline uses the tool for
    pub purpose:    String,
    /// Candidate names that were probed
    pub candidates: Vec<String>,
    /// Resolved tool, if any candidate was found
    pub resolved:   Option<ResolvedTool>,
    /// First line of `--version`, when the tool answered
    pub version:    Option<String>,
}

impl ToolStatus {
    /// Whether any candidate was found
    pub fn available(&self) -> bool {
        self.resolved.is_some()
    }
}

/// Probe every external tool the pipeline may invoke
pub fn tool_report(config: &RvTestConfig, resolver: &dyn ToolResolver) -> Vec<ToolStatus> {
    let entries = [
        ("build tool", vec![config.build.cargo.clone()]),
        ("binary converter", config.tools.objcopy.clone()),
        ("simulation compiler", vec![config.simulation.compiler.clone()]),
        ("simulation runtime", vec![config.simulation.runtime.clone()]),
    ];

    entries
        .into_iter()
        .map(|(purpose, candidates)| {
            let resolved = resolver.resolve(purpose, &candidates).ok();
            let version = resolved.as_ref().and_then(probe_version);
            ToolStatus {
                purpose: purpose.to_string(),
                candidates,
                resolved,
                version,
            }
        })
        .collect()
}

// `vvp` only understands `-V`, the rest answer to `--version`.
fn probe_version(tool: &ResolvedTool) -> Option<String> {
    ["--version", "-V"].iter().find_map(|flag| {
        let output = tool.command().arg(flag).output().ok()?;
        if !output.status.success() && output.stdout.is_empty() {
            return None;
        }
        let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
        String::from_utf8_lossy(&text)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_available_candidate_wins() {
        let resolver = StaticToolResolver::new()
            .with_tool("llvm-objcopy", "/opt/llvm/bin/llvm-objcopy")
            .with_tool("objcopy", "/usr/bin/objcopy");

        let tool = resolver
            .resolve("binary converter", &names(&DEFAULT_OBJCOPY_CANDIDATES))
            .unwrap();

        assert_eq!(tool.name, "llvm-objcopy");
        assert_eq!(tool.path, PathBuf::from("/opt/llvm/bin/llvm-objcopy"));
        assert_eq!(tool.purpose, "binary converter");
    }

    #[test]
    fn test_missing_candidates_reported() {
        let resolver = StaticToolResolver::new();
        let err = resolver.resolve("binary converter", &names(&["a-objcopy", "b-objcopy"])).unwrap_err();

        match err {
            RvTestError::ToolNotFound {
                purpose,
                candidates,
            } => {
                assert_eq!(purpose, "binary converter");
                assert_eq!(candidates, names(&["a-objcopy", "b-objcopy"]));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_search_path_finds_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let resolver = PathToolResolver::with_search_path([temp.path()]);
        assert!(resolver.locate("definitely-not-a-real-tool-name").is_none());
    }

    #[test]
    fn test_report_covers_every_stage() {
        let report = tool_report(&RvTestConfig::default(), &StaticToolResolver::new());
        let purposes: Vec<_> = report.iter().map(|s| s.purpose.as_str()).collect();

        assert_eq!(
            purposes,
            ["build tool", "binary converter", "simulation compiler", "simulation runtime"]
        );
        assert!(report.iter().all(|s| !s.available()));
    }
}
