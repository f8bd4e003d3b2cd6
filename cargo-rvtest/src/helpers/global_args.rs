//! Global argument propagation helper
//!
//! Collects the flags every subcommand honors so command handlers receive one
//! value instead of reaching back into the parsed CLI.

use std::path::{
    Path,
    PathBuf,
};

use anyhow::{
    Context,
    Result,
};
use atty::Stream;
use rvtest_core::{
    config::{
        BuildProfile,
        RvTestConfig,
    },
    detect_workspace_root,
    find_workspace_root,
};
use tracing::debug;

use super::{
    OutputFormat,
    OutputManager,
};
use crate::{
    Cli,
    OutputFormatArg,
    ProfileArg,
};

/// Global arguments propagated to all commands
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    pub verbose: bool,

    /// Build profile override from the command line
    pub profile: Option<BuildProfile>,

    /// Explicit workspace root
    pub workspace: Option<PathBuf>,

    pub output_format: OutputFormat,

    /// Output manager configured with format and color settings
    pub output: OutputManager,
}

impl GlobalArgs {
    pub fn from_cli(cli: &Cli) -> Self {
        let output_format = match cli.output {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        };
        let output = OutputManager::new(output_format).with_color(should_use_colors(output_format));

        Self {
            verbose: cli.verbose,
            profile: cli.profile.map(|p| match p {
                ProfileArg::Debug => BuildProfile::Debug,
                ProfileArg::Release => BuildProfile::Release,
            }),
            workspace: cli.workspace.clone(),
            output_format,
            output,
        }
    }

    pub fn is_json_mode(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    /// Workspace root from `--workspace`, or found by walking up from the
    /// current directory
    pub fn workspace_root(&self) -> Result<PathBuf> {
        match &self.workspace {
            Some(dir) => {
                let dir = dir
                    .canonicalize()
                    .with_context(|| format!("Workspace directory {} not found", dir.display()))?;
                Ok(find_workspace_root(&dir).unwrap_or(dir))
            },
            None => detect_workspace_root(),
        }
    }

    /// Load `rvtest.toml` for `root` and apply command-line overrides
    pub fn load_config(&self, root: &Path) -> Result<RvTestConfig> {
        let mut config = RvTestConfig::load_for_workspace(root)
            .with_context(|| format!("Failed to load configuration for {}", root.display()))?;
        if let Some(profile) = self.profile {
            config.build.profile = profile;
        }
        debug!(root = %root.display(), profile = %config.build.profile, "configuration loaded");
        Ok(config)
    }

    /// Workspace root and its configuration
    pub fn workspace(&self) -> Result<(PathBuf, RvTestConfig)> {
        let root = self.workspace_root()?;
        let config = self.load_config(&root)?;
        Ok((root, config))
    }
}

/// Colors only for human output on a terminal
pub fn should_use_colors(output_format: OutputFormat) -> bool {
    match output_format {
        OutputFormat::Human => atty::is(Stream::Stdout),
        OutputFormat::Json => false,
    }
}
