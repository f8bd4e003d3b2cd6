//! Orchestrator configuration (`rvtest.toml`)
//!
//! Every key is optional. A missing file yields the defaults, which describe
//! the conventional layout: `projects/`, `cores/`, `output/`, release builds for
//! `riscv32i-unknown-none-elf`, and Icarus Verilog as the simulator.

use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    cores::MAX_MEMORY_BYTES,
    error::{
        RvTestError,
        RvTestResult,
    },
    tools::DEFAULT_OBJCOPY_CANDIDATES,
};

/// Configuration file name looked up at the workspace root
pub const CONFIG_FILE: &str = "rvtest.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RvTestConfig {
    /// Directory layout of the regression workspace
    #[serde(default)]
    pub workspace:  WorkspaceSettings,

    /// How target programs are built
    #[serde(default)]
    pub build:      BuildSettings,

    /// Simulator invocation and file naming
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// Regression defaults
    #[serde(default)]
    pub tests:      TestSettings,

    /// External tool candidates
    #[serde(default)]
    pub tools:      ToolSettings,
}

/// Directory layout, relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_cores_dir")]
    pub cores_dir:    PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir:   PathBuf,
}

/// Build settings for target programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Cargo executable
    #[serde(default = "default_cargo")]
    pub cargo:   String,
    /// Target triple passed to `--target`
    #[serde(default = "default_target")]
    pub target:  String,
    /// Profile used by the regression run
    #[serde(default)]
    pub profile: BuildProfile,
}

/// Build profiles available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    /// Unoptimized build with debug info
    Debug,
    /// Optimized build
    #[default]
    Release,
}

impl BuildProfile {
    /// Name of the profile directory under `target/<triple>/`
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }

    /// Extra cargo arguments selecting this profile
    pub fn cargo_args(self) -> &'static [&'static str] {
        match self {
            BuildProfile::Debug => &[],
            BuildProfile::Release => &["--release"],
        }
    }
}

impl fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for BuildProfile {
    type Err = RvTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" | "dev" => Ok(BuildProfile::Debug),
            "release" => Ok(BuildProfile::Release),
            other => Err(RvTestError::Config(format!(
                "Invalid build profile '{}'. Valid profiles: debug, release",
                other
            ))),
        }
    }
}

/// Simulator invocation and the file names exchanged with the testbench
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// HDL compiler (`iverilog`)
    #[serde(default = "default_compiler")]
    pub compiler:           String,
    /// Arguments placed before `-o <executable>`
    #[serde(default = "default_compiler_args")]
    pub compiler_args:      Vec<String>,
    /// Simulation runtime (`vvp`)
    #[serde(default = "default_runtime")]
    pub runtime:            String,
    /// Arguments placed before the executable
    #[serde(default)]
    pub runtime_args:       Vec<String>,
    /// Compiled simulation file name inside the working directory
    #[serde(default = "default_executable_name")]
    pub executable_name:    String,
    /// Memory image file name the testbench loads
    #[serde(default = "default_image_file")]
    pub image_file:         String,
    /// File the testbench writes UART output to
    #[serde(default = "default_device_output_file")]
    pub device_output_file: String,
    /// File the testbench writes PASS/FAIL to
    #[serde(default = "default_marker_file")]
    pub marker_file:        String,
    /// Waveform dump written when `+vcd` is passed
    #[serde(default = "default_waveform_file")]
    pub waveform_file:      String,
    /// Lower bound on the memory image length, in words
    #[serde(default = "default_memory_floor_words")]
    pub memory_floor_words: usize,
    /// Unit of the `timeout` values in test specifications
    #[serde(default)]
    pub timeout_unit:       TimeoutUnit,
}

/// Unit applied to numeric test timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutUnit {
    #[default]
    Milliseconds,
    Seconds,
}

impl TimeoutUnit {
    /// Convert a raw timeout value into a wall-clock duration
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            TimeoutUnit::Milliseconds => Duration::from_millis(value),
            TimeoutUnit::Seconds => Duration::from_secs(value),
        }
    }
}

/// Regression defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSettings {
    /// Core used by test entries that do not list any
    #[serde(default = "default_core")]
    pub default_core:    String,
    /// Timeout used by test entries that do not set one
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// Parallel cases (0 = number of CPUs)
    #[serde(default)]
    pub jobs:            usize,
}

/// External tool candidates, probed in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_objcopy")]
    pub objcopy: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            cores_dir:    default_cores_dir(),
            output_dir:   default_output_dir(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            cargo:   default_cargo(),
            target:  default_target(),
            profile: BuildProfile::default(),
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            compiler:           default_compiler(),
            compiler_args:      default_compiler_args(),
            runtime:            default_runtime(),
            runtime_args:       vec![],
            executable_name:    default_executable_name(),
            image_file:         default_image_file(),
            device_output_file: default_device_output_file(),
            marker_file:        default_marker_file(),
            waveform_file:      default_waveform_file(),
            memory_floor_words: default_memory_floor_words(),
            timeout_unit:       TimeoutUnit::default(),
        }
    }
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            default_core:    default_core(),
            default_timeout: default_timeout(),
            jobs:            0,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            objcopy: default_objcopy(),
        }
    }
}

impl RvTestConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RvTestResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RvTestError::io(path, e))?;

        let config: RvTestConfig = toml::from_str(&content).map_err(|e| {
            RvTestError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    /// Load `rvtest.toml` from a workspace root, or defaults when the file is
    /// absent. A file that exists but is invalid is an error.
    pub fn load_for_workspace(root: &Path) -> RvTestResult<Self> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> RvTestResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| RvTestError::Config(format!("Failed to serialize configuration: {}", e)))?;
        fs::write(path, content).map_err(|e| RvTestError::io(path, e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> RvTestResult<()> {
        let required = [
            ("build.cargo", &self.build.cargo),
            ("build.target", &self.build.target),
            ("simulation.compiler", &self.simulation.compiler),
            ("simulation.runtime", &self.simulation.runtime),
            ("simulation.executable_name", &self.simulation.executable_name),
            ("simulation.image_file", &self.simulation.image_file),
            ("simulation.device_output_file", &self.simulation.device_output_file),
            ("simulation.marker_file", &self.simulation.marker_file),
            ("simulation.waveform_file", &self.simulation.waveform_file),
            ("tests.default_core", &self.tests.default_core),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(RvTestError::Config(format!("{} must not be empty", key)));
            }
        }

        if self.tests.default_timeout == 0 {
            return Err(RvTestError::Config(
                "tests.default_timeout must be greater than zero".to_string(),
            ));
        }

        let floor_bytes = (self.simulation.memory_floor_words as u64).saturating_mul(8);
        if floor_bytes > MAX_MEMORY_BYTES {
            return Err(RvTestError::Config(format!(
                "simulation.memory_floor_words {} exceeds the {} byte memory limit",
                self.simulation.memory_floor_words, MAX_MEMORY_BYTES
            )));
        }

        if self.tools.objcopy.is_empty() {
            return Err(RvTestError::Config(
                "tools.objcopy must list at least one converter".to_string(),
            ));
        }

        Ok(())
    }

    /// Absolute projects directory for a workspace root
    pub fn projects_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.workspace.projects_dir)
    }

    /// Absolute cores directory for a workspace root
    pub fn cores_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.workspace.cores_dir)
    }

    /// Absolute output directory for a workspace root
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.workspace.output_dir)
    }

    /// Default test timeout as a duration
    pub fn default_timeout(&self) -> Duration {
        self.simulation.timeout_unit.to_duration(self.tests.default_timeout)
    }
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_cores_dir() -> PathBuf {
    PathBuf::from("cores")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_cargo() -> String {
    "cargo".to_string()
}

fn default_target() -> String {
    "riscv32i-unknown-none-elf".to_string()
}

fn default_compiler() -> String {
    "iverilog".to_string()
}

fn default_compiler_args() -> Vec<String> {
    vec!["-g2012".to_string()]
}

fn default_runtime() -> String {
    "vvp".to_string()
}

fn default_executable_name() -> String {
    "simulation".to_string()
}

fn default_image_file() -> String {
    "program.hex".to_string()
}

fn default_device_output_file() -> String {
    "uart_output.txt".to_string()
}

fn default_marker_file() -> String {
    "sim_result.txt".to_string()
}

fn default_waveform_file() -> String {
    "testbench.vcd".to_string()
}

fn default_memory_floor_words() -> usize {
    16384
}

fn default_core() -> String {
    "picorv32".to_string()
}

fn default_timeout() -> u64 {
    10000
}

fn default_objcopy() -> Vec<String> {
    DEFAULT_OBJCOPY_CANDIDATES.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RvTestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.memory_floor_words, 16384);
        assert_eq!(config.build.profile, BuildProfile::Release);
        assert_eq!(config.tools.objcopy.last().map(String::as_str), Some("objcopy"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RvTestConfig = toml::from_str(
            r#"
            [simulation]
            memory_floor_words = 64
            timeout_unit = "seconds"

            [tests]
            default_core = "neorv32"

            [unknown_section]
            ignored = true
            "#,
        )
        .unwrap();

        assert_eq!(config.simulation.memory_floor_words, 64);
        assert_eq!(config.simulation.image_file, "program.hex");
        assert_eq!(config.tests.default_core, "neorv32");
        assert_eq!(config.tests.default_timeout, 10000);
        assert_eq!(config.default_timeout(), Duration::from_secs(10000));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);

        let mut config = RvTestConfig::default();
        config.tests.jobs = 3;
        config.build.profile = BuildProfile::Debug;
        config.save_to_file(&path).unwrap();

        let loaded = RvTestConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[tests]\ndefault_timeout = 0\n").unwrap();

        let err = RvTestConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, RvTestError::Config(_)));
        assert_eq!(RvTestConfig::load_or_default(&path), RvTestConfig::default());
    }

    #[test]
    fn test_oversized_memory_floor_rejected() {
        let mut config = RvTestConfig::default();
        config.simulation.memory_floor_words = usize::MAX / 2;
        assert!(matches!(config.validate(), Err(RvTestError::Config(ref m)) if m.contains("memory_floor_words")));
    }

    #[test]
    fn test_missing_file_falls_back_for_workspace() {
        let temp = TempDir::new().unwrap();
        let config = RvTestConfig::load_for_workspace(temp.path()).unwrap();
        assert_eq!(config.cores_dir(temp.path()), temp.path().join("cores"));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("release".parse::<BuildProfile>().unwrap(), BuildProfile::Release);
        assert_eq!("dev".parse::<BuildProfile>().unwrap(), BuildProfile::Debug);
        assert!("fast".parse::<BuildProfile>().is_err());
        assert_eq!(BuildProfile::Release.cargo_args(), &["--release"]);
    }
}
