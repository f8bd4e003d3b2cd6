//! Target project management: build, artifact resolution and conversion
//!
//! Projects live in `projects/<name>/` as ordinary cargo packages built for a
//! bare-metal RISC-V target. After a build the executable is located by trying
//! the naming conventions cargo may have applied, in a fixed order.

use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use serde::Serialize;
use serde_json::json;
use tracing::{
    debug,
    info,
};
use walkdir::WalkDir;

use crate::{
    config::{
        BuildProfile,
        RvTestConfig,
    },
    cores::CoreDescriptor,
    error::{
        RvTestError,
        RvTestResult,
    },
    regression::TEST_SPEC_FILE,
    templates::{
        self,
        ProjectTemplate,
    },
    tools::{
        PathToolResolver,
        ToolResolver,
    },
};

/// Optional project metadata file
pub const PROJECT_METADATA_FILE: &str = "project.json";

/// An executable produced by a successful build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    /// Project the executable belongs to
    pub project: String,
    /// Existing executable file
    pub path:    PathBuf,
    /// Profile the executable was built with
    pub profile: BuildProfile,
}

/// Summary of a project directory
#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    /// Directory name under `projects/`
    pub name:            String,
    /// Project directory
    pub path:            PathBuf,
    /// Whether a `Cargo.toml` is present
    pub has_manifest:    bool,
    /// Whether a `test_config.json` is present
    pub has_test_config: bool,
    /// Contents of `project.json`, when present
    pub metadata:        Option<serde_json::Value>,
}

/// Settings for a newly created project
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Scaffold to generate
    pub template:      ProjectTemplate,
    /// Core the starter test targets
    pub core:          String,
    /// Linker script origin of RAM
    pub memory_origin: u64,
    /// Linker script length, e.g. `64K`
    pub memory_length: String,
    /// UART transmit register the template writes to
    pub uart_base:     u64,
    /// Timeout written into the starter test
    pub timeout:       u64,
}

impl Default for NewProject {
    fn default() -> Self {
        Self {
            template:      ProjectTemplate::default(),
            core:          "picorv32".to_string(),
            memory_origin: 0,
            memory_length: "64K".to_string(),
            uart_base:     0x0200_0000,
            timeout:       10000,
        }
    }
}

impl NewProject {
    /// Take the memory map and UART address from a core descriptor
    pub fn for_core(mut self, core: &CoreDescriptor) -> Self {
        self.core = core.name.clone();
        self.memory_origin = core.memory.base_address;
        self.memory_length = linker_length(core.memory.size_bytes);
        if let Some(uart) = core.device_output_address() {
            self.uart_base = uart;
        }
        self
    }
}

fn linker_length(bytes: u64) -> String {
    if bytes % (1 << 20) == 0 {
        format!("{}M", bytes >> 20)
    } else if bytes % (1 << 10) == 0 {
        format!("{}K", bytes >> 10)
    } else {
        bytes.to_string()
    }
}

/// Builds and inspects projects under one projects directory
#[derive(Debug, Clone)]
pub struct ProjectManager {
    projects_dir: PathBuf,
    cargo:        String,
    target:       String,
    resolver:     Arc<dyn ToolResolver>,
}

impl ProjectManager {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        cargo: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            cargo:        cargo.into(),
            target:       target.into(),
            resolver:     Arc::new(PathToolResolver::new()),
        }
    }

    /// Look up the build tool through `resolver` instead of `PATH`
    pub fn with_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Manager for the projects directory of a workspace
    pub fn from_config(workspace_root: &Path, config: &RvTestConfig) -> Self {
        Self::new(
            config.projects_dir(workspace_root),
            config.build.cargo.clone(),
            config.build.target.clone(),
        )
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Directory of `project`, which must exist
    pub fn project_dir(&self, project: &str) -> RvTestResult<PathBuf> {
        let dir = self.projects_dir.join(project);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(RvTestError::ProjectNotFound {
                name: project.to_string(),
                dir:  self.projects_dir.clone(),
            })
        }
    }

    /// Names of subdirectories holding a `Cargo.toml`, sorted
    pub fn list_projects(&self) -> Vec<String> {
        if !self.projects_dir.is_dir() {
            return vec![];
        }

        let mut projects: Vec<String> = WalkDir::new(&self.projects_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| entry.path().join("Cargo.toml").is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        projects.sort();
        projects
    }

    /// Describe `project` from its metadata file, or from what is on disk
    pub fn project_info(&self, project: &str) -> RvTestResult<ProjectInfo> {
        let dir = self.project_dir(project)?;
        let metadata_path = dir.join(PROJECT_METADATA_FILE);

        let metadata = if metadata_path.is_file() {
            let content =
                fs::read_to_string(&metadata_path).map_err(|e| RvTestError::io(&metadata_path, e))?;
            let value = serde_json::from_str(&content).map_err(|e| {
                RvTestError::Config(format!("invalid {}: {}", metadata_path.display(), e))
            })?;
            Some(value)
        } else {
            None
        };

        Ok(ProjectInfo {
            name: project.to_string(),
            has_manifest: dir.join("Cargo.toml").is_file(),
            has_test_config: dir.join(TEST_SPEC_FILE).is_file(),
            path: dir,
            metadata,
        })
    }

    /// Scaffold a new project from a template
    pub fn create_project(&self, name: &str, options: &NewProject) -> RvTestResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(RvTestError::Config(format!("invalid project name '{}'", name)));
        }

        let dir = self.projects_dir.join(name);
        if dir.exists() {
            return Err(RvTestError::Config(format!("project '{}' already exists", name)));
        }

        let metadata = json!({
            "name": name,
            "template": options.template.name(),
            "target": self.target,
            "core": options.core,
            "memory": {
                "origin": format!("0x{:08X}", options.memory_origin),
                "length": options.memory_length,
            },
            "uart_base": format!("0x{:08X}", options.uart_base),
        });
        let test_spec = json!({
            "tests": [{
                "cores": [options.core],
                "expected_output": options.template.expected_output(),
                "timeout": options.timeout,
            }]
        });

        let files = [
            (PathBuf::from("Cargo.toml"), templates::cargo_manifest(name)),
            (PathBuf::from(".cargo/config.toml"), templates::cargo_config(&self.target)),
            (
                PathBuf::from("memory.x"),
                templates::memory_layout(options.memory_origin, &options.memory_length),
            ),
            (
                PathBuf::from("src/main.rs"),
                templates::main_source(options.template, options.uart_base),
            ),
            (PathBuf::from(PROJECT_METADATA_FILE), to_pretty_json(&metadata)?),
            (PathBuf::from(TEST_SPEC_FILE), to_pretty_json(&test_spec)?),
        ];

        for (relative, content) in files {
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| RvTestError::io(parent, e))?;
            }
            fs::write(&path, content).map_err(|e| RvTestError::io(&path, e))?;
        }

        info!(project = name, template = %options.template, "created project");
        Ok(dir)
    }

    /// Build `project` and locate the executable
    pub fn build(&self, project: &str, profile: BuildProfile) -> RvTestResult<BuildArtifact> {
        let dir = self.project_dir(project)?;
        let cargo = self.resolver.resolve_one("build tool", &self.cargo)?;

        let mut cmd = cargo.command();
        cmd.arg("build")
            .args(profile.cargo_args())
            .arg("--target")
            .arg(&self.target)
            .current_dir(&dir);
        debug!(project, command = ?cmd, "building project");

        let output = cmd.output().map_err(|e| RvTestError::spawn(&cargo.name, e))?;
        if !output.status.success() {
            return Err(RvTestError::Build {
                project: project.to_string(),
                stderr:  String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let artifact = self.locate_artifact(project, profile)?;
        info!(project, artifact = %artifact.path.display(), "build complete");
        Ok(artifact)
    }

    /// Find the executable of an already built project
    pub fn locate_artifact(
        &self,
        project: &str,
        profile: BuildProfile,
    ) -> RvTestResult<BuildArtifact> {
        let dir = self.project_dir(project)?;
        let searched = dir.join("target").join(&self.target).join(profile.dir_name());
        let package = manifest_package_name(&dir.join("Cargo.toml"));
        let attempted = candidate_names(project, package.as_deref());

        for name in &attempted {
            let candidate = searched.join(name);
            if candidate.is_file() {
                return Ok(BuildArtifact {
                    project: project.to_string(),
                    path: candidate,
                    profile,
                });
            }
        }

        Err(RvTestError::ArtifactNotFound {
            available: list_executables(&searched),
            searched,
            attempted,
        })
    }
}

/// Executable names cargo may have produced for `project`, in search order:
/// hyphens to underscores, verbatim, underscores to hyphens, then the
/// manifest package name and its underscore form. Duplicates are dropped.
pub fn candidate_names(project: &str, package: Option<&str>) -> Vec<String> {
    let mut names = vec![
        project.replace('-', "_"),
        project.to_string(),
        project.replace('_', "-"),
    ];
    if let Some(package) = package {
        names.push(package.to_string());
        names.push(package.replace('-', "_"));
    }

    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

/// `package.name` from a cargo manifest, if it can be read
pub fn manifest_package_name(manifest: &Path) -> Option<String> {
    let content = fs::read_to_string(manifest).ok()?;
    let value: toml::Value = toml::from_str(&content).ok()?;
    value.get("package")?.get("name")?.as_str().map(str::to_string)
}

/// Convert an executable into a raw memory image with an objcopy-compatible
/// tool: `<tool> -O binary <artifact> <output>`
pub fn to_raw_binary(
    artifact: &Path,
    output: &Path,
    resolver: &dyn ToolResolver,
    candidates: &[String],
) -> RvTestResult<PathBuf> {
    let tool = resolver.resolve("binary converter", candidates)?;

    let mut cmd = tool.command();
    cmd.arg("-O").arg("binary").arg(artifact).arg(output);
    debug!(command = ?cmd, "converting executable to raw binary");

    let result = cmd.output().map_err(|e| RvTestError::spawn(&tool.name, e))?;
    if !result.status.success() {
        return Err(RvTestError::Conversion {
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }
    Ok(output.to_path_buf())
}

fn to_pretty_json(value: &serde_json::Value) -> RvTestResult<String> {
    serde_json::to_string_pretty(value)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| RvTestError::Config(format!("cannot serialize JSON: {}", e)))
}

fn list_executables(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_executable(entry.path()))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), None | Some("exe"))
}
