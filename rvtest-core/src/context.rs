//! Per-run context passed explicitly through every pipeline stage

use std::path::{
    Path,
    PathBuf,
};

use serde::Serialize;

/// Where and for whom a single pipeline run happens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    /// Root of the regression workspace
    pub workspace_root: PathBuf,
    /// Private scratch directory of this run
    pub work_dir:       PathBuf,
    /// Core the run targets
    pub core:           String,
    /// Project under test, when the run came from a test case
    pub project:        Option<String>,
    /// Identifier shared by every run of one orchestrator invocation
    pub invocation:     String,
}

impl RunContext {
    /// Context for one regression case:
    /// `<output>/runs/<invocation>/<project>/<core>`, or `<core>.<ordinal>`
    /// for repeated entries of the same project and core
    pub fn for_case(
        workspace_root: &Path,
        output_dir: &Path,
        invocation: &str,
        project: &str,
        core: &str,
        ordinal: usize,
    ) -> Self {
        let leaf = match ordinal {
            0 => core.to_string(),
            n => format!("{}.{}", core, n),
        };
        Self {
            workspace_root: workspace_root.to_path_buf(),
            work_dir:       output_dir.join("runs").join(invocation).join(project).join(leaf),
            core:           core.to_string(),
            project:        Some(project.to_string()),
            invocation:     invocation.to_string(),
        }
    }

    /// Context for a standalone simulation of a prebuilt binary:
    /// `<output>/runs/<invocation>/<core>`
    pub fn for_simulation(
        workspace_root: &Path,
        output_dir: &Path,
        invocation: &str,
        core: &str,
    ) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
            work_dir:       output_dir.join("runs").join(invocation).join(core),
            core:           core.to_string(),
            project:        None,
            invocation:     invocation.to_string(),
        }
    }

    /// Path of a file inside the working directory
    pub fn work_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }
}

/// Fresh invocation identifier: UTC timestamp plus process id
pub fn new_invocation_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"),
        std::process::id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_contexts_do_not_share_work_dirs() {
        let root = Path::new("/ws");
        let output = root.join("output");
        let a = RunContext::for_case(root, &output, "inv", "hello-world", "picorv32", 0);
        let b = RunContext::for_case(root, &output, "inv", "hello-world", "neorv32", 0);
        let again = RunContext::for_case(root, &output, "inv", "hello-world", "picorv32", 1);

        assert_ne!(a.work_dir, b.work_dir);
        assert_ne!(a.work_dir, again.work_dir);
        assert!(!again.work_dir.starts_with(&a.work_dir));
        assert_eq!(
            again.work_dir,
            PathBuf::from("/ws/output/runs/inv/hello-world/picorv32.1")
        );
        assert_eq!(
            a.work_dir,
            PathBuf::from("/ws/output/runs/inv/hello-world/picorv32")
        );
        assert_eq!(a.work_file("program.hex"), a.work_dir.join("program.hex"));
    }

    #[test]
    fn test_invocation_id_contains_pid() {
        let id = new_invocation_id();
        assert!(id.ends_with(&std::process::id().to_string()));
    }
}
