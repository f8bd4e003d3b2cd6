//! Test discovery, case execution and verification
//!
//! A project opts into regression testing with a `test_config.json` next to
//! its `Cargo.toml`. Each entry in it fans out into one [`TestCase`] per listed
//! core. Running a case walks a fixed state machine:
//!
//! ```text
//! Pending -> Building -> Simulating -> Verifying -> Passed
//!                |            |             |
//!                +------------+-------------+-------> Failed
//! ```
//!
//! Every error raised along the way is caught and turned into a failed
//! [`Verdict`] whose diagnostic starts with the error kind, so one broken case
//! never aborts the rest of the run.

use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
    Serializer,
};
use tracing::{
    debug,
    info,
    warn,
};
use walkdir::WalkDir;

use crate::{
    config::{
        BuildProfile,
        RvTestConfig,
        TimeoutUnit,
    },
    context::{
        new_invocation_id,
        RunContext,
    },
    cores::{
        CoreCatalog,
        CoreRegistry,
    },
    error::{
        RvTestError,
        RvTestResult,
    },
    prepare::SimulationPreparer,
    project::ProjectManager,
    simulate::{
        MarkerStatus,
        RunResult,
        SimulationExecutor,
    },
    tools::ToolResolver,
};

/// Per-project test specification file
pub const TEST_SPEC_FILE: &str = "test_config.json";

/// Report file written by `--save-report`, relative to the output directory
pub const REPORT_FILE: &str = "report.json";

/// Contents of a `test_config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpecFile {
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

/// One entry of a test specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Cores to run on; the default core when absent
    #[serde(default)]
    pub cores:           Option<Vec<String>>,
    /// Substrings the device output must contain, checked in order
    #[serde(default)]
    pub expected_output: Vec<String>,
    /// Wall-clock budget in the configured unit
    #[serde(default)]
    pub timeout:         Option<u64>,
}

/// A single project-on-core regression case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Directory name under `projects/`
    pub project:         String,
    /// Core the case runs on
    pub core:            String,
    /// Earlier cases of the same project on the same core
    pub ordinal:         usize,
    /// Substrings the device output must contain
    pub expected_output: Vec<String>,
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout:         Duration,
}

impl TestCase {
    /// Identity string `<project>_<core>`, suffixed with `.<ordinal>` for
    /// repeated entries
    pub fn id(&self) -> String {
        match self.ordinal {
            0 => format!("{}_{}", self.project, self.core),
            n => format!("{}_{}.{}", self.project, self.core, n),
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.project, self.core)
    }
}

/// Values applied to test entries that leave fields out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDefaults {
    /// Core for entries without a `cores` list
    pub default_core:    String,
    /// Timeout for entries without one, in `timeout_unit`
    pub default_timeout: u64,
    /// Unit of every timeout in the file
    pub timeout_unit:    TimeoutUnit,
}

impl DiscoveryDefaults {
    pub fn from_config(config: &RvTestConfig) -> Self {
        Self {
            default_core:    config.tests.default_core.clone(),
            default_timeout: config.tests.default_timeout,
            timeout_unit:    config.simulation.timeout_unit,
        }
    }
}

impl Default for DiscoveryDefaults {
    fn default() -> Self {
        Self::from_config(&RvTestConfig::default())
    }
}

/// Fan a specification out into cases, one per listed core
pub fn expand_spec(
    project: &str,
    spec: &TestSpecFile,
    defaults: &DiscoveryDefaults,
) -> RvTestResult<Vec<TestCase>> {
    let mut cases: Vec<TestCase> = Vec::new();

    for (index, test) in spec.tests.iter().enumerate() {
        let timeout = test.timeout.unwrap_or(defaults.default_timeout);
        if timeout == 0 {
            return Err(RvTestError::Config(format!(
                "{}: test {} has a zero timeout",
                project, index
            )));
        }

        let cores = match &test.cores {
            Some(cores) => cores.clone(),
            None => vec![defaults.default_core.clone()],
        };
        if cores.is_empty() {
            warn!(project, test = index, "test entry lists no cores");
        }

        for core in cores {
            let ordinal = cases.iter().filter(|c| c.core == core).count();
            cases.push(TestCase {
                project: project.to_string(),
                core,
                ordinal,
                expected_output: test.expected_output.clone(),
                timeout: defaults.timeout_unit.to_duration(timeout),
            });
        }
    }

    Ok(cases)
}

/// A specification file that could not be used
#[derive(Debug)]
pub struct DiscoveryProblem {
    /// Project the file belongs to
    pub project: String,
    /// Path of the unusable file
    pub path:    PathBuf,
    /// Why it was skipped
    pub error:   RvTestError,
}

impl fmt::Display for DiscoveryProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Result of scanning the projects directory
#[derive(Debug, Default)]
pub struct Discovery {
    /// Cases in project order
    pub cases:    Vec<TestCase>,
    /// Files that could not be used
    pub problems: Vec<DiscoveryProblem>,
}

impl Discovery {
    /// Keep only the cases and problems `filter` selects
    pub fn filtered(self, filter: &TestFilter) -> Self {
        Self {
            cases:    filter.apply(self.cases),
            problems: self
                .problems
                .into_iter()
                .filter(|p| filter.project.as_ref().is_none_or(|name| *name == p.project))
                .collect(),
        }
    }
}

/// Scan every project (sorted by name) for a test specification
pub fn discover(projects_dir: &Path, defaults: &DiscoveryDefaults) -> Discovery {
    let mut discovery = Discovery::default();
    if !projects_dir.is_dir() {
        return discovery;
    }

    let mut projects: Vec<(String, PathBuf)> = WalkDir::new(projects_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((name, entry.path().join(TEST_SPEC_FILE)))
        })
        .filter(|(_, spec)| spec.is_file())
        .collect();
    projects.sort();

    for (project, path) in projects {
        match load_spec(&path).and_then(|spec| expand_spec(&project, &spec, defaults)) {
            Ok(cases) => {
                debug!(project = %project, cases = cases.len(), "discovered tests");
                discovery.cases.extend(cases);
            },
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping test specification");
                discovery.problems.push(DiscoveryProblem {
                    project,
                    path,
                    error,
                });
            },
        }
    }

    discovery
}

/// Parse a test specification file
pub fn load_spec(path: &Path) -> RvTestResult<TestSpecFile> {
    let content = fs::read_to_string(path).map_err(|e| RvTestError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| RvTestError::Config(format!("invalid {}: {}", TEST_SPEC_FILE, e)))
}

/// Exact-match narrowing of discovered cases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFilter {
    /// Exact project name to keep
    pub project: Option<String>,
    /// Exact core name to keep
    pub core:    Option<String>,
}

impl TestFilter {
    pub fn matches(&self, case: &TestCase) -> bool {
        self.project.as_ref().is_none_or(|p| *p == case.project)
            && self.core.as_ref().is_none_or(|c| *c == case.core)
    }

    pub fn apply(&self, cases: Vec<TestCase>) -> Vec<TestCase> {
        cases.into_iter().filter(|case| self.matches(case)).collect()
    }
}

/// Check that every expected substring occurs in `output`
pub fn verify_output(expected: &[String], output: &str) -> RvTestResult<()> {
    match expected.iter().find(|needle| !output.contains(needle.as_str())) {
        Some(missing) => Err(RvTestError::ExpectedOutputMissing {
            expected: missing.clone(),
        }),
        None => Ok(()),
    }
}

/// Where a case is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseState {
    Pending,
    Building,
    Simulating,
    Verifying,
    Passed,
    Failed,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseState::Passed | CaseState::Failed)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaseState::Pending => "PENDING",
            CaseState::Building => "BUILDING",
            CaseState::Simulating => "SIMULATING",
            CaseState::Verifying => "VERIFYING",
            CaseState::Passed => "PASSED",
            CaseState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Stage that failed a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    BuildFailed,
    SimulationFailed,
    ExpectedOutputMissing,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::BuildFailed => "BuildFailed",
            FailureReason::SimulationFailed => "SimulationFailed",
            FailureReason::ExpectedOutputMissing => "ExpectedOutputMissing",
        };
        f.write_str(name)
    }
}

/// Final outcome of one case
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    /// Case the verdict is for
    pub case:       TestCase,
    /// Whether every stage succeeded
    pub success:    bool,
    /// Captured device output (may be empty)
    pub output:     String,
    /// `<ErrorKind>: <detail>` for failed cases
    pub diagnostic: Option<String>,
    /// Stage that failed the case
    pub reason:     Option<FailureReason>,
    /// Terminal state reached
    pub state:      CaseState,
    /// Testbench marker, when the simulation ran
    pub marker:     Option<MarkerStatus>,
    /// Private working directory of the case
    pub work_dir:   PathBuf,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration:   Duration,
}

/// Receives state transitions of running cases
pub trait CaseObserver: Send + Sync {
    fn on_transition(&self, case: &TestCase, state: CaseState);
}

/// Observer that only logs transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl CaseObserver for LoggingObserver {
    fn on_transition(&self, case: &TestCase, state: CaseState) {
        debug!(case = %case.id(), %state, "case transition");
    }
}

/// Runs regression cases through build, simulation and verification
#[derive(Clone)]
pub struct RegressionRunner {
    workspace_root: PathBuf,
    output_dir:     PathBuf,
    invocation:     String,
    profile:        BuildProfile,
    vcd:            bool,
    projects:       ProjectManager,
    catalog:        Arc<CoreCatalog>,
    preparer:       SimulationPreparer,
    executor:       SimulationExecutor,
    observer:       Arc<dyn CaseObserver>,
}

impl RegressionRunner {
    /// Set up a runner for `cases`, loading each referenced core once
    pub fn new(
        workspace_root: &Path,
        config: &RvTestConfig,
        resolver: Arc<dyn ToolResolver>,
        cases: &[TestCase],
    ) -> RvTestResult<Self> {
        let registry = CoreRegistry::new(config.cores_dir(workspace_root));
        let catalog = CoreCatalog::load(registry, cases.iter().map(|c| c.core.as_str()));
        let projects =
            ProjectManager::from_config(workspace_root, config).with_resolver(resolver.clone());
        let executor =
            SimulationExecutor::new(config.simulation.clone()).with_resolver(resolver.clone());

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            output_dir:     config.output_dir(workspace_root),
            invocation:     new_invocation_id(),
            profile:        config.build.profile,
            vcd:            false,
            projects,
            catalog:        Arc::new(catalog),
            preparer:       SimulationPreparer::new(
                config.simulation.clone(),
                resolver,
                config.tools.objcopy.clone(),
            )?,
            executor,
            observer:       Arc::new(LoggingObserver),
        })
    }

    pub fn with_profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Ask the testbench for a waveform dump
    pub fn with_vcd(mut self, vcd: bool) -> Self {
        self.vcd = vcd;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CaseObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_invocation(mut self, invocation: impl Into<String>) -> Self {
        self.invocation = invocation.into();
        self
    }

    pub fn invocation(&self) -> &str {
        &self.invocation
    }

    /// Working directory a case runs in
    pub fn context_for(&self, case: &TestCase) -> RunContext {
        RunContext::for_case(
            &self.workspace_root,
            &self.output_dir,
            &self.invocation,
            &case.project,
            &case.core,
            case.ordinal,
        )
    }

    /// Run one case to a verdict; never fails
    pub fn run_case(&self, case: &TestCase) -> Verdict {
        let started = Instant::now();
        let ctx = self.context_for(case);
        let tracker = CaseTracker {
            case,
            observer: self.observer.as_ref(),
            started,
            work_dir: ctx.work_dir.clone(),
        };

        tracker.enter(CaseState::Pending);
        tracker.enter(CaseState::Building);
        let artifact = match self.projects.build(&case.project, self.profile) {
            Ok(artifact) => artifact,
            Err(err) => return tracker.fail(FailureReason::BuildFailed, &err, None),
        };

        tracker.enter(CaseState::Simulating);
        let result = match self.simulate(&ctx, case, &artifact.path) {
            Ok(result) => result,
            Err(err) => return tracker.fail(FailureReason::SimulationFailed, &err, None),
        };
        if let Some(err) = result.failure() {
            return tracker.fail(FailureReason::SimulationFailed, &err, Some(result));
        }

        tracker.enter(CaseState::Verifying);
        let output = result.device_output.clone().unwrap_or_default();
        match verify_output(&case.expected_output, &output) {
            Ok(()) => tracker.pass(result),
            Err(err) => tracker.fail(FailureReason::ExpectedOutputMissing, &err, Some(result)),
        }
    }

    /// Run every case in order
    pub fn run_all(&self, cases: &[TestCase]) -> RegressionReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let verdicts = cases.iter().map(|case| self.run_case(case)).collect();
        RegressionReport::new(self.invocation.clone(), started_at, started.elapsed(), verdicts)
    }

    fn simulate(&self, ctx: &RunContext, case: &TestCase, binary: &Path) -> RvTestResult<RunResult> {
        let core = self.catalog.get(&case.core)?;
        let run = self.preparer.prepare(ctx, core, binary)?;
        self.executor.execute(&run, self.vcd, case.timeout)
    }
}

struct CaseTracker<'a> {
    case:     &'a TestCase,
    observer: &'a dyn CaseObserver,
    started:  Instant,
    work_dir: PathBuf,
}

impl CaseTracker<'_> {
    fn enter(&self, state: CaseState) {
        self.observer.on_transition(self.case, state);
    }

    fn pass(self, result: RunResult) -> Verdict {
        self.enter(CaseState::Passed);
        info!(case = %self.case.id(), "passed");
        Verdict {
            case:       self.case.clone(),
            success:    true,
            output:     result.device_output.unwrap_or_default(),
            diagnostic: None,
            reason:     None,
            state:      CaseState::Passed,
            marker:     Some(result.marker),
            work_dir:   self.work_dir,
            duration:   self.started.elapsed(),
        }
    }

    fn fail(self, reason: FailureReason, err: &RvTestError, result: Option<RunResult>) -> Verdict {
        self.enter(CaseState::Failed);
        let diagnostic = format!("{}: {}", err.kind(), err);
        info!(case = %self.case.id(), %reason, %diagnostic, "failed");

        let (output, marker) = match result {
            Some(result) => (result.device_output.unwrap_or_default(), Some(result.marker)),
            None => (String::new(), None),
        };
        Verdict {
            case: self.case.clone(),
            success: false,
            output,
            diagnostic: Some(diagnostic),
            reason: Some(reason),
            state: CaseState::Failed,
            marker,
            work_dir: self.work_dir,
            duration: self.started.elapsed(),
        }
    }
}

/// Outcome of a whole regression invocation
#[derive(Debug, Clone, Serialize)]
pub struct RegressionReport {
    /// Identifier shared by every case of the run
    pub invocation: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration:   Duration,
    /// Cases run
    pub total:      usize,
    /// Cases that passed
    pub passed:     usize,
    /// Cases that failed
    pub failed:     usize,
    /// Verdicts in case order
    pub verdicts:   Vec<Verdict>,
    /// Specification files that could not be used
    pub problems:   Vec<String>,
}

impl RegressionReport {
    pub fn new(
        invocation: String,
        started_at: DateTime<Utc>,
        duration: Duration,
        verdicts: Vec<Verdict>,
    ) -> Self {
        let passed = verdicts.iter().filter(|v| v.success).count();
        Self {
            invocation,
            started_at,
            duration,
            total: verdicts.len(),
            passed,
            failed: verdicts.len() - passed,
            verdicts,
            problems: vec![],
        }
    }

    /// Attach discovery problems; they count against the run
    pub fn with_problems(mut self, problems: &[DiscoveryProblem]) -> Self {
        self.problems = problems.iter().map(ToString::to_string).collect();
        self
    }

    /// At least one case ran, every case passed, and no specification was
    /// skipped
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0 && self.problems.is_empty()
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() { 0 } else { 1 }
    }

    pub fn failures(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| !v.success)
    }

    /// Write the report as JSON
    pub fn save(&self, path: &Path) -> RvTestResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RvTestError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RvTestError::Config(format!("cannot serialize report: {}", e)))?;
        fs::write(path, json).map_err(|e| RvTestError::io(path, e))
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::tools::StaticToolResolver;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn case(project: &str, core: &str) -> TestCase {
        TestCase {
            project:         project.to_string(),
            core:            core.to_string(),
            ordinal:         0,
            expected_output: vec![],
            timeout:         Duration::from_secs(1),
        }
    }

    #[test]
    fn test_expand_fans_out_per_core() {
        let spec = TestSpecFile {
            tests: vec![
                TestSpec {
                    cores:           Some(strings(&["picorv32", "neorv32"])),
                    expected_output: strings(&["Hello"]),
                    timeout:         Some(500),
                },
                TestSpec::default(),
            ],
        };

        let cases = expand_spec("hello-world", &spec, &DiscoveryDefaults::default()).unwrap();
        let ids: Vec<_> = cases.iter().map(TestCase::id).collect();
        assert_eq!(ids, [
            "hello-world_picorv32",
            "hello-world_neorv32",
            "hello-world_picorv32.1"
        ]);
        assert_eq!(cases[2].ordinal, 1);
        assert_eq!(cases[0].timeout, Duration::from_millis(500));
        assert_eq!(cases[0].expected_output, strings(&["Hello"]));
        assert_eq!(cases[2].timeout, Duration::from_millis(10000));
        assert!(cases[2].expected_output.is_empty());
    }

    #[test]
    fn test_repeated_core_entries_get_private_work_dirs() {
        let temp = TempDir::new().unwrap();
        let spec: TestSpecFile = serde_json::from_str(
            r#"{"tests": [{"cores": ["picorv32"]}, {"cores": ["picorv32"]}, {"cores": ["picorv32"]}]}"#,
        )
        .unwrap();
        let cases = expand_spec("hello-world", &spec, &DiscoveryDefaults::default()).unwrap();
        let runner = RegressionRunner::new(
            temp.path(),
            &RvTestConfig::default(),
            Arc::new(StaticToolResolver::new()),
            &cases,
        )
        .unwrap();

        let dirs: Vec<_> = cases.iter().map(|c| runner.context_for(c).work_dir).collect();
        for (i, a) in dirs.iter().enumerate() {
            for b in &dirs[i + 1..] {
                assert_ne!(a, b);
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
        let ids: std::collections::HashSet<_> = cases.iter().map(TestCase::id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_expand_rejects_zero_timeout() {
        let spec = TestSpecFile {
            tests: vec![TestSpec {
                timeout: Some(0),
                ..Default::default()
            }],
        };
        assert!(matches!(
            expand_spec("p", &spec, &DiscoveryDefaults::default()),
            Err(RvTestError::Config(_))
        ));
    }

    #[test]
    fn test_expand_uses_seconds_unit() {
        let defaults = DiscoveryDefaults {
            timeout_unit: TimeoutUnit::Seconds,
            ..Default::default()
        };
        let spec: TestSpecFile = serde_json::from_str(r#"{"tests": [{"timeout": 3}]}"#).unwrap();
        let cases = expand_spec("p", &spec, &defaults).unwrap();
        assert_eq!(cases[0].timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_discover_isolates_malformed_files() {
        let temp = TempDir::new().unwrap();
        let write = |project: &str, content: &str| {
            let dir = temp.path().join(project);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(TEST_SPEC_FILE), content).unwrap();
        };
        write("b-good", r#"{"tests": [{"cores": ["picorv32"], "expected_output": ["Hi"]}]}"#);
        write("a-broken", "{ not json");
        write("c-also-good", r#"{"tests": [{"cores": ["neorv32"]}], "comment": "extra keys ok"}"#);
        fs::create_dir_all(temp.path().join("d-no-spec")).unwrap();

        let discovery = discover(temp.path(), &DiscoveryDefaults::default());
        let ids: Vec<_> = discovery.cases.iter().map(TestCase::id).collect();
        assert_eq!(ids, ["b-good_picorv32", "c-also-good_neorv32"]);
        assert_eq!(discovery.problems.len(), 1);
        assert_eq!(discovery.problems[0].project, "a-broken");
        assert!(matches!(discovery.problems[0].error, RvTestError::Config(_)));

        let only_good = discovery.filtered(&TestFilter {
            project: Some("b-good".to_string()),
            core:    None,
        });
        assert_eq!(only_good.cases.len(), 1);
        assert!(only_good.problems.is_empty());
    }

    #[test]
    fn test_discover_missing_directory() {
        let temp = TempDir::new().unwrap();
        let discovery = discover(&temp.path().join("nope"), &DiscoveryDefaults::default());
        assert!(discovery.cases.is_empty());
        assert!(discovery.problems.is_empty());
    }

    #[test]
    fn test_filter_exact_match() {
        let cases = vec![case("a", "x"), case("a", "y"), case("ab", "x")];
        let filter = TestFilter {
            project: Some("a".to_string()),
            core:    Some("x".to_string()),
        };
        assert_eq!(filter.apply(cases.clone()), vec![case("a", "x")]);
        assert_eq!(TestFilter::default().apply(cases.clone()), cases);
    }

    #[test]
    fn test_verify_reports_first_missing() {
        let expected = strings(&["A", "B", "C"]);
        match verify_output(&expected, "xAx") {
            Err(RvTestError::ExpectedOutputMissing { expected }) => assert_eq!(expected, "B"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(verify_output(&expected, "C B A").is_ok());
        assert!(verify_output(&[], "").is_ok());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CaseState>>);

    impl CaseObserver for Recorder {
        fn on_transition(&self, _case: &TestCase, state: CaseState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn test_missing_project_is_build_failure() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("projects")).unwrap();
        let config = RvTestConfig::default();
        let cases = vec![case("ghost", "picorv32")];
        let recorder = Arc::new(Recorder::default());

        let runner =
            RegressionRunner::new(temp.path(), &config, Arc::new(StaticToolResolver::new()), &cases)
                .unwrap()
                .with_observer(recorder.clone());
        let report = runner.run_all(&cases);

        let verdict = &report.verdicts[0];
        assert!(!verdict.success);
        assert_eq!(verdict.state, CaseState::Failed);
        assert_eq!(verdict.reason, Some(FailureReason::BuildFailed));
        assert!(verdict.diagnostic.as_deref().unwrap().starts_with("ProjectNotFound: "));
        assert_eq!(*recorder.0.lock().unwrap(), [
            CaseState::Pending,
            CaseState::Building,
            CaseState::Failed
        ]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_empty_run_is_not_success() {
        let report = RegressionReport::new("inv".to_string(), Utc::now(), Duration::ZERO, vec![]);
        assert!(!report.all_passed());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_report_serializes_and_saves() {
        let temp = TempDir::new().unwrap();
        let verdict = Verdict {
            case:       case("hello-world", "picorv32"),
            success:    true,
            output:     "Hello".to_string(),
            diagnostic: None,
            reason:     None,
            state:      CaseState::Passed,
            marker:     Some(MarkerStatus::Pass),
            work_dir:   temp.path().to_path_buf(),
            duration:   Duration::from_millis(42),
        };
        let report = RegressionReport::new(
            "inv".to_string(),
            Utc::now(),
            Duration::from_millis(50),
            vec![verdict],
        );
        assert!(report.all_passed());
        assert_eq!(report.exit_code(), 0);

        let path = temp.path().join("out").join(REPORT_FILE);
        report.save(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["passed"], 1);
        assert_eq!(json["verdicts"][0]["state"], "PASSED");
        assert_eq!(json["verdicts"][0]["marker"], "PASS");
        assert_eq!(json["verdicts"][0]["duration_ms"], 42);
        assert_eq!(json["verdicts"][0]["case"]["timeout_ms"], 1000);
    }
}
