//! End-to-end regression runs against scripted stand-ins for cargo, objcopy,
//! iverilog and vvp.

#![cfg(unix)]

use std::{
    collections::HashSet,
    fs,
    os::unix::fs::PermissionsExt,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    thread,
    time::{
        Duration,
        Instant,
    },
};

use rvtest_core::{
    config::RvTestConfig,
    regression::{
        discover,
        CaseState,
        DiscoveryDefaults,
        FailureReason,
        RegressionRunner,
        Verdict,
        TestFilter,
        REPORT_FILE,
    },
    simulate::MarkerStatus,
    tools::StaticToolResolver,
};
use tempfile::TempDir;

const GREETING: &str = "Hello, World from Rust on PicoRV32!";

const FAKE_CARGO: &str = r#"
if [ -f fail_build ]; then
  echo "error[E0425]: cannot find value \`uart\` in this scope" >&2
  exit 101
fi
out=target/riscv32i-unknown-none-elf/release
mkdir -p "$out"
name=$(basename "$(pwd)")
head -c 2048 /dev/zero > "$out/$name"
printf '\023\000\000\000' | dd of="$out/$name" conv=notrunc 2>/dev/null
echo "Finished release target(s)"
"#;

const FAKE_OBJCOPY: &str = r#"
cp "$3" "$4"
"#;

const FAKE_IVERILOG: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then shift; out="$1"; fi
  shift
done
if ! grep -q 'readmemh("program.hex"' testbench.v; then
  echo "testbench.v: memory image not redirected" >&2
  exit 1
fi
printf '#!/bin/sh\n' > "$out"
"#;

const FAKE_VVP: &str = r#"
dir=$(pwd)
case "$dir" in
  */slowcore) exec sleep 30 ;;
esac
case "$dir" in
  */quiet/*) printf 'Booting...\n' > uart_output.txt ;;
  *) printf 'Hello, World from Rust on PicoRV32!\r\n' > uart_output.txt ;;
esac
echo PASS > sim_result.txt
echo "simulation finished"
"#;

struct Workspace {
    _temp: TempDir,
    root:  PathBuf,
    bin:   PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();

        for (name, body) in [
            ("cargo", FAKE_CARGO),
            ("objcopy", FAKE_OBJCOPY),
            ("iverilog", FAKE_IVERILOG),
            ("vvp", FAKE_VVP),
        ] {
            let path = bin.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let ws = Self {
            _temp: temp,
            root,
            bin,
        };
        ws.core("picorv32");
        ws.core("slowcore");
        ws
    }

    fn core(&self, name: &str) {
        let dir = self.root.join("cores").join(name);
        fs::create_dir_all(dir.join("rtl")).unwrap();
        fs::write(dir.join("rtl/cpu.v"), "module cpu(input clk); endmodule\n").unwrap();
        fs::write(
            dir.join("testbench.v"),
            "module testbench;\n  reg [31:0] memory [0:1023];\n  initial $readmemh(\"firmware.hex\", memory);\nendmodule\n",
        )
        .unwrap();
        fs::write(
            dir.join("core.json"),
            format!(
                r#"{{
  "name": "{name}",
  "verilog_files": ["rtl/cpu.v", "testbench.v"],
  "memory": {{ "base_address": "0x00000000", "size": "4K" }},
  "uart": {{ "base_address": "0x02000000" }}
}}"#
            ),
        )
        .unwrap();
    }

    fn project(&self, name: &str, spec: &str) -> PathBuf {
        let dir = self.root.join("projects").join(name);
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("Cargo.toml"),
            format!("[package]\nname = \"{}\"\nversion = \"0.1.0\"\n", name),
        )
        .unwrap();
        fs::write(dir.join("test_config.json"), spec).unwrap();
        dir
    }

    fn config(&self) -> RvTestConfig {
        let mut config = RvTestConfig::default();
        config.simulation.memory_floor_words = 16;
        config.tools.objcopy = vec!["riscv32-unknown-elf-objcopy".to_string(), "objcopy".to_string()];
        config
    }

    fn resolver(&self) -> Arc<StaticToolResolver> {
        let resolver = ["cargo", "objcopy", "iverilog", "vvp"]
            .into_iter()
            .fold(StaticToolResolver::new(), |r, name| r.with_tool(name, self.bin.join(name)));
        Arc::new(resolver)
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

#[test]
fn hello_world_passes_on_picorv32() {
    let ws = Workspace::new();
    ws.project(
        "hello-world",
        &format!(r#"{{"tests": [{{"cores": ["picorv32"], "expected_output": ["{GREETING}"], "timeout": 5000}}]}}"#),
    );
    let config = ws.config();

    let discovery = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config));
    assert!(discovery.problems.is_empty());
    assert_eq!(discovery.cases.len(), 1);

    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &discovery.cases)
        .unwrap()
        .with_invocation("e2e");
    let report = runner.run_all(&discovery.cases);

    let verdict = &report.verdicts[0];
    assert!(verdict.success, "diagnostic: {:?}", verdict.diagnostic);
    assert_eq!(verdict.state, CaseState::Passed);
    assert_eq!(verdict.marker, Some(MarkerStatus::Pass));
    assert!(verdict.output.contains(GREETING));
    assert_eq!(report.exit_code(), 0);

    let work_dir = ws.root.join("output/runs/e2e/hello-world/picorv32");
    assert_eq!(verdict.work_dir, work_dir);
    // 2048-byte executable went through the converter
    assert!(work_dir.join("program.bin").is_file());

    let image = read_lines(&work_dir.join("program.hex"));
    assert_eq!(image.len(), 1024);
    assert_eq!(image[0], "00000013");
    assert!(image.iter().all(|line| line.len() == 8));

    let path = ws.root.join("output").join(REPORT_FILE);
    report.save(&path).unwrap();
    assert!(fs::read_to_string(path).unwrap().contains("hello-world_picorv32"));
}

#[test]
fn build_failure_becomes_failed_verdict() {
    let ws = Workspace::new();
    let dir = ws.project("broken", r#"{"tests": [{"cores": ["picorv32"]}]}"#);
    fs::write(dir.join("fail_build"), "").unwrap();
    let config = ws.config();

    let cases = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config)).cases;
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &cases).unwrap();
    let report = runner.run_all(&cases);

    let verdict = &report.verdicts[0];
    assert!(!verdict.success);
    assert_eq!(verdict.reason, Some(FailureReason::BuildFailed));
    let diagnostic = verdict.diagnostic.as_deref().unwrap();
    assert!(diagnostic.starts_with("BuildError: "), "{diagnostic}");
    assert!(diagnostic.contains("cannot find value"));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn missing_expected_output_names_the_substring() {
    let ws = Workspace::new();
    ws.project(
        "quiet",
        r#"{"tests": [{"cores": ["picorv32"], "expected_output": ["Booting", "Ready", "Done"]}]}"#,
    );
    let config = ws.config();

    let cases = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config)).cases;
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &cases).unwrap();
    let verdict = runner.run_case(&cases[0]);

    assert!(!verdict.success);
    assert_eq!(verdict.reason, Some(FailureReason::ExpectedOutputMissing));
    assert_eq!(
        verdict.diagnostic.as_deref(),
        Some("ExpectedOutputMissing: expected output not found: 'Ready'")
    );
    assert_eq!(verdict.output, "Booting...\n");
}

#[test]
fn simulation_timeout_fails_case_and_others_continue() {
    let ws = Workspace::new();
    ws.project(
        "hello-world",
        &format!(
            r#"{{"tests": [{{"cores": ["slowcore", "picorv32"], "expected_output": ["{GREETING}"], "timeout": 300}}]}}"#
        ),
    );
    let config = ws.config();

    let cases = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config)).cases;
    assert_eq!(cases.len(), 2);
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &cases).unwrap();

    let started = Instant::now();
    let report = runner.run_all(&cases);
    assert!(started.elapsed() < Duration::from_secs(20));

    let slow = &report.verdicts[0];
    assert!(!slow.success);
    assert_eq!(slow.reason, Some(FailureReason::SimulationFailed));
    assert!(slow.diagnostic.as_deref().unwrap().starts_with("TimeoutError: "));
    assert!(slow.output.is_empty());

    assert!(report.verdicts[1].success);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn unknown_core_is_reported_per_case() {
    let ws = Workspace::new();
    ws.project("hello-world", r#"{"tests": [{"cores": ["ghostcore"]}]}"#);
    let config = ws.config();

    let discovery = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config))
        .filtered(&TestFilter {
            project: Some("hello-world".to_string()),
            core:    Some("ghostcore".to_string()),
        });
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &discovery.cases).unwrap();
    let verdict = runner.run_case(&discovery.cases[0]);

    assert_eq!(verdict.reason, Some(FailureReason::SimulationFailed));
    assert!(verdict.diagnostic.as_deref().unwrap().starts_with("CoreNotFound: "));
}

#[test]
fn repeated_entries_run_concurrently_in_private_directories() {
    let ws = Workspace::new();
    ws.project(
        "hello-world",
        &format!(
            r#"{{"tests": [
                {{"cores": ["picorv32"], "expected_output": ["{GREETING}"]}},
                {{"cores": ["picorv32"], "expected_output": ["{GREETING}"]}},
                {{"cores": ["picorv32"], "expected_output": ["{GREETING}"]}}
            ]}}"#
        ),
    );
    let config = ws.config();

    let cases = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config)).cases;
    assert_eq!(cases.len(), 3);
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &cases)
        .unwrap()
        .with_invocation("dup");

    let verdicts: Vec<Verdict> = thread::scope(|scope| {
        let handles: Vec<_> = cases
            .iter()
            .map(|case| {
                let runner = &runner;
                scope.spawn(move || runner.run_case(case))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for verdict in &verdicts {
        assert!(verdict.success, "{}: {:?}", verdict.case.id(), verdict.diagnostic);
        assert!(verdict.work_dir.join("program.hex").is_file());
    }
    let dirs: HashSet<_> = verdicts.iter().map(|v| v.work_dir.clone()).collect();
    assert_eq!(dirs.len(), 3);
    assert!(dirs.contains(&ws.root.join("output/runs/dup/hello-world/picorv32.2")));
}

#[test]
fn missing_simulation_compiler_is_a_tool_error() {
    let ws = Workspace::new();
    ws.project("hello-world", r#"{"tests": [{"cores": ["picorv32"]}]}"#);
    let mut config = ws.config();
    config.simulation.compiler = "definitely-no-iverilog".to_string();

    let cases = discover(&config.projects_dir(&ws.root), &DiscoveryDefaults::from_config(&config)).cases;
    let runner = RegressionRunner::new(&ws.root, &config, ws.resolver(), &cases).unwrap();
    let verdict = runner.run_case(&cases[0]);

    assert_eq!(verdict.reason, Some(FailureReason::SimulationFailed));
    let diagnostic = verdict.diagnostic.as_deref().unwrap();
    assert!(diagnostic.starts_with("ToolNotFoundError: "), "{diagnostic}");
    assert!(diagnostic.contains("definitely-no-iverilog"));
}
