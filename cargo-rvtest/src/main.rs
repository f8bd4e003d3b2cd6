//! cargo-rvtest - regression runner for Rust programs on simulated RISC-V
//! cores
//!
//! Builds every project under `projects/`, encodes its binary into a memory
//! image, runs it on the cores its `test_config.json` names and checks the
//! captured UART output.
//!
//! Works both as `cargo-rvtest <command>` and as `cargo rvtest <command>`.

use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Instant,
};

use anyhow::{
    bail,
    Context,
    Result,
};
use chrono::Utc;
use clap::{
    Parser,
    Subcommand,
    ValueEnum,
};
use rvtest_core::{
    config::{
        RvTestConfig,
        CONFIG_FILE,
    },
    context::{
        new_invocation_id,
        RunContext,
    },
    cores::CoreRegistry,
    hex::{
        EncodeOptions,
        Endianness,
        HexConverter,
    },
    prepare::SimulationPreparer,
    project::{
        to_raw_binary,
        NewProject,
        ProjectManager,
    },
    regression::{
        discover,
        expand_spec,
        load_spec,
        DiscoveryDefaults,
        RegressionReport,
        RegressionRunner,
        TestCase,
        TestFilter,
        Verdict,
        REPORT_FILE,
        TEST_SPEC_FILE,
    },
    simulate::SimulationExecutor,
    templates::ProjectTemplate,
    tools::{
        tool_report,
        PathToolResolver,
        ToolResolver,
    },
};
use serde::Serialize;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod helpers;

use helpers::{
    excerpt,
    format_duration,
    CaseProgress,
    GlobalArgs,
};

/// Regression runner for Rust programs on simulated RISC-V cores
#[derive(Parser)]
#[command(name = "cargo-rvtest")]
#[command(version, about = "Build, simulate and verify RISC-V regression tests")]
#[command(long_about = "
Builds the Rust projects of a regression workspace for a bare-metal RISC-V
target, loads each binary into the memory of one or more Verilog CPU cores,
runs the cores under Icarus Verilog and checks the UART output against the
expectations in each project's test_config.json.

Workspace layout:
  rvtest.toml            optional configuration
  cores/<name>/core.json core descriptors and their HDL sources
  projects/<name>/       Rust projects with test_config.json
  output/                run directories and reports
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Workspace root directory (default: search upwards from the current
    /// directory)
    #[arg(long, global = true, env = "RVTEST_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output: OutputFormatArg,

    /// Build profile (overrides rvtest.toml)
    #[arg(long, global = true, value_enum)]
    pub profile: Option<ProfileArg>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the regression suite
    Test {
        /// Only run cases of this project
        #[arg(long)]
        project: Option<String>,

        /// Only run cases on this core
        #[arg(long)]
        core: Option<String>,

        /// Number of cases to run in parallel (default: number of CPUs)
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Ask the testbenches for waveform dumps
        #[arg(long)]
        vcd: bool,

        /// Write the report to output/report.json
        #[arg(long)]
        save_report: bool,
    },

    /// List discovered test cases
    List {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        core: Option<String>,
    },

    /// List available cores
    Cores,

    /// Show a core descriptor
    CoreInfo {
        /// Core name
        core: String,
    },

    /// Create a core descriptor from existing HDL sources
    NewCore {
        /// Core name
        name: String,

        /// HDL source file relative to the core directory, in compile order
        #[arg(long = "file", required = true)]
        files: Vec<String>,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// List projects
    Projects,

    /// Show project details and its test cases
    ProjectInfo {
        /// Project name
        name: String,
    },

    /// Create a new project from a template
    New {
        /// Project name
        name: String,

        /// Template: hello-world, minimal
        #[arg(long, default_value = "hello-world")]
        template: ProjectTemplate,

        /// Core the starter test targets (default: tests.default_core)
        #[arg(long)]
        core: Option<String>,
    },

    /// Build a project for the RISC-V target
    Build {
        /// Project name
        name: String,

        /// Also produce a raw binary next to the executable
        #[arg(long)]
        bin: bool,
    },

    /// Simulate a prebuilt binary on a core
    Simulate {
        /// Core name
        core: String,

        /// Raw binary or linked executable
        binary: PathBuf,

        /// Ask the testbench for a waveform dump
        #[arg(long)]
        vcd: bool,

        /// Wall-clock budget in the configured timeout unit
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Convert a binary file into a hex memory image
    Bin2hex {
        /// Binary input file
        input: PathBuf,

        /// Hex image to write
        #[arg(value_name = "OUTPUT")]
        image: PathBuf,

        /// Bytes per word: 1, 2, 4 or 8
        #[arg(long, default_value_t = 4)]
        word_size: usize,

        /// Byte order: little, big
        #[arg(long, default_value = "little")]
        endianness: Endianness,

        /// Pad the image with zero words up to this length
        #[arg(long)]
        min_words: Option<usize>,

        /// Truncate the image to this length
        #[arg(long)]
        max_words: Option<usize>,

        /// Only describe the input, do not write an image
        #[arg(long)]
        info: bool,
    },

    /// Check that the external tools are installed
    Tools,

    /// Write a default rvtest.toml
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormatArg {
    Human,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ProfileArg {
    Debug,
    Release,
}

/// Parse arguments, handling the `cargo rvtest` calling pattern
fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();

    // `cargo rvtest test` runs us as ["cargo-rvtest", "rvtest", "test"]
    if args.len() > 1 && args[1] == "rvtest" {
        let mut filtered_args = vec![args[0].clone()];
        filtered_args.extend(args[2..].iter().cloned());
        if filtered_args.len() == 1 {
            filtered_args.push("--help".to_string());
        }
        Cli::parse_from(filtered_args)
    } else {
        Cli::parse()
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();
    init_tracing(cli.verbose)?;

    let args = GlobalArgs::from_cli(&cli);
    match run(cli.command, &args).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            args.output.error(&format!("{:#}", e));
            std::process::exit(1);
        },
    }
}

async fn run(command: Commands, args: &GlobalArgs) -> Result<i32> {
    match command {
        Commands::Test {
            project,
            core,
            jobs,
            vcd,
            save_report,
        } => cmd_test(args, TestFilter { project, core }, jobs, vcd, save_report).await,
        Commands::List { project, core } => cmd_list(args, &TestFilter { project, core }).map(ok),
        Commands::Cores => cmd_cores(args).map(ok),
        Commands::CoreInfo { core } => cmd_core_info(args, &core).map(ok),
        Commands::NewCore {
            name,
            files,
            description,
        } => cmd_new_core(args, &name, &files, &description).map(ok),
        Commands::Projects => cmd_projects(args).map(ok),
        Commands::ProjectInfo { name } => cmd_project_info(args, &name).map(ok),
        Commands::New {
            name,
            template,
            core,
        } => cmd_new(args, &name, template, core).map(ok),
        Commands::Build { name, bin } => cmd_build(args, &name, bin).map(ok),
        Commands::Simulate {
            core,
            binary,
            vcd,
            timeout,
        } => cmd_simulate(args, &core, &binary, vcd, timeout),
        Commands::Bin2hex {
            input,
            image,
            word_size,
            endianness,
            min_words,
            max_words,
            info,
        } => {
            let mut options = EncodeOptions::new(word_size, endianness);
            if let Some(min_words) = min_words {
                options = options.with_min_words(min_words);
            }
            if let Some(max_words) = max_words {
                options = options.with_max_words(max_words);
            }
            cmd_bin2hex(args, &input, &image, options, info).map(ok)
        },
        Commands::Tools => cmd_tools(args),
        Commands::InitConfig { force } => cmd_init_config(args, force).map(ok),
    }
}

fn ok(_: ()) -> i32 {
    0
}

/// Parallelism from `--jobs`, then `tests.jobs`, then the CPU count
fn effective_jobs(cli_jobs: Option<usize>, config_jobs: usize) -> usize {
    cli_jobs
        .filter(|&jobs| jobs > 0)
        .or(Some(config_jobs).filter(|&jobs| jobs > 0))
        .unwrap_or_else(num_cpus::get)
        .max(1)
}

async fn cmd_test(
    args: &GlobalArgs,
    filter: TestFilter,
    jobs: Option<usize>,
    vcd: bool,
    save_report: bool,
) -> Result<i32> {
    let output = &args.output;
    let (root, config) = args.workspace()?;

    let discovery = discover(&config.projects_dir(&root), &DiscoveryDefaults::from_config(&config))
        .filtered(&filter);
    for problem in &discovery.problems {
        output.warning(&problem.to_string());
    }

    let cases = discovery.cases;
    let jobs = effective_jobs(jobs, config.tests.jobs);
    if cases.is_empty() {
        output.warning("No test cases selected");
    } else {
        output.header(&format!(
            "Running {} test case{} ({} parallel, {} build)",
            cases.len(),
            if cases.len() == 1 { "" } else { "s" },
            jobs,
            config.build.profile
        ));
    }

    let progress = Arc::new(CaseProgress::new(output.clone(), cases.len(), args.verbose));
    let runner = RegressionRunner::new(&root, &config, Arc::new(PathToolResolver::new()), &cases)
        .context("Failed to set up regression runner")?
        .with_vcd(vcd)
        .with_observer(progress);

    let started_at = Utc::now();
    let started = Instant::now();
    let verdicts = run_parallel(&runner, cases, jobs).await?;
    let report = RegressionReport::new(
        runner.invocation().to_string(),
        started_at,
        started.elapsed(),
        verdicts,
    )
    .with_problems(&discovery.problems);

    if save_report {
        let path = config.output_dir(&root).join(REPORT_FILE);
        report.save(&path).context("Failed to save report")?;
        output.info(&format!("Report written to {}", path.display()));
    }

    if output.is_json() {
        output.json(&report)?;
    } else {
        print_summary(args, &report);
    }
    Ok(report.exit_code())
}

/// Run cases on the blocking pool, at most `jobs` at a time, keeping the
/// verdicts in case order
async fn run_parallel(
    runner: &RegressionRunner,
    cases: Vec<TestCase>,
    jobs: usize,
) -> Result<Vec<Verdict>> {
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut slots: Vec<Option<Verdict>> = vec![None; cases.len()];
    let mut set = JoinSet::new();

    for (index, case) in cases.into_iter().enumerate() {
        let permit = semaphore.clone().acquire_owned().await.context("Case scheduler closed")?;
        let runner = runner.clone();
        set.spawn_blocking(move || {
            let _permit = permit;
            (index, runner.run_case(&case))
        });
    }

    while let Some(joined) = set.join_next().await {
        let (index, verdict) = joined.context("Test case worker panicked")?;
        slots[index] = Some(verdict);
    }
    Ok(slots.into_iter().flatten().collect())
}

fn print_summary(args: &GlobalArgs, report: &RegressionReport) {
    let output = &args.output;
    println!();
    output.header("Summary");

    for verdict in report.failures() {
        output.info(&format!(
            "{} {}: {}",
            output.status_label(false),
            output.name(&verdict.case.to_string()),
            verdict.diagnostic.as_deref().unwrap_or("unknown failure")
        ));
        if args.verbose && !verdict.output.is_empty() {
            output.detail("device output:");
            for line in excerpt(&verdict.output, 20).lines() {
                output.detail(line);
            }
        }
        output.detail(&format!("work dir: {}", verdict.work_dir.display()));
    }
    for problem in &report.problems {
        output.warning(&format!("skipped: {}", problem));
    }

    let line = format!(
        "{} passed, {} failed, {} total in {}",
        report.passed,
        report.failed,
        report.total,
        format_duration(report.duration)
    );
    if report.all_passed() {
        output.success(&line);
    } else {
        output.error(&line);
    }
}

#[derive(Serialize)]
struct CaseListing {
    cases:    Vec<TestCase>,
    problems: Vec<String>,
}

fn cmd_list(args: &GlobalArgs, filter: &TestFilter) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let discovery = discover(&config.projects_dir(&root), &DiscoveryDefaults::from_config(&config))
        .filtered(filter);

    if output.is_json() {
        return output.json(&CaseListing {
            cases:    discovery.cases,
            problems: discovery.problems.iter().map(ToString::to_string).collect(),
        });
    }

    output.header(&format!("{} test case(s)", discovery.cases.len()));
    for case in &discovery.cases {
        output.detail(&format!(
            "{} ({} ms, {} expectation(s))",
            output.name(&case.to_string()),
            case.timeout.as_millis(),
            case.expected_output.len()
        ));
    }
    for problem in &discovery.problems {
        output.warning(&problem.to_string());
    }
    Ok(())
}

#[derive(Serialize)]
struct CoreSummary {
    name:        String,
    description: Option<String>,
    error:       Option<String>,
}

fn core_registry(root: &Path, config: &RvTestConfig) -> CoreRegistry {
    CoreRegistry::new(config.cores_dir(root))
}

fn cmd_cores(args: &GlobalArgs) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let registry = core_registry(&root, &config);

    let summaries: Vec<CoreSummary> = registry
        .list_cores()
        .into_iter()
        .map(|name| match registry.describe(&name) {
            Ok(core) => CoreSummary {
                name,
                description: Some(core.description),
                error: None,
            },
            Err(e) => CoreSummary {
                name,
                description: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    if output.is_json() {
        return output.json(&summaries);
    }

    output.header(&format!("Cores in {}", registry.cores_dir().display()));
    if summaries.is_empty() {
        output.detail("(none)");
    }
    for core in &summaries {
        match (&core.description, &core.error) {
            (_, Some(error)) => output.detail(&format!("{} (invalid: {})", core.name, error)),
            (Some(description), None) if !description.is_empty() => {
                output.detail(&format!("{} - {}", output.name(&core.name), description))
            },
            _ => output.detail(&output.name(&core.name)),
        }
    }
    Ok(())
}

fn cmd_core_info(args: &GlobalArgs, core: &str) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let descriptor = core_registry(&root, &config).describe(core)?;

    if output.is_json() {
        return output.json(&descriptor);
    }

    output.header(&descriptor.name);
    if !descriptor.description.is_empty() {
        output.detail(&descriptor.description);
    }
    output.detail(&format!("directory:   {}", descriptor.dir.display()));
    output.detail(&format!("simulator:   {}", descriptor.simulator));
    output.detail(&format!(
        "memory:      {} bytes at 0x{:08x} ({} words of {} bytes, {} endian)",
        descriptor.memory.size_bytes,
        descriptor.memory.base_address,
        descriptor.memory_words(),
        descriptor.memory.word_size,
        descriptor.memory.endianness
    ));
    for (name, address) in &descriptor.peripherals {
        output.detail(&format!("{:<12} 0x{:08x}", format!("{}:", name), address));
    }
    output.detail("sources:");
    for file in &descriptor.source_files {
        output.detail(&format!("  {}", file.display()));
    }
    Ok(())
}

fn cmd_new_core(args: &GlobalArgs, name: &str, files: &[String], description: &str) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let path = core_registry(&root, &config)
        .create_core(name, files, description)
        .with_context(|| format!("Failed to create core '{}'", name))?;

    output.json(&serde_json::json!({ "core": name, "descriptor": path }))?;
    output.success(&format!("Created core {} at {}", output.name(name), path.display()));
    Ok(())
}

fn cmd_projects(args: &GlobalArgs) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let manager = ProjectManager::from_config(&root, &config);
    let projects = manager.list_projects();

    if output.is_json() {
        return output.json(&projects);
    }

    output.header(&format!("Projects in {}", manager.projects_dir().display()));
    if projects.is_empty() {
        output.detail("(none)");
    }
    for project in &projects {
        output.detail(&output.name(project));
    }
    Ok(())
}

fn cmd_project_info(args: &GlobalArgs, name: &str) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let manager = ProjectManager::from_config(&root, &config);
    let info = manager.project_info(name)?;

    let cases = if info.has_test_config {
        let spec = load_spec(&info.path.join(TEST_SPEC_FILE))?;
        expand_spec(name, &spec, &DiscoveryDefaults::from_config(&config))?
    } else {
        vec![]
    };

    if output.is_json() {
        return output.json(&serde_json::json!({ "project": info, "cases": cases }));
    }

    output.header(&info.name);
    output.detail(&format!("path:        {}", info.path.display()));
    output.detail(&format!("Cargo.toml:  {}", if info.has_manifest { "yes" } else { "missing" }));
    output.detail(&format!(
        "test config: {}",
        if info.has_test_config { "yes" } else { "missing" }
    ));
    if let Some(metadata) = &info.metadata {
        for key in ["template", "target", "core"] {
            if let Some(value) = metadata.get(key).and_then(|v| v.as_str()) {
                output.detail(&format!("{:<12} {}", format!("{}:", key), value));
            }
        }
    }
    for case in &cases {
        output.detail(&format!("case: {} ({} ms)", case, case.timeout.as_millis()));
    }
    Ok(())
}

fn cmd_new(
    args: &GlobalArgs,
    name: &str,
    template: ProjectTemplate,
    core: Option<String>,
) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let core = core.unwrap_or_else(|| config.tests.default_core.clone());

    let defaults = NewProject {
        template,
        core: core.clone(),
        timeout: config.tests.default_timeout,
        ..NewProject::default()
    };
    let options = match core_registry(&root, &config).describe(&core) {
        Ok(descriptor) => defaults.for_core(&descriptor),
        Err(e) => {
            output.warning(&format!("{}; using the default memory map", e));
            defaults
        },
    };

    let path = ProjectManager::from_config(&root, &config)
        .create_project(name, &options)
        .with_context(|| format!("Failed to create project '{}'", name))?;

    output.json(&serde_json::json!({ "project": name, "path": path, "template": template }))?;
    output.success(&format!(
        "Created {} project {} for {}",
        template,
        output.name(name),
        options.core
    ));
    output.detail(&path.display().to_string());
    Ok(())
}

fn cmd_build(args: &GlobalArgs, name: &str, bin: bool) -> Result<()> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    let manager = ProjectManager::from_config(&root, &config);

    output.info(&format!("Building {} ({})", output.name(name), config.build.profile));
    let artifact = manager.build(name, config.build.profile)?;

    let raw = if bin {
        let path = artifact.path.with_extension("bin");
        let resolver = PathToolResolver::new();
        Some(to_raw_binary(&artifact.path, &path, &resolver, &config.tools.objcopy)?)
    } else {
        None
    };

    output.json(&serde_json::json!({ "artifact": artifact, "binary": raw }))?;
    output.success(&format!("Built {}", artifact.path.display()));
    if let Some(raw) = raw {
        output.detail(&format!("raw binary: {}", raw.display()));
    }
    Ok(())
}

fn cmd_simulate(
    args: &GlobalArgs,
    core: &str,
    binary: &Path,
    vcd: bool,
    timeout: Option<u64>,
) -> Result<i32> {
    let output = &args.output;
    let (root, config) = args.workspace()?;
    if !binary.is_file() {
        bail!("Binary {} not found", binary.display());
    }

    let descriptor = Arc::new(core_registry(&root, &config).describe(core)?);
    let timeout = config
        .simulation
        .timeout_unit
        .to_duration(timeout.unwrap_or(config.tests.default_timeout));
    let ctx = RunContext::for_simulation(&root, &config.output_dir(&root), &new_invocation_id(), core);
    debug!(work_dir = %ctx.work_dir.display(), "standalone simulation");

    let resolver: Arc<dyn ToolResolver> = Arc::new(PathToolResolver::new());
    let preparer =
        SimulationPreparer::new(config.simulation.clone(), resolver.clone(), config.tools.objcopy.clone())?;
    let run = preparer.prepare(&ctx, descriptor, binary)?;
    if let Some(truncation) = run.truncation {
        output.warning(&truncation.to_string());
    }

    output.info(&format!("Simulating {} on {}", binary.display(), output.name(core)));
    let result = SimulationExecutor::new(config.simulation.clone())
        .with_resolver(resolver)
        .execute(&run, vcd, timeout)?;

    if output.is_json() {
        output.json(&result)?;
    } else {
        let status = output.status_label(result.success);
        output.info(&format!("{} marker={} exit={:?}", status, result.marker, result.exit_code));
        match &result.device_output {
            Some(text) if !text.is_empty() => {
                output.detail("device output:");
                for line in excerpt(text, 40).lines() {
                    output.detail(line);
                }
            },
            _ => output.detail("no device output"),
        }
        if let Some(err) = result.failure() {
            output.error(&format!("{}: {}", err.kind(), err));
        }
        if let Some(waveform) = &result.waveform {
            output.detail(&format!("waveform: {}", waveform.display()));
        }
        output.detail(&format!("work dir: {}", result.work_dir.display()));
    }
    Ok(if result.success { 0 } else { 1 })
}

fn cmd_bin2hex(
    args: &GlobalArgs,
    input: &Path,
    target: &Path,
    options: EncodeOptions,
    info_only: bool,
) -> Result<()> {
    let output = &args.output;
    let converter = HexConverter::new(options);

    if info_only {
        let info = converter.info(input)?;
        if output.is_json() {
            return output.json(&info);
        }
        output.header(&input.display().to_string());
        output.detail(&format!("size:       {} bytes", info.size_bytes));
        output.detail(&format!("words:      {}", info.size_words));
        output.detail(&format!("word size:  {} bytes", info.word_size));
        output.detail(&format!("endianness: {}", info.endianness));
        return Ok(());
    }

    let image = converter
        .convert_file(input, target)
        .with_context(|| format!("Failed to convert {}", input.display()))?;
    if let Some(truncation) = image.truncation() {
        output.warning(&truncation.to_string());
    }

    output.json(&serde_json::json!({
        "input": input,
        "output": target,
        "words": image.len(),
        "word_size": image.word_size(),
        "truncation": image.truncation(),
    }))?;
    output.success(&format!(
        "Wrote {} words of {} bytes to {}",
        image.len(),
        image.word_size(),
        target.display()
    ));
    Ok(())
}

fn cmd_tools(args: &GlobalArgs) -> Result<i32> {
    let output = &args.output;
    // Usable outside a workspace; the configured tool names apply inside one.
    let config = match args.workspace() {
        Ok((_, config)) => config,
        Err(e) => {
            debug!(error = %e, "no workspace configuration, probing default tools");
            RvTestConfig::default()
        },
    };
    let report = tool_report(&config, &PathToolResolver::new());
    let missing = report.iter().filter(|status| !status.available()).count();

    if output.is_json() {
        output.json(&report)?;
    } else {
        output.header("External tools");
        for status in &report {
            match &status.resolved {
                Some(tool) => output.detail(&format!(
                    "{} {:<20} {} {}",
                    output.status_label(true),
                    status.purpose,
                    tool.path.display(),
                    status.version.as_deref().unwrap_or("")
                )),
                None => output.detail(&format!(
                    "{} {:<20} none of: {}",
                    output.status_label(false),
                    status.purpose,
                    status.candidates.join(", ")
                )),
            }
        }
    }
    Ok(if missing == 0 { 0 } else { 1 })
}

fn cmd_init_config(args: &GlobalArgs, force: bool) -> Result<()> {
    let output = &args.output;
    let root = match &args.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let path = root.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    RvTestConfig::default().save_to_file(&path)?;
    output.json(&serde_json::json!({ "config": path }))?;
    output.success(&format!("Wrote {}", path.display()));
    Ok(())
}
