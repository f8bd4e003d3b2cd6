//! Simulator invocation
//!
//! Compiles the prepared HDL sources and runs the resulting simulation inside
//! the working directory, under a wall-clock timeout. The testbench reports
//! back through files: captured UART output and an optional PASS/FAIL marker.

use std::{
    fmt,
    fs,
    io::Read,
    path::{
        Path,
        PathBuf,
    },
    process::{
        Child,
        Command,
        ExitStatus,
        Stdio,
    },
    sync::{
        mpsc,
        Arc,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

use serde::Serialize;
use tracing::{
    debug,
    info,
    warn,
};

use crate::{
    config::SimulationSettings,
    error::{
        RvTestError,
        RvTestResult,
    },
    prepare::SimulationRun,
    tools::{
        PathToolResolver,
        ToolResolver,
    },
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum time left for collecting output after the process exits
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Testbench verdict read from the marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarkerStatus {
    /// Testbench wrote `PASS`
    Pass,
    /// Testbench wrote `FAIL`
    Fail,
    /// Marker missing or unrecognized
    Unknown,
}

impl MarkerStatus {
    /// Interpret marker file contents
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "PASS" => MarkerStatus::Pass,
            "FAIL" => MarkerStatus::Fail,
            _ => MarkerStatus::Unknown,
        }
    }
}

impl fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerStatus::Pass => write!(f, "PASS"),
            MarkerStatus::Fail => write!(f, "FAIL"),
            MarkerStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Outcome of one compile-and-run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Derived from the simulation exit status only
    pub success:       bool,
    /// False when the HDL compiler rejected the sources
    pub compiled:      bool,
    /// Exit code of the failing stage, or of the simulation
    pub exit_code:     Option<i32>,
    /// Short description of a stage failure
    pub error:         Option<String>,
    /// Standard output of the last stage that ran
    pub stdout:        String,
    /// Standard error of the last stage that ran
    pub stderr:        String,
    /// PASS/FAIL marker written by the testbench
    pub marker:        MarkerStatus,
    /// Contents of the device output file, when the testbench wrote one
    pub device_output: Option<String>,
    /// Waveform dump, when one was requested and written
    pub waveform:      Option<PathBuf>,
    /// Directory the simulation ran in
    pub work_dir:      PathBuf,
}

impl RunResult {
    /// Error describing a failed run, if it failed
    pub fn failure(&self) -> Option<RvTestError> {
        if self.success {
            None
        } else if !self.compiled {
            Some(RvTestError::CompilationFailed {
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            })
        } else {
            Some(RvTestError::SimulationFailed {
                exit_code: self.exit_code,
                stderr:    self.stderr.clone(),
            })
        }
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit status of the process
    pub status: ExitStatus,
    /// Standard output collected within the time budget
    pub stdout: String,
    /// Standard error collected within the time budget
    pub stderr: String,
}

/// Runs prepared simulations
#[derive(Debug, Clone)]
pub struct SimulationExecutor {
    settings: SimulationSettings,
    resolver: Arc<dyn ToolResolver>,
}

impl SimulationExecutor {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            settings,
            resolver: Arc::new(PathToolResolver::new()),
        }
    }

    /// Look up the compiler and runtime through `resolver` instead of `PATH`
    pub fn with_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Compile and run `run`, optionally dumping a waveform
    pub fn execute(
        &self,
        run: &SimulationRun,
        vcd_requested: bool,
        timeout: Duration,
    ) -> RvTestResult<RunResult> {
        let work_dir = &run.context.work_dir;
        let executable = work_dir.join(&self.settings.executable_name);
        let compiler = self.resolver.resolve_one("simulation compiler", &self.settings.compiler)?;
        let runtime = self.resolver.resolve_one("simulation runtime", &self.settings.runtime)?;

        let mut compile = compiler.command();
        compile
            .args(&self.settings.compiler_args)
            .arg("-o")
            .arg(&executable)
            .args(&run.sources)
            .current_dir(work_dir);
        debug!(command = ?compile, "compiling simulation");

        let compiled = compile
            .output()
            .map_err(|e| RvTestError::spawn(&compiler.name, e))?;
        if !compiled.status.success() {
            return Ok(RunResult {
                success:       false,
                compiled:      false,
                exit_code:     compiled.status.code(),
                error:         Some("Compilation failed".to_string()),
                stdout:        String::from_utf8_lossy(&compiled.stdout).into_owned(),
                stderr:        String::from_utf8_lossy(&compiled.stderr).into_owned(),
                marker:        MarkerStatus::Unknown,
                device_output: None,
                waveform:      None,
                work_dir:      work_dir.clone(),
            });
        }

        let mut simulate = runtime.command();
        simulate.args(&self.settings.runtime_args).arg(&executable).current_dir(work_dir);
        if vcd_requested {
            simulate.arg("+vcd");
        }
        debug!(command = ?simulate, timeout_ms = timeout.as_millis() as u64, "running simulation");

        let output = run_with_timeout(simulate, &runtime.name, timeout)?;

        let marker = read_marker(&work_dir.join(&self.settings.marker_file));
        let device_output = read_optional(&work_dir.join(&self.settings.device_output_file));
        let waveform = Some(work_dir.join(&self.settings.waveform_file))
            .filter(|path| vcd_requested && path.is_file());

        info!(
            core = %run.core.name,
            exit_code = ?output.status.code(),
            marker = %marker,
            "simulation finished"
        );

        Ok(RunResult {
            success: output.status.success(),
            compiled: true,
            exit_code: output.status.code(),
            error: None,
            stdout: output.stdout,
            stderr: output.stderr,
            marker,
            device_output,
            waveform,
            work_dir: work_dir.clone(),
        })
    }
}

/// Run `cmd` to completion, killing it once `timeout` has elapsed
///
/// On unix the process leads its own process group. The whole group is
/// killed when the budget runs out, and again once the leader exits, so
/// nothing the simulator forked outlives the call. Output is collected for at
/// most the remaining budget.
pub fn run_with_timeout(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> RvTestResult<ProcessOutput> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RvTestError::spawn(program, e))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {},
            Err(e) => {
                kill_tree(&mut child);
                return Err(RvTestError::spawn(program, e));
            },
        }

        if started.elapsed() >= timeout {
            kill_tree(&mut child);
            warn!(program, timeout_ms = timeout.as_millis() as u64, "process timed out and was killed");
            return Err(RvTestError::Timeout { limit: timeout });
        }

        thread::sleep(POLL_INTERVAL);
    };

    // leftovers of a finished run still hold the pipes open
    kill_group(&child);

    let deadline = started + timeout.max(started.elapsed() + DRAIN_GRACE);
    Ok(ProcessOutput {
        status,
        stdout: stdout.map(|rx| collect(&rx, deadline)).unwrap_or_default(),
        stderr: stderr.map(|rx| collect(&rx, deadline)).unwrap_or_default(),
    })
}

fn kill_tree(child: &mut Child) {
    kill_group(child);
    // kill fails only if the process already exited; reap it either way
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::{
        sys::signal::{
            killpg,
            Signal,
        },
        unistd::Pid,
    };

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    // ESRCH once every member has exited
    if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, %errno, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(rx: &mpsc::Receiver<Vec<u8>>, deadline: Instant) -> String {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => {
            warn!("process output still open at the deadline; dropping it");
            String::new()
        },
    }
}

fn read_marker(path: &Path) -> MarkerStatus {
    match read_optional(path) {
        Some(text) => {
            let status = MarkerStatus::parse(&text);
            if status == MarkerStatus::Unknown {
                warn!(path = %path.display(), contents = %text.trim(), "unrecognized result marker");
            }
            status
        },
        None => MarkerStatus::Unknown,
    }
}

fn read_optional(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
