//! Live progress for regression runs
//!
//! Cases run in parallel, so progress is one line per finished case rather
//! than a redrawn bar.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Mutex,
    },
    time::{
        Duration,
        Instant,
    },
};

use colored::Colorize;
use rvtest_core::regression::{
    CaseObserver,
    CaseState,
    TestCase,
};

use super::OutputManager;

/// Prints a line when a case finishes; with `verbose` also every stage change
pub struct CaseProgress {
    output:   OutputManager,
    verbose:  bool,
    total:    usize,
    finished: AtomicUsize,
    started:  Mutex<HashMap<String, Instant>>,
}

impl CaseProgress {
    pub fn new(output: OutputManager, total: usize, verbose: bool) -> Self {
        Self {
            output,
            verbose,
            total,
            finished: AtomicUsize::new(0),
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Cases that reached a terminal state so far
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    fn elapsed(&self, case: &TestCase, state: CaseState) -> Option<Duration> {
        let mut started = self.started.lock().ok()?;
        let id = case.id();
        if state == CaseState::Pending {
            started.insert(id, Instant::now());
            None
        } else if state.is_terminal() {
            started.remove(&id).map(|t| t.elapsed())
        } else {
            started.get(&id).map(Instant::elapsed)
        }
    }
}

impl CaseObserver for CaseProgress {
    fn on_transition(&self, case: &TestCase, state: CaseState) {
        let elapsed = self.elapsed(case, state);
        let done = if state.is_terminal() {
            self.finished.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.finished()
        };
        if self.output.is_json() {
            return;
        }

        if state.is_terminal() {
            let timing = elapsed.map(format_duration).unwrap_or_default();
            let timing = if self.output.use_colors() {
                format!("({})", timing).bright_black().to_string()
            } else {
                format!("({})", timing)
            };
            println!(
                "[{}/{}] {} {} {}",
                done,
                self.total,
                self.output.status_label(state == CaseState::Passed),
                self.output.name(&case.to_string()),
                timing
            );
        } else if self.verbose && state != CaseState::Pending {
            self.output.detail(&format!("{} {}", case, state.to_string().to_lowercase()));
        }
    }
}

/// Format a duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if total_secs < 3600 {
        format!("{}m{}s", total_secs / 60, total_secs % 60)
    } else {
        format!("{}h{}m", total_secs / 3600, (total_secs % 3600) / 60)
    }
}
