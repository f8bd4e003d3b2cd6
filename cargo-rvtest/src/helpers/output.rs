//! Output formatting for human and machine consumers
//!
//! Human output goes to stdout with optional colors. JSON output prints exactly
//! one JSON document per command so it can be piped into other tools.

use anyhow::{
    Context,
    Result,
};
use colored::Colorize;
use serde::Serialize;

/// Output formats supported by every command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text, colored on terminals
    #[default]
    Human,
    /// A single pretty-printed JSON document
    Json,
}

/// Prints command results in the selected format
#[derive(Debug, Clone)]
pub struct OutputManager {
    format:     OutputFormat,
    use_colors: bool,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            use_colors: matches!(format, OutputFormat::Human),
        }
    }

    /// Enable or disable colors; JSON output is never colored
    pub fn with_color(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors && matches!(self.format, OutputFormat::Human);
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    pub fn use_colors(&self) -> bool {
        self.use_colors
    }

    /// Section heading
    pub fn header(&self, text: &str) {
        if self.is_json() {
            return;
        }
        if self.use_colors {
            println!("{}", text.bold());
        } else {
            println!("{}", text);
        }
    }

    pub fn info(&self, text: &str) {
        if !self.is_json() {
            println!("{}", text);
        }
    }

    /// Indented detail line
    pub fn detail(&self, text: &str) {
        if !self.is_json() {
            println!("  {}", text);
        }
    }

    pub fn success(&self, text: &str) {
        if self.is_json() {
            return;
        }
        if self.use_colors {
            println!("{} {}", "✓".bright_green(), text);
        } else {
            println!("[OK] {}", text);
        }
    }

    pub fn warning(&self, text: &str) {
        if self.is_json() {
            return;
        }
        if self.use_colors {
            eprintln!("{} {}", "warning:".bright_yellow().bold(), text);
        } else {
            eprintln!("warning: {}", text);
        }
    }

    /// Errors go to stderr in both formats
    pub fn error(&self, text: &str) {
        if self.use_colors {
            eprintln!("{} {}", "error:".bright_red().bold(), text);
        } else {
            eprintln!("error: {}", text);
        }
    }

    /// Colored PASS/FAIL label
    pub fn status_label(&self, passed: bool) -> String {
        match (passed, self.use_colors) {
            (true, true) => "PASS".bright_green().bold().to_string(),
            (false, true) => "FAIL".bright_red().bold().to_string(),
            (true, false) => "PASS".to_string(),
            (false, false) => "FAIL".to_string(),
        }
    }

    /// Highlight a name (project, core, path)
    pub fn name(&self, text: &str) -> String {
        if self.use_colors { text.bright_cyan().to_string() } else { text.to_string() }
    }

    /// Print `value` as JSON; no-op in human mode
    pub fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.is_json() {
            println!("{}", render_json(value)?);
        }
        Ok(())
    }
}

/// Pretty-printed JSON for `value`
pub fn render_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize JSON output")
}

/// Shorten long multi-line text for terminal output
pub fn excerpt(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    if lines.len() <= max_lines {
        return lines.join("\n");
    }
    let skipped = lines.len() - max_lines;
    format!(
        "... ({} earlier lines omitted)\n{}",
        skipped,
        lines[skipped..].join("\n")
    )
}
