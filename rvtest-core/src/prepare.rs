//! Simulation working directory preparation
//!
//! Turns a program binary and a core descriptor into a self-contained working
//! directory: the encoded memory image plus a copy of every HDL source, with
//! `$readmemh` calls pointed at the image.

use std::{
    borrow::Cow,
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use regex::{
    Captures,
    Regex,
};
use serde::Serialize;
use tracing::{
    debug,
    info,
};

use crate::{
    config::SimulationSettings,
    context::RunContext,
    cores::CoreDescriptor,
    error::{
        RvTestError,
        RvTestResult,
    },
    hex::{
        self,
        EncodeOptions,
        Truncation,
    },
    project::to_raw_binary,
    tools::ToolResolver,
};

/// Inputs without an extension above this size are treated as linked
/// executables and converted to a raw image first
pub const EXECUTABLE_SIZE_THRESHOLD: u64 = 1000;

const RAW_BINARY_FILE: &str = "program.bin";

/// A prepared working directory, ready for the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRun {
    /// Working directory the run was prepared in
    pub context:    RunContext,
    #[serde(skip)]
    pub core:       Arc<CoreDescriptor>,
    /// Encoded memory image
    pub image:      PathBuf,
    /// Copied HDL sources in compile order
    pub sources:    Vec<PathBuf>,
    /// Image length in words after padding
    pub image_words: usize,
    /// Set when the program did not fit the memory image
    pub truncation: Option<Truncation>,
}

/// Rewrites `$readmemh("<file>", ...)` so it loads a different file
#[derive(Debug, Clone)]
pub struct LoadDirectiveRewriter {
    pattern: Regex,
}

impl LoadDirectiveRewriter {
    pub fn new() -> RvTestResult<Self> {
        let pattern = Regex::new(r#"(\$readmemh\s*\(\s*)"[^"]*"(\s*[,)])"#)
            .map_err(|e| RvTestError::Config(format!("invalid load directive pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Replace the quoted filename of every load directive; everything else
    /// stays byte-for-byte
    pub fn rewrite<'a>(&self, text: &'a str, image_file: &str) -> Cow<'a, str> {
        self.pattern.replace_all(text, |caps: &Captures<'_>| {
            format!("{}\"{}\"{}", &caps[1], image_file, &caps[2])
        })
    }
}

/// Builds working directories for one orchestrator invocation
#[derive(Clone)]
pub struct SimulationPreparer {
    settings:   SimulationSettings,
    resolver:   Arc<dyn ToolResolver>,
    converters: Vec<String>,
    rewriter:   LoadDirectiveRewriter,
}

impl SimulationPreparer {
    pub fn new(
        settings: SimulationSettings,
        resolver: Arc<dyn ToolResolver>,
        converters: Vec<String>,
    ) -> RvTestResult<Self> {
        Ok(Self {
            settings,
            resolver,
            converters,
            rewriter: LoadDirectiveRewriter::new()?,
        })
    }

    /// Image length in words for `core`
    pub fn target_words(&self, core: &CoreDescriptor) -> usize {
        core.memory_words().max(self.settings.memory_floor_words)
    }

    /// Reset the working directory of `ctx` and fill it for `binary`
    pub fn prepare(
        &self,
        ctx: &RunContext,
        core: Arc<CoreDescriptor>,
        binary: &Path,
    ) -> RvTestResult<SimulationRun> {
        reset_dir(&ctx.work_dir)?;

        let raw = if looks_like_executable(binary)? {
            let output = ctx.work_file(RAW_BINARY_FILE);
            to_raw_binary(binary, &output, self.resolver.as_ref(), &self.converters)?
        } else {
            binary.to_path_buf()
        };

        let word_size = core.memory.word_size;
        let target_words = self.target_words(&core);
        let mut bytes = fs::read(&raw).map_err(|e| RvTestError::io(&raw, e))?;
        let target_bytes = target_words * word_size;
        if bytes.len() < target_bytes {
            bytes.resize(target_bytes, 0);
        }

        let options = EncodeOptions::new(word_size, core.memory.endianness)
            .with_min_words(target_words)
            .with_max_words(target_words);
        let image = hex::encode(&bytes, &options)?;
        let image_path = ctx.work_file(&self.settings.image_file);
        image.write_to(&image_path)?;

        let mut sources = Vec::with_capacity(core.source_files.len());
        for relative in &core.source_files {
            let src = core.dir.join(relative);
            let dst = ctx.work_dir.join(relative);
            self.copy_source(&src, &dst)?;
            sources.push(dst);
        }

        info!(
            core = %core.name,
            work_dir = %ctx.work_dir.display(),
            words = image.len(),
            "prepared simulation"
        );

        Ok(SimulationRun {
            context: ctx.clone(),
            core,
            image: image_path,
            sources,
            image_words: image.len(),
            truncation: image.truncation(),
        })
    }

    fn copy_source(&self, src: &Path, dst: &Path) -> RvTestResult<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| RvTestError::io(parent, e))?;
        }

        let bytes = fs::read(src).map_err(|e| RvTestError::io(src, e))?;
        let content = match std::str::from_utf8(&bytes) {
            Ok(text) => match self.rewriter.rewrite(text, &self.settings.image_file) {
                Cow::Owned(rewritten) => {
                    debug!(source = %src.display(), "redirected $readmemh to memory image");
                    rewritten.into_bytes()
                },
                Cow::Borrowed(_) => bytes,
            },
            // binary sources are copied untouched
            Err(_) => bytes,
        };

        fs::write(dst, content).map_err(|e| RvTestError::io(dst, e))
    }
}

/// Whether `path` should go through the binary converter first
pub fn looks_like_executable(path: &Path) -> RvTestResult<bool> {
    let metadata = fs::metadata(path).map_err(|e| RvTestError::io(path, e))?;
    Ok(path.extension().is_none() && metadata.len() > EXECUTABLE_SIZE_THRESHOLD)
}

fn reset_dir(dir: &Path) -> RvTestResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| RvTestError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| RvTestError::io(dir, e))
}
