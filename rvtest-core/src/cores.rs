//! Core descriptor registry
//!
//! Each simulated core lives in `cores/<name>/` next to a `core.json`
//! descriptor listing its HDL sources, memory layout and peripheral
//! addresses. Descriptors are validated on load; a core that fails validation
//! is reported as not found together with the reason.

use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    error::{
        RvTestError,
        RvTestResult,
    },
    hex::{
        Endianness,
        SUPPORTED_WORD_SIZES,
    },
};

/// Descriptor file name inside a core directory
pub const CORE_DESCRIPTOR_FILE: &str = "core.json";

/// Peripheral name whose base address receives device output
pub const DEVICE_OUTPUT_PERIPHERAL: &str = "uart";

/// Largest memory a descriptor may declare; the image is materialized in full
pub const MAX_MEMORY_BYTES: u64 = 256 << 20;

const DEFAULT_MEMORY_SIZE: &str = "64K";
const DEFAULT_UART_BASE: &str = "0x02000000";

/// Simulators a core can be described for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatorKind {
    /// Icarus Verilog (`iverilog` + `vvp`)
    #[default]
    Iverilog,
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulatorKind::Iverilog => write!(f, "iverilog"),
        }
    }
}

/// Memory region the program image is loaded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryLayout {
    /// Address the first image word is loaded at
    pub base_address: u64,
    /// Memory size; the image is padded to this length
    pub size_bytes:   u64,
    /// Bytes per image word
    pub word_size:    usize,
    /// Byte order of each image word
    pub endianness:   Endianness,
}

/// Validated description of one simulated core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreDescriptor {
    /// Name declared in the descriptor
    pub name:         String,
    /// Free-form text shown by `core-info`
    pub description:  String,
    /// Core directory the sources are relative to
    pub dir:          PathBuf,
    /// HDL sources in compile order, relative to `dir`
    pub source_files: Vec<PathBuf>,
    /// Simulator the sources are written for
    pub simulator:    SimulatorKind,
    /// Where the program image goes
    pub memory:       MemoryLayout,
    /// Peripheral base addresses by name
    pub peripherals:  BTreeMap<String, u64>,
}

impl CoreDescriptor {
    /// Memory size expressed in words
    pub fn memory_words(&self) -> usize {
        (self.memory.size_bytes / self.memory.word_size as u64) as usize
    }

    /// Absolute paths of the HDL sources, in compile order
    pub fn source_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.source_files.iter().map(|f| self.dir.join(f))
    }

    /// Base address of the UART the testbench captures
    pub fn device_output_address(&self) -> Option<u64> {
        self.peripherals.get(DEVICE_OUTPUT_PERIPHERAL).copied()
    }
}

/// A JSON number or a string such as `"64K"` or `"0x02000000"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

impl NumberOrText {
    fn value(&self) -> Result<u64, String> {
        match self {
            NumberOrText::Number(n) => Ok(*n),
            NumberOrText::Text(s) => parse_size(s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CoreFile {
    name:          String,
    #[serde(default)]
    description:   String,
    verilog_files: Vec<String>,
    #[serde(default)]
    simulator:     SimulatorKind,
    memory:        MemoryFile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uart:          Option<PeripheralFile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    peripherals:   BTreeMap<String, PeripheralFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_address: Option<NumberOrText>,
    size:         NumberOrText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word_size:    Option<NumberOrText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endianness:   Option<Endianness>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeripheralFile {
    base_address: NumberOrText,
}

/// Parse a size or address: plain integer, `0x` hex, or a `K`/`M`/`G`
/// suffixed count optionally followed by `B` (case-insensitive)
pub fn parse_size(text: &str) -> Result<u64, String> {
    let lower = text.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Err("empty value".to_string());
    }

    if let Some(hex) = lower.strip_prefix("0x") {
        return u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|_| format!("invalid hex value '{}'", text));
    }

    let digits = lower.strip_suffix('b').unwrap_or(&lower);
    let (number, multiplier) = match digits.chars().last() {
        Some('k') => (&digits[..digits.len() - 1], 1u64 << 10),
        Some('m') => (&digits[..digits.len() - 1], 1u64 << 20),
        Some('g') => (&digits[..digits.len() - 1], 1u64 << 30),
        _ => (digits, 1u64),
    };

    number
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid size '{}'", text))
}

/// Read access to the cores directory
#[derive(Debug, Clone)]
pub struct CoreRegistry {
    cores_dir: PathBuf,
}

impl CoreRegistry {
    pub fn new(cores_dir: impl Into<PathBuf>) -> Self {
        Self {
            cores_dir: cores_dir.into(),
        }
    }

    /// Directory the registry reads from
    pub fn cores_dir(&self) -> &Path {
        &self.cores_dir
    }

    /// Names of subdirectories holding a descriptor, sorted
    pub fn list_cores(&self) -> Vec<String> {
        if !self.cores_dir.is_dir() {
            return vec![];
        }

        let mut cores: Vec<String> = WalkDir::new(&self.cores_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| entry.path().join(CORE_DESCRIPTOR_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        cores.sort();
        cores
    }

    /// Load and validate the descriptor of `core`
    pub fn describe(&self, core: &str) -> RvTestResult<CoreDescriptor> {
        let not_found = |reason: String| RvTestError::CoreNotFound {
            name: core.to_string(),
            reason,
        };

        let dir = self.cores_dir.join(core);
        if !dir.is_dir() {
            return Err(not_found(format!("no directory {}", dir.display())));
        }

        let descriptor_path = dir.join(CORE_DESCRIPTOR_FILE);
        let content = fs::read_to_string(&descriptor_path).map_err(|e| {
            not_found(format!("cannot read {}: {}", descriptor_path.display(), e))
        })?;

        let raw: CoreFile = serde_json::from_str(&content)
            .map_err(|e| not_found(format!("invalid {}: {}", CORE_DESCRIPTOR_FILE, e)))?;

        let descriptor = validate(raw, dir).map_err(not_found)?;
        debug!(
            core,
            sources = descriptor.source_files.len(),
            memory_bytes = descriptor.memory.size_bytes,
            "loaded core descriptor"
        );
        Ok(descriptor)
    }

    /// Write a descriptor for a new core with default memory and UART layout
    pub fn create_core(
        &self,
        name: &str,
        verilog_files: &[String],
        description: &str,
    ) -> RvTestResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(RvTestError::Config(format!("invalid core name '{}'", name)));
        }
        if verilog_files.is_empty() {
            return Err(RvTestError::Config(
                "a core needs at least one HDL source file".to_string(),
            ));
        }

        let dir = self.cores_dir.join(name);
        let descriptor_path = dir.join(CORE_DESCRIPTOR_FILE);
        if descriptor_path.exists() {
            return Err(RvTestError::Config(format!(
                "core '{}' already exists at {}",
                name,
                descriptor_path.display()
            )));
        }

        let raw = CoreFile {
            name:          name.to_string(),
            description:   description.to_string(),
            verilog_files: verilog_files.to_vec(),
            simulator:     SimulatorKind::Iverilog,
            memory:        MemoryFile {
                base_address: Some(NumberOrText::Text("0x00000000".to_string())),
                size:         NumberOrText::Text(DEFAULT_MEMORY_SIZE.to_string()),
                word_size:    None,
                endianness:   None,
            },
            uart:          Some(PeripheralFile {
                base_address: NumberOrText::Text(DEFAULT_UART_BASE.to_string()),
            }),
            peripherals:   BTreeMap::new(),
        };

        fs::create_dir_all(&dir).map_err(|e| RvTestError::io(&dir, e))?;
        let json = serde_json::to_string_pretty(&raw)
            .map_err(|e| RvTestError::Config(format!("cannot serialize descriptor: {}", e)))?;
        fs::write(&descriptor_path, json).map_err(|e| RvTestError::io(&descriptor_path, e))?;

        Ok(dir)
    }
}

fn validate(raw: CoreFile, dir: PathBuf) -> Result<CoreDescriptor, String> {
    let size_bytes = raw.memory.size.value().map_err(|e| format!("memory.size: {}", e))?;
    let base_address = match &raw.memory.base_address {
        Some(value) => value.value().map_err(|e| format!("memory.base_address: {}", e))?,
        None => 0,
    };
    let word_size = match &raw.memory.word_size {
        Some(value) => value.value().map_err(|e| format!("memory.word_size: {}", e))? as usize,
        None => 4,
    };

    if !SUPPORTED_WORD_SIZES.contains(&word_size) {
        return Err(format!(
            "memory.word_size {} is not one of {:?}",
            word_size, SUPPORTED_WORD_SIZES
        ));
    }
    if size_bytes == 0 {
        return Err("memory.size must be greater than zero".to_string());
    }
    if size_bytes > MAX_MEMORY_BYTES {
        return Err(format!(
            "memory.size {} exceeds the {} byte limit",
            size_bytes, MAX_MEMORY_BYTES
        ));
    }
    if size_bytes % word_size as u64 != 0 {
        return Err(format!(
            "memory.size {} is not a multiple of the {}-byte word size",
            size_bytes, word_size
        ));
    }

    if raw.verilog_files.is_empty() {
        return Err("verilog_files is empty".to_string());
    }
    let mut source_files = Vec::with_capacity(raw.verilog_files.len());
    for file in &raw.verilog_files {
        let relative = PathBuf::from(file);
        if relative.is_absolute() {
            return Err(format!("source file '{}' must be relative to the core directory", file));
        }
        if !dir.join(&relative).is_file() {
            return Err(format!("source file '{}' does not exist", file));
        }
        source_files.push(relative);
    }

    let mut peripherals = BTreeMap::new();
    for (name, peripheral) in &raw.peripherals {
        let address = peripheral
            .base_address
            .value()
            .map_err(|e| format!("peripherals.{}.base_address: {}", name, e))?;
        peripherals.insert(name.clone(), address);
    }
    if let Some(uart) = &raw.uart {
        let address = uart.base_address.value().map_err(|e| format!("uart.base_address: {}", e))?;
        peripherals.insert(DEVICE_OUTPUT_PERIPHERAL.to_string(), address);
    }

    Ok(CoreDescriptor {
        name: raw.name,
        description: raw.description,
        dir,
        source_files,
        simulator: raw.simulator,
        memory: MemoryLayout {
            base_address,
            size_bytes,
            word_size,
            endianness: raw.memory.endianness.unwrap_or_default(),
        },
        peripherals,
    })
}

/// Descriptors loaded once for an invocation and shared read-only
#[derive(Debug, Clone)]
pub struct CoreCatalog {
    registry: CoreRegistry,
    entries:  BTreeMap<String, Result<Arc<CoreDescriptor>, String>>,
}

impl CoreCatalog {
    /// Load every named core up front; failures are kept and reported on
    /// lookup
    pub fn load<'a>(registry: CoreRegistry, cores: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entries = BTreeMap::new();
        for core in cores {
            if entries.contains_key(core) {
                continue;
            }
            let entry = match registry.describe(core) {
                Ok(descriptor) => Ok(Arc::new(descriptor)),
                Err(RvTestError::CoreNotFound { reason, .. }) => Err(reason),
                Err(other) => Err(other.to_string()),
            };
            entries.insert(core.to_string(), entry);
        }
        Self { registry, entries }
    }

    /// Descriptor of `core`, read from disk when it was not preloaded
    pub fn get(&self, core: &str) -> RvTestResult<Arc<CoreDescriptor>> {
        match self.entries.get(core) {
            Some(Ok(descriptor)) => Ok(Arc::clone(descriptor)),
            Some(Err(reason)) => Err(RvTestError::CoreNotFound {
                name:   core.to_string(),
                reason: reason.clone(),
            }),
            None => self.registry.describe(core).map(Arc::new),
        }
    }

    pub fn registry(&self) -> &CoreRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_core(root: &Path, name: &str, descriptor: &str, sources: &[&str]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CORE_DESCRIPTOR_FILE), descriptor).unwrap();
        for source in sources {
            let path = dir.join(source);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "module top; endmodule\n").unwrap();
        }
    }

    const PICORV32: &str = r#"{
        "name": "picorv32",
        "description": "Size-optimized RV32I core",
        "verilog_files": ["rtl/picorv32.v", "testbench.v"],
        "simulator": "iverilog",
        "memory": { "base_address": "0x00000000", "size": "64K" },
        "uart": { "base_address": "0x02000000" },
        "synthesis": { "ignored": true }
    }"#;

    #[test]
    fn test_parse_size_forms() {
        assert_eq!(parse_size("65536"), Ok(65536));
        assert_eq!(parse_size("0x10000"), Ok(65536));
        assert_eq!(parse_size("64K"), Ok(65536));
        assert_eq!(parse_size("64kb"), Ok(65536));
        assert_eq!(parse_size("1M"), Ok(1 << 20));
        assert_eq!(parse_size("2GB"), Ok(2 << 30));
        assert_eq!(parse_size("0x1b"), Ok(27));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_describe_valid_core() {
        let temp = TempDir::new().unwrap();
        write_core(temp.path(), "picorv32", PICORV32, &["rtl/picorv32.v", "testbench.v"]);

        let registry = CoreRegistry::new(temp.path());
        let core = registry.describe("picorv32").unwrap();

        assert_eq!(core.name, "picorv32");
        assert_eq!(core.memory.size_bytes, 65536);
        assert_eq!(core.memory.word_size, 4);
        assert_eq!(core.memory.endianness, Endianness::Little);
        assert_eq!(core.memory_words(), 16384);
        assert_eq!(core.device_output_address(), Some(0x0200_0000));
        assert_eq!(
            core.source_files,
            vec![PathBuf::from("rtl/picorv32.v"), PathBuf::from("testbench.v")]
        );
    }

    #[test]
    fn test_list_cores_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        write_core(temp.path(), "zeta", PICORV32, &[]);
        write_core(temp.path(), "alpha", PICORV32, &[]);
        fs::create_dir_all(temp.path().join("no-descriptor")).unwrap();

        let registry = CoreRegistry::new(temp.path());
        assert_eq!(registry.list_cores(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_missing_core_directory() {
        let temp = TempDir::new().unwrap();
        let err = CoreRegistry::new(temp.path()).describe("ghost").unwrap_err();
        assert!(matches!(err, RvTestError::CoreNotFound { ref name, .. } if name == "ghost"));
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let temp = TempDir::new().unwrap();
        let cases = [
            ("not-json", "{ nope", "invalid core.json"),
            ("no-name", r#"{"verilog_files": ["a.v"], "memory": {"size": 1024}}"#, "name"),
            (
                "bad-size",
                r#"{"name": "x", "verilog_files": ["a.v"], "memory": {"size": "huge"}}"#,
                "memory.size",
            ),
            (
                "huge-size",
                r#"{"name": "x", "verilog_files": ["a.v"], "memory": {"size": "16G"}}"#,
                "exceeds",
            ),
            (
                "odd-size",
                r#"{"name": "x", "verilog_files": ["a.v"], "memory": {"size": 1026, "word_size": 4}}"#,
                "multiple",
            ),
            (
                "missing-source",
                r#"{"name": "x", "verilog_files": ["a.v", "gone.v"], "memory": {"size": 1024}}"#,
                "gone.v",
            ),
        ];

        for (name, descriptor, _) in &cases {
            write_core(temp.path(), name, descriptor, &["a.v"]);
        }

        let registry = CoreRegistry::new(temp.path());
        for (name, _, fragment) in &cases {
            match registry.describe(name) {
                Err(RvTestError::CoreNotFound { reason, .. }) => {
                    assert!(reason.contains(fragment), "{name}: {reason}");
                },
                other => panic!("{name}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_numeric_and_big_endian_memory() {
        let temp = TempDir::new().unwrap();
        write_core(
            temp.path(),
            "be",
            r#"{"name": "be", "verilog_files": ["a.v"],
                "memory": {"size": 4096, "word_size": 8, "endianness": "big"},
                "peripherals": {"gpio": {"base_address": "0x03000000"}}}"#,
            &["a.v"],
        );

        let core = CoreRegistry::new(temp.path()).describe("be").unwrap();
        assert_eq!(core.memory_words(), 512);
        assert_eq!(core.memory.endianness, Endianness::Big);
        assert_eq!(core.peripherals.get("gpio"), Some(&0x0300_0000));
        assert_eq!(core.device_output_address(), None);
    }

    #[test]
    fn test_create_core_round_trips() {
        let temp = TempDir::new().unwrap();
        let registry = CoreRegistry::new(temp.path());

        let dir = registry
            .create_core("mycore", &["core.v".to_string()], "Test core")
            .unwrap();
        fs::write(dir.join("core.v"), "module core; endmodule\n").unwrap();

        let core = registry.describe("mycore").unwrap();
        assert_eq!(core.description, "Test core");
        assert_eq!(core.memory.size_bytes, 64 * 1024);
        assert_eq!(core.device_output_address(), Some(0x0200_0000));

        assert!(registry.create_core("mycore", &["core.v".to_string()], "").is_err());
    }

    #[test]
    fn test_catalog_remembers_failures() {
        let temp = TempDir::new().unwrap();
        write_core(temp.path(), "picorv32", PICORV32, &["rtl/picorv32.v", "testbench.v"]);

        let catalog = CoreCatalog::load(
            CoreRegistry::new(temp.path()),
            ["picorv32", "ghost", "picorv32"],
        );

        let first = catalog.get("picorv32").unwrap();
        let second = catalog.get("picorv32").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(catalog.get("ghost"), Err(RvTestError::CoreNotFound { .. })));
    }
}
