//! File templates for new bare-metal projects

use std::{
    fmt,
    str::FromStr,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::error::RvTestError;

/// Greeting printed by the `hello-world` template
pub const HELLO_WORLD_GREETING: &str = "Hello, World from Rust on RISC-V!";

/// Starter program layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectTemplate {
    /// Writes a greeting to the UART and spins
    #[default]
    HelloWorld,
    /// Empty entry point
    Minimal,
}

impl ProjectTemplate {
    pub fn name(self) -> &'static str {
        match self {
            ProjectTemplate::HelloWorld => "hello-world",
            ProjectTemplate::Minimal => "minimal",
        }
    }

    /// Text the program is expected to print, used for the starter test
    pub fn expected_output(self) -> Vec<String> {
        match self {
            ProjectTemplate::HelloWorld => vec![HELLO_WORLD_GREETING.to_string()],
            ProjectTemplate::Minimal => vec![],
        }
    }
}

impl fmt::Display for ProjectTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProjectTemplate {
    type Err = RvTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hello-world" | "hello_world" => Ok(ProjectTemplate::HelloWorld),
            "minimal" => Ok(ProjectTemplate::Minimal),
            other => Err(RvTestError::Config(format!(
                "Unknown template '{}'. Available: hello-world, minimal",
                other
            ))),
        }
    }
}

pub(crate) fn cargo_manifest(name: &str) -> String {
    format!(
        r#"[package]
name = "{name}"
version = "0.1.0"
edition = "2021"

[dependencies]

[profile.dev]
panic = "abort"
opt-level = "s"

[profile.release]
panic = "abort"
opt-level = "s"
lto = true
codegen-units = 1
"#
    )
}

pub(crate) fn cargo_config(target: &str) -> String {
    format!(
        r#"[build]
target = "{target}"
rustflags = [
  "-C", "link-arg=-Tmemory.x",
  "-C", "link-arg=-Map=target/memory.map",
  "-C", "link-arg=--gc-sections",
  "-C", "linker=rust-lld",
  "-C", "default-linker-libraries=no"
]

[unstable]
build-std = ["core", "compiler_builtins"]
build-std-features = ["compiler-builtins-mem"]

[target.{target}]
runner = "echo 'Run this program with cargo rvtest simulate'"
"#
    )
}

pub(crate) fn memory_layout(origin: u64, length: &str) -> String {
    format!(
        r#"MEMORY
{{
  RAM : ORIGIN = 0x{origin:08X}, LENGTH = {length}
}}

SECTIONS
{{
  .text :
  {{
    *(.text.entry)
    *(.text*)
    . = ALIGN(4);
  }} > RAM

  .rodata :
  {{
    *(.rodata*)
    . = ALIGN(4);
  }} > RAM

  .data :
  {{
    *(.data*)
    . = ALIGN(4);
  }} > RAM

  .bss (NOLOAD) :
  {{
    _bss_start = .;
    *(.bss*)
    *(COMMON)
    . = ALIGN(4);
    _bss_end = .;
  }} > RAM

  _stack_start = ORIGIN(RAM) + LENGTH(RAM);
}}
"#
    )
}

pub(crate) fn main_source(template: ProjectTemplate, uart_base: u64) -> String {
    match template {
        ProjectTemplate::HelloWorld => format!(
            r#"#![no_std]
#![no_main]

use core::panic::PanicInfo;

const UART_TX_ADDR: usize = 0x{uart_base:08X};

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {{
    loop {{}}
}}

fn uart_putc(c: u8) {{
    unsafe {{
        core::ptr::write_volatile(UART_TX_ADDR as *mut u8, c);
    }}
}}

fn uart_puts(s: &str) {{
    for c in s.bytes() {{
        uart_putc(c);
    }}
}}

#[no_mangle]
pub extern "C" fn _start() -> ! {{
    uart_puts("{HELLO_WORLD_GREETING}\r\n");

    loop {{}}
}}
"#
        ),
        ProjectTemplate::Minimal => r#"#![no_std]
#![no_main]

use core::panic::PanicInfo;

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    loop {}
}
"#
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_world_prints_greeting() {
        let source = main_source(ProjectTemplate::HelloWorld, 0x0200_0000);
        assert!(source.contains("0x02000000"));
        assert!(source.contains(HELLO_WORLD_GREETING));
        assert!(source.contains("\\r\\n"));
    }

    #[test]
    fn test_memory_layout_origin() {
        let layout = memory_layout(0, "64K");
        assert!(layout.contains("ORIGIN = 0x00000000, LENGTH = 64K"));
    }

    #[test]
    fn test_template_names_round_trip() {
        for template in [ProjectTemplate::HelloWorld, ProjectTemplate::Minimal] {
            assert_eq!(template.name().parse::<ProjectTemplate>().unwrap(), template);
        }
        assert!("blinky".parse::<ProjectTemplate>().is_err());
    }
}
