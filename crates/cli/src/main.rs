//! TLMu module launcher.
//!
//! This binary runs one emulator module standalone, with a flat RAM as its bus. It performs:
//! 1. **Setup:** Tracing from `RUST_LOG`, an optional JSON configuration and the trailing emulator arguments.
//! 2. **Load:** A private copy of the module in the configured store, bound and configured.
//! 3. **Run:** The module's entry point on the main thread; the process exits with its return code.

use std::num::ParseIntError;
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tlmu::bus::MemoryTarget;
use tlmu::{Instance, InstanceConfig};

/// RAM size used when `--ram` is not given (64 MiB at address 0).
const DEFAULT_RAM: RamSpec = RamSpec {
    base: 0,
    size: 64 << 20,
};

#[derive(Parser, Debug)]
#[command(
    name = "tlmu-run",
    author,
    version,
    about = "Run a TLMu emulator module against a RAM bus model",
    long_about = "Loads a private copy of an emulator module, configures it and runs its entry point.\n\nArguments after `--` are appended to the emulator's argument vector.\n\nExamples:\n  tlmu-run --module ./libtlmu-arm.so -- -M versatilepb -kernel zImage\n  tlmu-run --module libtlmu-cris.so --name dsp --config dsp.json --ram 0x40000000:0x800000"
)]
struct Cli {
    /// Module path, or a library name the dynamic linker can find.
    #[arg(short, long)]
    module: String,

    /// Instance name; selects the private copy and log file.
    #[arg(short, long, default_value = "cpu0")]
    name: String,

    /// JSON instance configuration.
    #[arg(short, long)]
    config: Option<String>,

    /// Bus RAM as `base:size`; decimal or `0x` hexadecimal.
    #[arg(long, value_parser = parse_ram)]
    ram: Option<RamSpec>,

    /// Extra emulator arguments.
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
struct RamSpec {
    base: u64,
    size: usize,
}

fn parse_u64(text: &str) -> Result<u64, ParseIntError> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn parse_ram(text: &str) -> Result<RamSpec, String> {
    let (base, size) = text
        .split_once(':')
        .ok_or_else(|| format!("expected base:size, got {text:?}"))?;
    let base = parse_u64(base).map_err(|e| format!("bad base {base:?}: {e}"))?;
    let size = parse_u64(size).map_err(|e| format!("bad size {size:?}: {e}"))?;
    let size = usize::try_from(size).map_err(|e| format!("size {size} too large: {e}"))?;
    Ok(RamSpec { base, size })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match launch(&cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "tlmu-run failed");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Loads, configures and runs the module described by `cli`.
///
/// # Returns
///
/// The entry point's return code.
fn launch(cli: &Cli) -> tlmu::Result<i32> {
    let config = match &cli.config {
        Some(path) => InstanceConfig::from_file(path)?,
        None => InstanceConfig::default(),
    };

    let mut instance = Instance::from_config(cli.name.as_str(), &config)?;
    for arg in &cli.args {
        instance.append_arg(arg)?;
    }

    instance.load(&cli.module)?;
    instance.configure(&config)?;

    let ram = cli.ram.unwrap_or(DEFAULT_RAM);
    instance.attach_bus(MemoryTarget::new(ram.base, ram.size))?;
    info!(
        instance = instance.name(),
        ram_base = format_args!("{:#x}", ram.base),
        ram_size = ram.size,
        "bus RAM attached"
    );

    instance.run()
}
