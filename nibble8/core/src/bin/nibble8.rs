use anyhow::{bail, Context};
use clap::Parser;
use nibble8_core::{
    disassemble, load_snapshot, save_snapshot, BlockStore, Cpu, CpuState, Exit, MachineConfig,
    Memory, RunState, StdConsole,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nibble8",
    about = "Run a raw nibble8 program image against main memory and the persistent block store."
)]
struct Args {
    /// Raw program image to load into memory.
    #[arg(value_name = "PROGRAM", required_unless_present = "snapshot_in")]
    program: Option<PathBuf>,

    /// JSON machine configuration; flags below override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Block store backing file (created zero-filled if missing).
    #[arg(long, value_name = "PATH", env = "NIBBLE8_DISK")]
    disk: Option<PathBuf>,

    /// Memory address the program image is copied to.
    #[arg(long, value_name = "ADDR", value_parser = parse_number)]
    load_addr: Option<usize>,

    /// Initial program counter (defaults to the load address).
    #[arg(
        long,
        value_name = "ADDR",
        value_parser = parse_number,
        conflicts_with = "snapshot_in"
    )]
    entry: Option<usize>,

    /// Stop after this many instructions.
    #[arg(long, value_name = "N")]
    steps: Option<u64>,

    /// Print a disassembly of the program and exit.
    #[arg(long, default_value_t = false, requires = "program")]
    disasm: bool,

    /// Restore CPU state and memory from a snapshot instead of loading a program.
    #[arg(long, value_name = "PATH", conflicts_with = "program")]
    snapshot_in: Option<PathBuf>,

    /// Save a snapshot after the run stops.
    #[arg(long, value_name = "PATH")]
    snapshot_out: Option<PathBuf>,

    /// Print the final machine state as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log every executed instruction.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_number(text: &str) -> Result<usize, String> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => trimmed.parse::<usize>(),
    };
    parsed.map_err(|e| format!("invalid number {text:?}: {e}"))
}

#[derive(Serialize)]
struct Report {
    run_state: RunState,
    cpu: CpuState,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<String>,
}

fn init_logging(trace: bool) {
    let default = if trace {
        "nibble8=info,nibble8_core=trace"
    } else {
        "nibble8=info,nibble8_core=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => MachineConfig::default(),
    }
    .with_env_overrides();
    if let Some(disk) = &args.disk {
        config.disk_path = disk.clone();
    }
    if let Some(addr) = args.load_addr {
        config.load_address = addr;
    }
    if let Some(entry) = args.entry {
        let Ok(entry) = u16::try_from(entry) else {
            bail!("entry 0x{entry:X} does not fit the 16-bit program counter");
        };
        config.entry = Some(entry);
    }
    if args.steps.is_some() {
        config.step_limit = args.steps;
    }
    Ok(config)
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.trace);
    let config = build_config(&args)?;

    let image = match &args.program {
        Some(path) => {
            fs::read(path).with_context(|| format!("reading program {}", path.display()))?
        }
        None => Vec::new(),
    };

    if args.disasm {
        for line in disassemble(&image, config.load_origin()?) {
            println!("{line}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    config.validate(image.len())?;

    let mut memory = Memory::with_size(config.memory_size);
    let mut disk = BlockStore::open_with_size(&config.disk_path, config.disk_size)
        .with_context(|| format!("opening block store {}", config.disk_path.display()))?;
    info!(path = %disk.path().display(), size = disk.len(), "block store ready");

    let restored = match &args.snapshot_in {
        Some(path) => {
            let loaded = load_snapshot(path, &mut memory)
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            info!(path = %path.display(), pc = loaded.cpu.pc, "snapshot restored");
            if let Some(entry) = config.entry {
                warn!(entry, "configured entry ignored; pc comes from the snapshot");
            }
            Some(loaded.cpu)
        }
        None => {
            memory.load(config.load_address, &image)?;
            info!(
                bytes = image.len(),
                load_address = config.load_address,
                "program loaded"
            );
            None
        }
    };

    let mut cpu = Cpu::new(&mut memory, &mut disk, StdConsole::stdio());
    match restored {
        Some(state) => cpu.restore(&state),
        None => cpu.set_pc(config.entry_pc()),
    }

    let outcome = match config.step_limit {
        Some(limit) => cpu.run_for(limit),
        None => cpu.run(),
    };
    let fault = match &outcome {
        Ok(Exit::Halted) => {
            info!(pc = cpu.pc(), count = cpu.instruction_count(), "machine halted");
            None
        }
        Ok(Exit::StepLimit) => {
            info!(pc = cpu.pc(), count = cpu.instruction_count(), "step limit reached");
            None
        }
        Err(fault) => {
            error!(kind = ?fault.kind(), "{fault}");
            Some(fault.to_string())
        }
    };

    let state = cpu.state();
    let run_state = cpu.run_state();
    drop(cpu);

    if let Some(path) = &args.snapshot_out {
        save_snapshot(path, &state, &memory)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        info!(path = %path.display(), "snapshot saved");
    }

    if args.json {
        let report = Report {
            run_state,
            cpu: state,
            fault,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(if run_state == RunState::Faulted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
