//! Pure-Rust core of the nibble8 machine.
//!
//! The machine is a sequential reference interpreter: four 8-bit registers, a
//! zero flag, a 16-bit program counter and an 8-bit stack pointer whose stack
//! lives in the low 256 bytes of main memory. Main memory is a flat 20 MiB byte
//! array; the persistent block store is a 100 MiB file-backed byte array.
//!
//! Wiring (constructing memory and store, loading a program, choosing a console)
//! is left to the caller; see the `nibble8` binary for the reference harness.

use thiserror::Error;

pub mod config;
pub mod console;
pub mod cpu;
pub mod decode;
pub mod disk;
pub mod memory;
pub mod snapshot;

pub use config::MachineConfig;
pub use console::{Console, ConsoleError, ScriptedConsole, StdConsole};
pub use cpu::{Cpu, CpuState, Exit, Fault, FaultKind, RunState};
pub use decode::{disassemble, Instruction, ListingLine, Opcode, Reg};
pub use disk::{BlockStore, DiskError};
pub use memory::{AccessError, Memory};
pub use snapshot::{load_snapshot, save_snapshot, SnapshotLoad, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

/// Main memory size: 20 MiB.
pub const MEMORY_SIZE: usize = 20 * 1024 * 1024;

/// Persistent block store size: 100 MiB.
pub const DISK_SIZE: usize = 100 * 1024 * 1024;

/// Default backing file for the block store, relative to the working directory.
pub const DEFAULT_DISK_FILE: &str = "virtual_disk.bin";

/// Number of general purpose registers (R0-R3).
pub const NUM_REGISTERS: usize = 4;

/// Power-on stack pointer. The stack grows down through memory `0..=0xFF`.
pub const STACK_TOP: u8 = 0xFF;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("memory error: {0}")]
    Access(#[from] AccessError),
    #[error("snapshot error: {0}")]
    InvalidSnapshot(String),
    #[error("config error: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restore_into(memory: &mut Memory, image: &[u8]) -> Result<()> {
        memory.restore(image)?;
        Ok(())
    }

    #[test]
    fn access_errors_lift_into_core_error() {
        let mut memory = Memory::with_size(4);
        let err = restore_into(&mut memory, &[0; 3]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Access(AccessError::LengthMismatch {
                expected: 4,
                got: 3
            })
        ));
        assert_eq!(err.to_string(), "memory error: image is 0x3 bytes, expected 0x4");
    }
}
