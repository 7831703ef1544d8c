//! Machine snapshots.
//!
//! A snapshot is a zip archive holding `snapshot.json` (metadata and CPU state)
//! and `memory.bin` (the raw main-memory image). The block store is not
//! captured; it is already persistent on its own.

use crate::cpu::CpuState;
use crate::memory::Memory;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::SystemTime;
use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SNAPSHOT_MAGIC: &str = "nibble8.snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

const METADATA_ENTRY: &str = "snapshot.json";
const MEMORY_ENTRY: &str = "memory.bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub magic: String,
    pub version: u32,
    pub created: String,
    pub cpu: CpuState,
    pub memory_size: usize,
}

#[derive(Debug)]
pub struct SnapshotLoad {
    pub metadata: SnapshotMetadata,
    pub cpu: CpuState,
}

fn now_timestamp() -> String {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => format!("{}Z", duration.as_secs()),
        Err(_) => "0Z".to_string(),
    }
}

pub fn save_snapshot(path: &Path, cpu: &CpuState, memory: &Memory) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let metadata = SnapshotMetadata {
        magic: SNAPSHOT_MAGIC.to_string(),
        version: SNAPSHOT_VERSION,
        created: now_timestamp(),
        cpu: *cpu,
        memory_size: memory.len(),
    };
    zip.start_file(METADATA_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&metadata)?)?;

    zip.start_file(MEMORY_ENTRY, options)?;
    zip.write_all(memory.as_slice())?;

    zip.finish()?;
    Ok(())
}

/// Read a snapshot, restoring `memory` in place and returning the CPU state.
///
/// `memory` must already have the snapshot's size.
pub fn load_snapshot(path: &Path, memory: &mut Memory) -> Result<SnapshotLoad> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(file)?;

    let metadata: SnapshotMetadata = {
        let entry = zip.by_name(METADATA_ENTRY)?;
        serde_json::from_reader(entry)?
    };
    if metadata.magic != SNAPSHOT_MAGIC {
        return Err(CoreError::InvalidSnapshot(format!(
            "unexpected magic {:?}",
            metadata.magic
        )));
    }
    if metadata.version != SNAPSHOT_VERSION {
        return Err(CoreError::InvalidSnapshot(format!(
            "unsupported version {} (expected {SNAPSHOT_VERSION})",
            metadata.version
        )));
    }
    if metadata.memory_size != memory.len() {
        return Err(CoreError::InvalidSnapshot(format!(
            "memory size mismatch (snapshot {}, machine {})",
            metadata.memory_size,
            memory.len()
        )));
    }

    let mut image = Vec::with_capacity(metadata.memory_size);
    zip.by_name(MEMORY_ENTRY)?.read_to_end(&mut image)?;
    if image.len() != metadata.memory_size {
        return Err(CoreError::InvalidSnapshot(format!(
            "memory.bin length mismatch (expected {}, got {})",
            metadata.memory_size,
            image.len()
        )));
    }
    memory.restore(&image)?;

    Ok(SnapshotLoad {
        cpu: metadata.cpu,
        metadata,
    })
}
