//! Machine configuration used by the harness when wiring a machine together.

use crate::{CoreError, Result, DEFAULT_DISK_FILE, DISK_SIZE, MEMORY_SIZE};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides [`MachineConfig::disk_path`].
pub const DISK_PATH_ENV: &str = "NIBBLE8_DISK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub memory_size: usize,
    pub disk_size: usize,
    pub disk_path: PathBuf,
    /// Where the program image is copied in memory.
    pub load_address: usize,
    /// Initial program counter; defaults to `load_address`.
    pub entry: Option<u16>,
    /// Stop after this many instructions; `None` runs until HALT or a fault.
    pub step_limit: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: MEMORY_SIZE,
            disk_size: DISK_SIZE,
            disk_path: PathBuf::from(DEFAULT_DISK_FILE),
            load_address: 0,
            entry: None,
            step_limit: None,
        }
    }
}

impl MachineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `NIBBLE8_DISK` if it is set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = env::var(DISK_PATH_ENV) {
            if !path.is_empty() {
                self.disk_path = PathBuf::from(path);
            }
        }
        self
    }

    pub fn entry_pc(&self) -> u16 {
        self.entry.unwrap_or(self.load_address as u16)
    }

    /// Check sizes and that an image of `image_len` bytes fits at `load_address`.
    pub fn validate(&self, image_len: usize) -> Result<()> {
        if self.memory_size == 0 {
            return Err(CoreError::InvalidConfig("memory_size must be non-zero".into()));
        }
        if self.disk_size == 0 {
            return Err(CoreError::InvalidConfig("disk_size must be non-zero".into()));
        }
        let end = self.load_address.checked_add(image_len);
        if end.map_or(true, |end| end > self.memory_size) {
            return Err(CoreError::InvalidConfig(format!(
                "program of {image_len} bytes does not fit at 0x{:X} in 0x{:X} bytes of memory",
                self.load_address, self.memory_size
            )));
        }
        if self.entry.is_none() {
            self.load_origin()?;
        }
        Ok(())
    }

    /// The load address as a program-counter value.
    pub fn load_origin(&self) -> Result<u16> {
        u16::try_from(self.load_address).map_err(|_| {
            CoreError::InvalidConfig(format!(
                "load address 0x{:X} is not reachable by the 16-bit program counter",
                self.load_address
            ))
        })
    }
}
