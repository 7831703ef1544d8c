use crate::MEMORY_SIZE;
use thiserror::Error;

/// Out-of-range access or mis-sized image against a fixed-size byte array.
///
/// Shared by main memory and the block store; accesses are never clamped or
/// wrapped into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("address 0x{addr:X} out of bounds (size 0x{size:X})")]
    OutOfBounds { addr: usize, size: usize },
    #[error("image is 0x{got:X} bytes, expected 0x{expected:X}")]
    LengthMismatch { expected: usize, got: usize },
}

pub(crate) fn check_bounds(addr: usize, size: usize) -> Result<(), AccessError> {
    if addr < size {
        Ok(())
    } else {
        Err(AccessError::OutOfBounds { addr, size })
    }
}

/// Flat, zero-initialised main memory.
///
/// Addresses `0x00..=0xFF` also hold the call/value stack, so a program placed
/// at address 0 shares its first page with the stack.
#[derive(Clone)]
pub struct Memory {
    cells: Vec<u8>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("len", &self.cells.len()).finish()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::with_size(MEMORY_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            cells: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn read(&self, addr: usize) -> Result<u8, AccessError> {
        check_bounds(addr, self.cells.len())?;
        Ok(self.cells[addr])
    }

    pub fn write(&mut self, addr: usize, value: u8) -> Result<(), AccessError> {
        check_bounds(addr, self.cells.len())?;
        self.cells[addr] = value;
        Ok(())
    }

    /// Copy a program or data image into memory starting at `start`.
    ///
    /// The whole image must fit; nothing is written otherwise.
    pub fn load(&mut self, start: usize, image: &[u8]) -> Result<(), AccessError> {
        if image.is_empty() {
            return Ok(());
        }
        let last = start.saturating_add(image.len() - 1);
        check_bounds(last, self.cells.len())?;
        self.cells[start..=last].copy_from_slice(image);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    /// Replace the full contents, e.g. from a snapshot. Lengths must match.
    pub fn restore(&mut self, image: &[u8]) -> Result<(), AccessError> {
        if image.len() != self.cells.len() {
            return Err(AccessError::LengthMismatch {
                expected: self.cells.len(),
                got: image.len(),
            });
        }
        self.cells.copy_from_slice(image);
        Ok(())
    }
}
