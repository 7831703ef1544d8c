//! File-backed persistent block store.
//!
//! The backing file is a raw byte image with no header: byte `n` of the store
//! is byte `n` of the file. It is created zero-filled on first use and reused
//! verbatim afterwards, so its contents survive across runs.

use crate::memory::{check_bounds, AccessError};
use crate::{Result, DISK_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DiskError {
    #[error(transparent)]
    OutOfBounds(#[from] AccessError),
    #[error("disk io error at 0x{addr:X}: {source}")]
    Io {
        addr: usize,
        #[source]
        source: io::Error,
    },
}

/// Persistent byte-addressable store that owns its backing file handle.
///
/// The handle is opened in [`BlockStore::open`] and released when the store is
/// dropped.
#[derive(Debug)]
pub struct BlockStore {
    file: File,
    path: PathBuf,
    size: usize,
}

impl BlockStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_size(path, DISK_SIZE)
    }

    pub fn open_with_size(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                file.set_len(size as u64)?;
                file.sync_all()?;
                debug!(path = %path.display(), size, "created zero-filled block store");
                file
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                let existing = file.metadata()?.len();
                if existing < size as u64 {
                    warn!(
                        path = %path.display(),
                        existing,
                        size,
                        "block store shorter than expected; extending with zeros"
                    );
                    file.set_len(size as u64)?;
                }
                debug!(path = %path.display(), size, "opened existing block store");
                file
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { file, path, size })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&mut self, addr: usize) -> std::result::Result<u8, DiskError> {
        check_bounds(addr, self.size)?;
        let mut byte = [0u8; 1];
        self.file
            .seek(SeekFrom::Start(addr as u64))
            .and_then(|_| self.file.read_exact(&mut byte))
            .map_err(|source| DiskError::Io { addr, source })?;
        Ok(byte[0])
    }

    /// Write one byte and flush it to the backing file before returning.
    pub fn write(&mut self, addr: usize, value: u8) -> std::result::Result<(), DiskError> {
        check_bounds(addr, self.size)?;
        self.file
            .seek(SeekFrom::Start(addr as u64))
            .and_then(|_| self.file.write_all(&[value]))
            .and_then(|_| self.file.flush())
            .map_err(|source| DiskError::Io { addr, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_zero_filled_file_of_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.bin");
        let mut store = BlockStore::open_with_size(&path, 1024).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 1024);
        assert_eq!(store.read(0).unwrap(), 0);
        assert_eq!(store.read(1023).unwrap(), 0);
    }

    #[test]
    fn writes_are_visible_in_the_backing_file_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.bin");
        let mut store = BlockStore::open_with_size(&path, 64).unwrap();
        store.write(10, 0xAB).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw[10], 0xAB);
        assert_eq!(store.read(10).unwrap(), 0xAB);
    }

    #[test]
    fn reopening_keeps_persisted_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.bin");
        {
            let mut store = BlockStore::open_with_size(&path, 64).unwrap();
            store.write(63, 7).unwrap();
        }
        let mut store = BlockStore::open_with_size(&path, 64).unwrap();
        assert_eq!(store.read(63).unwrap(), 7);
    }

    #[test]
    fn short_existing_file_is_extended_not_rezeroed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let mut store = BlockStore::open_with_size(&path, 16).unwrap();
        assert_eq!(store.read(2).unwrap(), 3);
        assert_eq!(store.read(15).unwrap(), 0);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open_with_size(dir.path().join("d.bin"), 8).unwrap();
        assert!(matches!(
            store.read(8),
            Err(DiskError::OutOfBounds(AccessError::OutOfBounds { addr: 8, size: 8 }))
        ));
        assert!(matches!(store.write(9, 1), Err(DiskError::OutOfBounds(_))));
    }

    #[test]
    fn open_fails_when_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("disk.bin");
        assert!(BlockStore::open_with_size(path, 8).is_err());
    }
}
