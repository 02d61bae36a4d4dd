//! Byte stores backing the temp record archive.

use crate::error::{ArchiveError, ArchiveResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An append-only byte store for archive frames.
///
/// Storage is opaque: it never interprets the frames written to it.
///
/// # Invariants
///
/// - `append` writes at the end and returns the offset written to
/// - `read_all` returns exactly the bytes appended so far
/// - `sync` makes every appended byte durable
/// - `replace` atomically swaps the whole content
pub trait ArchiveStorage: Send {
    /// Reads the entire content.
    fn read_all(&self) -> ArchiveResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> ArchiveResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> ArchiveResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> ArchiveResult<u64>;

    /// Drops everything after `new_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is past the end.
    fn truncate(&mut self, new_size: u64) -> ArchiveResult<()>;

    /// Replaces the whole content with `data`.
    fn replace(&mut self, data: &[u8]) -> ArchiveResult<()>;
}

/// In-memory archive storage.
///
/// Clones share one buffer, so a test can drop an engine and reopen a new one
/// over the same bytes to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchiveStorage {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryArchiveStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl ArchiveStorage for MemoryArchiveStorage {
    fn read_all(&self) -> ArchiveResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, new_data: &[u8]) -> ArchiveResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> ArchiveResult<()> {
        Ok(())
    }

    fn size(&self) -> ArchiveResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> ArchiveResult<()> {
        let mut data = self.data.write();
        let current = data.len() as u64;
        if new_size > current {
            return Err(ArchiveError::corrupted(
                current,
                format!("cannot truncate to {new_size}, size is {current}"),
            ));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> ArchiveResult<()> {
        *self.data.write() = new_data.to_vec();
        Ok(())
    }
}

/// File-backed archive storage.
///
/// The file is held under an exclusive advisory lock for as long as the
/// storage is open; a second process opening the same archive gets
/// [`ArchiveError::Locked`].
#[derive(Debug)]
pub struct FileArchiveStorage {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileArchiveStorage {
    /// Opens or creates the archive file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is locked.
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = Self::open_locked(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the archive path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_locked(path: &Path) -> ArchiveResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(ArchiveError::Locked(path.to_path_buf()));
        }
        Ok(file)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".compact");
        PathBuf::from(name)
    }
}

impl ArchiveStorage for FileArchiveStorage {
    fn read_all(&self) -> ArchiveResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> ArchiveResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> ArchiveResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> ArchiveResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> ArchiveResult<()> {
        if new_size > self.size {
            return Err(ArchiveError::corrupted(
                self.size,
                format!("cannot truncate to {new_size}, size is {}", self.size),
            ));
        }
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> ArchiveResult<()> {
        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // The old handle still points at the unlinked inode
        self.file = Self::open_locked(&self.path)?;
        self.size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_clones_share_bytes() {
        let mut a = MemoryArchiveStorage::new();
        let b = a.clone();

        assert_eq!(a.append(b"hello").unwrap(), 0);
        assert_eq!(a.append(b" world").unwrap(), 5);
        assert_eq!(b.read_all().unwrap(), b"hello world");
        assert_eq!(b.size().unwrap(), 11);
    }

    #[test]
    fn memory_truncate_past_end_fails() {
        let mut storage = MemoryArchiveStorage::with_data(vec![1, 2, 3]);
        assert!(storage.truncate(10).is_err());
        storage.truncate(1).unwrap();
        assert_eq!(storage.data(), vec![1]);
    }

    #[test]
    fn file_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("saves.archive");

        {
            let mut storage = FileArchiveStorage::open(&path).unwrap();
            storage.append(b"frame-one").unwrap();
            storage.sync().unwrap();
        }

        let storage = FileArchiveStorage::open(&path).unwrap();
        assert_eq!(storage.size().unwrap(), 9);
        assert_eq!(storage.read_all().unwrap(), b"frame-one");
    }

    #[test]
    fn file_is_locked_while_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saves.archive");

        let _first = FileArchiveStorage::open(&path).unwrap();
        let second = FileArchiveStorage::open(&path);
        assert!(matches!(second, Err(ArchiveError::Locked(_))));
    }

    #[test]
    fn file_replace_swaps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("saves.archive");

        let mut storage = FileArchiveStorage::open(&path).unwrap();
        storage.append(b"old old old").unwrap();
        storage.replace(b"new").unwrap();
        storage.append(b"!").unwrap();

        assert_eq!(storage.read_all().unwrap(), b"new!");
        assert!(!storage.temp_path().exists());

        // Lock is held on the replacement file too
        assert!(matches!(
            FileArchiveStorage::open(&path),
            Err(ArchiveError::Locked(_))
        ));
    }
}
