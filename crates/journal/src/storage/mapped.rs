//! Memory-mapped implementation of [`ColumnStorage`].

use crate::config::SyncMode;
use crate::error::Result;
use crate::storage::{ColumnStorage, StorageProvider};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default growth granularity (1 MB).
pub const DEFAULT_GROW_SIZE: u64 = 1024 * 1024;

/// A file accessed through a single writable memory mapping.
///
/// The mapping is replaced whenever the file grows. Other handles to the same
/// file see the new length after [`ColumnStorage::refresh`].
pub struct MappedFile {
    file: File,
    mmap: Option<MmapMut>,
    path: PathBuf,
    grow_size: u64,
    sync_mode: SyncMode,
}

impl MappedFile {
    /// Opens or creates a mapped file.
    pub fn open(path: impl AsRef<Path>, grow_size: u64, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut mapped = Self {
            file,
            mmap: None,
            path,
            grow_size: grow_size.max(1),
            sync_mode,
        };
        mapped.remap()?;
        Ok(mapped)
    }

    /// Re-maps the whole file at its current length.
    fn remap(&mut self) -> Result<()> {
        self.mmap = None;
        let len = self.file.metadata()?.len();
        if len > 0 {
            // SAFETY: the journal only ever grows its files, so a mapping never
            // refers past the end of the file.
            let mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&self.file)? };
            self.mmap = Some(mmap);
        }
        Ok(())
    }

    fn out_of_bounds(&self, position: u64, len: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "{}: access at {}..{} beyond length {}",
                self.path.display(),
                position,
                position + len as u64,
                self.len()
            ),
        )
    }
}

impl ColumnStorage for MappedFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn len(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len() as u64)
    }

    fn ensure_len(&mut self, len: u64) -> Result<()> {
        if len <= self.len() {
            return Ok(());
        }
        let on_disk = self.file.metadata()?.len();
        if on_disk < len {
            let new_len = len.div_ceil(self.grow_size) * self.grow_size;
            self.file.set_len(new_len)?;
            debug!("Grew {} to {} bytes", self.path.display(), new_len);
        }
        self.remap()
    }

    fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let end = position + buf.len() as u64;
        match &self.mmap {
            Some(mmap) if end <= mmap.len() as u64 => {
                buf.copy_from_slice(&mmap[position as usize..end as usize]);
                Ok(())
            }
            _ => Err(self.out_of_bounds(position, buf.len()).into()),
        }
    }

    fn write_at(&mut self, position: u64, buf: &[u8]) -> Result<()> {
        let end = position + buf.len() as u64;
        self.ensure_len(end)?;
        let out_of_bounds = self.out_of_bounds(position, buf.len());
        let mmap = self.mmap.as_mut().ok_or(out_of_bounds)?;
        mmap[position as usize..end as usize].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            match self.sync_mode {
                SyncMode::Flush => mmap.flush()?,
                SyncMode::Async => mmap.flush_async()?,
                SyncMode::None => {}
            }
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        if self.file.metadata()?.len() != self.len() {
            self.remap()?;
        }
        Ok(())
    }
}

/// Opens every path as a [`MappedFile`].
#[derive(Debug, Clone)]
pub struct MappedStorageProvider {
    grow_size: u64,
    sync_mode: SyncMode,
}

impl MappedStorageProvider {
    /// Creates a provider with the given growth granularity and sync mode.
    pub fn new(grow_size: u64, sync_mode: SyncMode) -> Self {
        Self {
            grow_size,
            sync_mode,
        }
    }
}

impl Default for MappedStorageProvider {
    fn default() -> Self {
        Self::new(DEFAULT_GROW_SIZE, SyncMode::default())
    }
}

impl StorageProvider for MappedStorageProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn ColumnStorage>> {
        Ok(Box::new(MappedFile::open(
            path,
            self.grow_size,
            self.sync_mode,
        )?))
    }
}
