//! Directory-backed storage.
//!
//! Each storage maps names to files in one directory. Writes go through a
//! buffered file handle; reads are served from a memory map (default) or a
//! heap copy, so an opened input stays valid even after the file is deleted
//! by a later commit's garbage sweep.
//!
//! `rename_file` relies on POSIX `rename(2)` atomic-replace semantics; the
//! table-of-contents writer combines it with fsync of both the file and the
//! directory. Locks are files created with `O_EXCL`; holding the handle
//! holds the lock and dropping it removes the file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, Write};
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;

use crate::error::{Result, SalixError};
use crate::storage::{
    InputBacking, SliceInput, Storage, StorageInput, StorageLock, StorageOutput,
};

/// Configuration for file-based storage.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Use memory-mapped reads. When false, files are read into heap
    /// buffers on open.
    pub use_mmap: bool,

    /// Buffer size for writes.
    pub buffer_size: usize,

    /// Call fsync on every output close, not just on explicit
    /// `flush_and_sync`.
    pub sync_on_close: bool,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        FileStorageConfig {
            use_mmap: true,
            buffer_size: 64 * 1024,
            sync_on_close: false,
        }
    }
}

/// A storage rooted at a directory.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    config: FileStorageConfig,
}

impl FileStorage {
    /// Open (creating if needed) a storage at `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P, config: FileStorageConfig) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir, config })
    }

    /// Open a storage at `dir` with default configuration.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        FileStorage::new(dir, FileStorageConfig::default())
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.path(name);
        let file = File::open(&path)
            .map_err(|e| SalixError::storage(format!("cannot open {name}: {e}")))?;
        let len = file.metadata()?.len();
        let backing = if self.config.use_mmap && len > 0 {
            // Safety: segment files are never rewritten in place; writers
            // produce new names and publish them via rename. Zero-length
            // files cannot be mapped and fall through to the heap path.
            let map = unsafe { memmap2::Mmap::map(&file) }
                .map_err(|e| SalixError::storage(format!("cannot mmap {name}: {e}")))?;
            InputBacking::Mmap(Arc::new(map))
        } else {
            let mut reader = std::io::BufReader::with_capacity(self.config.buffer_size, file);
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            InputBacking::Bytes(Arc::new(bytes))
        };
        Ok(Box::new(SliceInput::new(backing)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.path(name);
        let file = File::create(&path)
            .map_err(|e| SalixError::storage(format!("cannot create {name}: {e}")))?;
        Ok(Box::new(FileOutput {
            name: name.to_string(),
            writer: Some(BufWriter::with_capacity(self.config.buffer_size, file)),
            pos: 0,
            sync_on_close: self.config.sync_on_close,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(std::fs::metadata(self.path(name))?.len())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        std::fs::rename(self.path(old_name), self.path(new_name))?;
        Ok(())
    }

    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)> {
        let mut rng = rand::thread_rng();
        loop {
            let name = format!("{prefix}{:08x}.tmp", rng.gen::<u32>());
            let path = self.path(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok((
                        name.clone(),
                        Box::new(FileOutput {
                            name,
                            writer: Some(BufWriter::with_capacity(
                                self.config.buffer_size,
                                file,
                            )),
                            pos: 0,
                            sync_on_close: self.config.sync_on_close,
                        }),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let path = self.path(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_file) => Ok(Some(Box::new(FileLock {
                name: name.to_string(),
                path,
                released: false,
            }))),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn sync_directory(&self) -> Result<()> {
        // fsync the directory so renames are durable.
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }
}

/// A buffered file writer.
#[derive(Debug)]
struct FileOutput {
    name: String,
    writer: Option<BufWriter<File>>,
    pos: u64,
    sync_on_close: bool,
}

impl FileOutput {
    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "output already closed")
        })
    }
}

impl Write for FileOutput {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let n = self.writer()?.write(data)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer()?.flush()
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let new = self.writer()?.seek(pos)?;
        self.pos = new;
        Ok(new)
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SalixError::storage("output already closed"))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            if self.sync_on_close {
                writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                log::warn!("error closing output {}: {e}", self.name);
            }
        }
    }
}

/// A held lock file.
#[derive(Debug)]
struct FileLock {
    name: String,
    path: PathBuf,
    released: bool,
}

impl StorageLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("error releasing lock {}: {e}", self.name);
        }
    }
}
