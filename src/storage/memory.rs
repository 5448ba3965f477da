//! In-memory storage backend.
//!
//! Keeps every file as an `Arc<Vec<u8>>` in a shared map. Useful for tests
//! and short-lived indexes; the semantics (atomic rename, advisory locks,
//! immutable opened inputs) match the file backend.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{Result, SalixError};
use crate::storage::{SliceInput, Storage, StorageInput, StorageLock, StorageOutput};

/// Configuration for memory-based storage.
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial capacity hint for the file map.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    files: AHashMap<String, Arc<Vec<u8>>>,
    locks: Vec<String>,
    temp_counter: u64,
}

/// An in-memory storage.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStorage {
    /// Create an empty in-memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            shared: Arc::new(Mutex::new(Shared {
                files: AHashMap::with_capacity(config.initial_capacity),
                locks: Vec::new(),
                temp_counter: 0,
            })),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        MemoryStorage::new(MemoryStorageConfig::default())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let shared = self.shared.lock();
        let bytes = shared
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| SalixError::storage(format!("file not found: {name}")))?;
        Ok(Box::new(SliceInput::from_bytes(bytes)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            buf: Vec::new(),
            pos: 0,
            closed: false,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.shared.lock().files.contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.shared.lock().files.remove(name) {
            Some(_) => Ok(()),
            None => Err(SalixError::storage(format!("file not found: {name}"))),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.shared.lock().files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.shared
            .lock()
            .files
            .get(name)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| SalixError::storage(format!("file not found: {name}")))
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut shared = self.shared.lock();
        let bytes = shared
            .files
            .remove(old_name)
            .ok_or_else(|| SalixError::storage(format!("file not found: {old_name}")))?;
        shared.files.insert(new_name.to_string(), bytes);
        Ok(())
    }

    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)> {
        let name = {
            let mut shared = self.shared.lock();
            shared.temp_counter += 1;
            format!("{prefix}{:08x}.tmp", shared.temp_counter)
        };
        let output = self.create_output(&name)?;
        Ok((name, output))
    }

    fn try_acquire_lock(&self, name: &str) -> Result<Option<Box<dyn StorageLock>>> {
        let mut shared = self.shared.lock();
        if shared.locks.iter().any(|held| held == name) {
            return Ok(None);
        }
        shared.locks.push(name.to_string());
        Ok(Some(Box::new(MemoryLock {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            released: false,
        })))
    }

    fn sync_directory(&self) -> Result<()> {
        Ok(())
    }
}

/// A buffered writer that publishes its bytes into the shared map on flush
/// and close.
#[derive(Debug)]
struct MemoryOutput {
    name: String,
    shared: Arc<Mutex<Shared>>,
    buf: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&self) {
        let mut shared = self.shared.lock();
        shared
            .files
            .insert(self.name.clone(), Arc::new(self.buf.clone()));
    }
}

impl std::io::Write for MemoryOutput {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl std::io::Seek for MemoryOutput {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        let new = match pos {
            std::io::SeekFrom::Start(offset) => offset as i64,
            std::io::SeekFrom::End(offset) => self.buf.len() as i64 + offset,
            std::io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = new as usize;
        Ok(self.pos as u64)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.publish();
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.publish();
        }
    }
}

/// A held lock in a memory storage.
#[derive(Debug)]
struct MemoryLock {
    name: String,
    shared: Arc<Mutex<Shared>>,
    released: bool,
}

impl StorageLock for MemoryLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.shared.lock().locks.retain(|held| held != &self.name);
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_create_and_read() {
        let storage = MemoryStorage::default();

        let mut out = storage.create_output("a.bin").unwrap();
        out.write_all(b"hello world").unwrap();
        out.close().unwrap();

        assert!(storage.file_exists("a.bin"));
        assert_eq!(storage.file_size("a.bin").unwrap(), 11);

        let mut input = storage.open_input("a.bin").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn test_opened_input_survives_overwrite() {
        let storage = MemoryStorage::default();

        let mut out = storage.create_output("a.bin").unwrap();
        out.write_all(b"one").unwrap();
        out.close().unwrap();

        let mut input = storage.open_input("a.bin").unwrap();

        let mut out = storage.create_output("a.bin").unwrap();
        out.write_all(b"two").unwrap();
        out.close().unwrap();

        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"one");
    }

    #[test]
    fn test_rename_replaces() {
        let storage = MemoryStorage::default();

        let mut out = storage.create_output("a.tmp").unwrap();
        out.write_all(b"payload").unwrap();
        out.close().unwrap();

        let mut out = storage.create_output("a.bin").unwrap();
        out.write_all(b"old").unwrap();
        out.close().unwrap();

        storage.rename_file("a.tmp", "a.bin").unwrap();
        assert!(!storage.file_exists("a.tmp"));
        assert_eq!(storage.file_size("a.bin").unwrap(), 7);
    }

    #[test]
    fn test_locks_are_exclusive() {
        let storage = MemoryStorage::default();

        let lock = storage.try_acquire_lock("WRITELOCK").unwrap();
        assert!(lock.is_some());
        assert!(storage.try_acquire_lock("WRITELOCK").unwrap().is_none());
        assert!(matches!(
            storage.acquire_lock("WRITELOCK"),
            Err(SalixError::Locked(_))
        ));

        drop(lock);
        assert!(storage.try_acquire_lock("WRITELOCK").unwrap().is_some());
    }

    #[test]
    fn test_temp_outputs_are_unique() {
        let storage = MemoryStorage::default();
        let (name_a, out_a) = storage.create_temp_output("merge_").unwrap();
        let (name_b, out_b) = storage.create_temp_output("merge_").unwrap();
        assert_ne!(name_a, name_b);
        drop(out_a);
        drop(out_b);
    }
}
