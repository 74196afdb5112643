//! Memory-based object store, used by tests and as the default backend.

use std::io::{Error, ErrorKind};
use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::{ObjectStore, ReadAt};

/// Immutable in-memory file with cheap clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryFile(Arc<Vec<u8>>);

impl MemoryFile {
    pub fn new(bytes: Vec<u8>) -> MemoryFile {
        MemoryFile(Arc::new(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl ReadAt for MemoryFile {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn read_into(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "range overflow"))?;
        if end > self.0.len() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("read of [{start}, {end}) beyond file size {}", self.0.len()),
            ));
        }
        buf.copy_from_slice(&self.0[start..end]);
        Ok(())
    }
}

/// URI-keyed map of in-memory files.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<AHashMap<String, MemoryFile>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        Default::default()
    }

    /// Creates or replaces the file at `uri`.
    pub fn put(&self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.files
            .write()
            .expect("files lock")
            .insert(uri.into(), MemoryFile::new(bytes));
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.files.read().expect("files lock").contains_key(uri)
    }
}

impl ObjectStore for MemoryStore {
    fn open(&self, uri: &str) -> std::io::Result<Arc<dyn ReadAt>> {
        let files = self.files.read().expect("files lock");
        match files.get(uri) {
            Some(file) => Ok(Arc::new(file.clone())),
            None => Err(Error::new(
                ErrorKind::NotFound,
                format!("no object at '{uri}'"),
            )),
        }
    }
}
