//! Content-addressed storage for task outputs.
//!
//! A cache entry is a bundle of (relative path, bytes) pairs keyed by a
//! task's [`InputHash`]. The engine only depends on the capability set
//! {contains, get, copy_to, put}; the directory-backed store is the
//! production variant and the in-memory store backs tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::InputHash;
use crate::error::CacheError;

/// A single cached file: its path relative to the task's working directory
/// at capture time, and its content.
pub type CachedFile = (Utf8PathBuf, Vec<u8>);

/// The capability set the execution engine requires of a cache.
///
/// Entries are whole-bundle replacements; partial updates do not exist.
/// Concurrent mutation is a single-process contract.
pub trait TaskCache: Send + Sync {
    /// Whether an entry exists for `hash`.
    fn contains(&self, hash: InputHash) -> bool;

    /// Reads the entry for `hash`, or `None` if absent.
    fn get(&self, hash: InputHash) -> Result<Option<Vec<CachedFile>>, CacheError>;

    /// Materializes the entry's files under `target_dir`, preserving the
    /// recorded relative paths. No-op if the entry is absent.
    fn copy_to(&self, hash: InputHash, target_dir: &Utf8Path) -> Result<(), CacheError>;

    /// Stores `files` as the entry for `hash`, replacing any prior entry.
    fn put(&self, hash: InputHash, files: &[CachedFile]) -> Result<(), CacheError>;
}

/// Directory-backed cache: one file per entry, named by the decimal input
/// hash, containing a zip archive of the output files.
pub struct DirectoryTaskCache {
    directory_path: Utf8PathBuf,
}

impl DirectoryTaskCache {
    pub fn new(directory_path: Utf8PathBuf) -> Self {
        DirectoryTaskCache { directory_path }
    }

    fn entry_path(&self, hash: InputHash) -> Utf8PathBuf {
        self.directory_path.join(hash.to_string())
    }
}

impl TaskCache for DirectoryTaskCache {
    fn contains(&self, hash: InputHash) -> bool {
        self.entry_path(hash).exists()
    }

    fn get(&self, hash: InputHash) -> Result<Option<Vec<CachedFile>>, CacheError> {
        let entry_path = self.entry_path(hash);
        if !entry_path.exists() {
            return Ok(None);
        }

        let file = File::open(&entry_path)
            .map_err(|err| CacheError::Open(entry_path.clone(), err))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|err| CacheError::Archive(entry_path.clone(), err))?;

        let mut files = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| CacheError::Archive(entry_path.clone(), err))?;
            if !entry.is_file() {
                continue;
            }
            let path = Utf8PathBuf::from(entry.name());
            let mut content = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut content)
                .map_err(|err| CacheError::Open(entry_path.clone(), err))?;
            files.push((path, content));
        }

        Ok(Some(files))
    }

    fn copy_to(&self, hash: InputHash, target_dir: &Utf8Path) -> Result<(), CacheError> {
        let entry_path = self.entry_path(hash);
        if !entry_path.exists() {
            return Ok(());
        }

        let file = File::open(&entry_path)
            .map_err(|err| CacheError::Open(entry_path.clone(), err))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|err| CacheError::Archive(entry_path.clone(), err))?;
        archive
            .extract(target_dir.as_std_path())
            .map_err(|err| CacheError::Extract(entry_path, target_dir.to_owned(), err))?;

        Ok(())
    }

    fn put(&self, hash: InputHash, files: &[CachedFile]) -> Result<(), CacheError> {
        let entry_path = self.entry_path(hash);
        // Build the archive next to its final location, then rename over it,
        // so readers never observe a half-written entry.
        let mut partial_path = entry_path.clone();
        partial_path.set_extension("partial");

        let file = File::create(&partial_path)
            .map_err(|err| CacheError::Write(partial_path.clone(), err))?;
        let mut archive = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (path, content) in files {
            archive
                .start_file(path.as_str(), options)
                .map_err(|err| CacheError::Pack(partial_path.clone(), err))?;
            archive
                .write_all(content)
                .map_err(|err| CacheError::Write(partial_path.clone(), err))?;
        }
        archive
            .finish()
            .map_err(|err| CacheError::Pack(partial_path.clone(), err))?;

        std::fs::rename(&partial_path, &entry_path)
            .map_err(|err| CacheError::Write(entry_path.clone(), err))?;
        debug!("wrote cache entry `{entry_path}` with {} file(s)", files.len());

        Ok(())
    }
}

/// In-memory cache, primarily for tests.
#[derive(Default)]
pub struct MemoryTaskCache {
    entries: Mutex<HashMap<InputHash, Vec<CachedFile>>>,
}

impl MemoryTaskCache {
    pub fn new() -> Self {
        MemoryTaskCache::default()
    }
}

impl TaskCache for MemoryTaskCache {
    fn contains(&self, hash: InputHash) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(&hash))
            .unwrap_or(false)
    }

    fn get(&self, hash: InputHash) -> Result<Option<Vec<CachedFile>>, CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Lock)?;
        Ok(entries.get(&hash).cloned())
    }

    fn copy_to(&self, hash: InputHash, target_dir: &Utf8Path) -> Result<(), CacheError> {
        let entries = self.entries.lock().map_err(|_| CacheError::Lock)?;
        let Some(files) = entries.get(&hash) else {
            return Ok(());
        };

        for (path, content) in files {
            let target = target_dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| CacheError::Write(target.clone(), err))?;
            }
            std::fs::write(&target, content)
                .map_err(|err| CacheError::Write(target.clone(), err))?;
        }

        Ok(())
    }

    fn put(&self, hash: InputHash, files: &[CachedFile]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Lock)?;
        entries.insert(hash, files.to_vec());
        Ok(())
    }
}
