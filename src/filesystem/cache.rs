// src/filesystem/cache.rs

//! Buffered write cache
//!
//! Writes of a package session are held in memory until the session decides
//! to flush or discard them. An optional byte budget bounds memory use: once
//! it would be exceeded, callers write through instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Pending file contents keyed by absolute path
#[derive(Debug, Default)]
pub struct WriteCache {
    entries: BTreeMap<PathBuf, Vec<u8>>,
    enabled: bool,
    max_bytes: Option<usize>,
    used: usize,
}

impl WriteCache {
    /// Enabled cache without a byte budget
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Cache that never holds anything (every write goes straight to disk)
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled cache holding at most `max_bytes` of content
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            enabled: true,
            max_bytes: Some(max_bytes),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn get(&self, path: &Path) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Hold `data` for `path`; returns false when the caller must write through
    pub fn insert(&mut self, path: &Path, data: &[u8]) -> bool {
        if !self.enabled {
            return false;
        }

        let replaced = self.entries.get(path).map(Vec::len).unwrap_or(0);
        let projected = self.used - replaced + data.len();
        if self.max_bytes.is_some_and(|max| projected > max) {
            // Drop any stale entry so reads don't see older content
            self.remove(path);
            return false;
        }

        self.entries.insert(path.to_path_buf(), data.to_vec());
        self.used = projected;
        true
    }

    /// Forget the pending entry for `path`; returns whether there was one
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.entries.remove(path) {
            Some(old) => {
                self.used -= old.len();
                true
            }
            None => false,
        }
    }

    /// Remove and return every pending entry in path order
    pub fn drain(&mut self) -> Vec<(PathBuf, Vec<u8>)> {
        self.used = 0;
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Drop every pending entry; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.used = 0;
        count
    }
}
