// src/filesystem/mod.rs

//! Filesystem write abstraction
//!
//! `PackageFs` is the only way the engine touches the target tree. It owns
//! the session's transport (local or remote) and its write cache, and offers:
//! - buffered `read_file` / `write_file` with explicit `flush` / `discard`
//! - `ensure_directory`, `copy_tree`, `delete_tree`
//! - access probing and permission repair
//! - copy-aside snapshots before overwriting

pub mod cache;
pub mod transport;

pub use cache::WriteCache;
pub use transport::{
    ContentKind, DIR_MODES, FILE_MODES, LocalTransport, RemoteConnection, RemoteTransport,
    Transport, is_writable,
};

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to copy-aside snapshots
pub const SNAPSHOT_SUFFIX: &str = "~";

/// Whether `path` can be both opened for reading and written to
pub fn probe_access(path: &Path) -> bool {
    let readable = if path.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    };
    readable && is_writable(path)
}

/// One package session's view of the filesystem
pub struct PackageFs {
    transport: Box<dyn Transport>,
    cache: WriteCache,
    excluded: Vec<PathBuf>,
}

impl PackageFs {
    pub fn new(transport: Box<dyn Transport>, cache: WriteCache) -> Self {
        Self {
            transport,
            cache,
            excluded: Vec::new(),
        }
    }

    /// Local transport with an unbounded cache
    pub fn local() -> Self {
        Self::new(Box::new(LocalTransport), WriteCache::new())
    }

    /// Never cache writes below `dir` (e.g. the package staging area)
    pub fn exclude(&mut self, dir: impl Into<PathBuf>) {
        self.excluded.push(dir.into());
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Number of writes waiting for `flush`
    pub fn pending(&self) -> usize {
        self.cache.len()
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether `path` exists on disk or as a pending write
    pub fn exists(&self, path: &Path) -> bool {
        self.cache.contains(path) || path.exists()
    }

    /// Current content of `path`, pending writes included
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.get(path) {
            return Ok(data.to_vec());
        }
        Ok(fs::read(path)?)
    }

    /// Current content of `path` as UTF-8 text
    pub fn read_to_string(&self, path: &Path) -> Result<String> {
        let data = self.read_file(path)?;
        String::from_utf8(data).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {}", path.display(), e),
            ))
        })
    }

    /// Write `data` to `path`, repairing permissions where needed
    ///
    /// The content is held in the cache unless the path is excluded, the
    /// cache is disabled, or its budget would be exceeded. A cached write to
    /// a missing file creates nothing on disk until `flush`.
    pub fn write_file(&mut self, path: &Path, data: &[u8]) -> Result<usize> {
        if !self.is_excluded(path) && self.cache.is_enabled() {
            if !self.target_writable(path)? {
                return Err(Error::NotWritable(path.to_path_buf()));
            }
            if self.cache.insert(path, data) {
                debug!("Cached {} bytes for {}", data.len(), path.display());
                return Ok(data.len());
            }
        }

        self.materialize(path)?;
        if !is_writable(path) && !self.repair_permissions(path)? {
            return Err(Error::NotWritable(path.to_path_buf()));
        }
        self.transport
            .write(path, data, ContentKind::for_path(path))?;
        Ok(data.len())
    }

    /// Write every pending entry out
    ///
    /// Permissions of all targets are checked before anything is written.
    /// When a write fails, the failing entry and every entry after it stay
    /// pending so the caller can still retry or discard them.
    pub fn flush(&mut self) -> Result<usize> {
        let entries = self.cache.drain();
        if entries.is_empty() {
            return Ok(0);
        }

        let paths: Vec<PathBuf> = entries.iter().map(|(path, _)| path.clone()).collect();
        for path in paths {
            match self.target_writable(&path) {
                Ok(true) => {}
                Ok(false) => {
                    self.requeue(entries);
                    return Err(Error::NotWritable(path));
                }
                Err(e) => {
                    self.requeue(entries);
                    return Err(e);
                }
            }
        }

        let total = entries.len();
        let mut remaining = entries.into_iter();
        let mut written = 0;
        while let Some((path, data)) = remaining.next() {
            if let Err(e) = self.write_through(&path, &data) {
                warn!(
                    "Flush stopped at {} after {} of {} file(s): {}",
                    path.display(),
                    written,
                    total,
                    e
                );
                self.cache.insert(&path, &data);
                self.requeue(remaining);
                return Err(e);
            }
            written += 1;
        }

        info!("Flushed {} cached file(s) via {} transport", written, self.transport.name());
        Ok(written)
    }

    fn requeue(&mut self, entries: impl IntoIterator<Item = (PathBuf, Vec<u8>)>) {
        for (path, data) in entries {
            self.cache.insert(&path, &data);
        }
    }

    fn write_through(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        self.materialize(path)?;
        self.transport.write(path, data, ContentKind::for_path(path))
    }

    /// Create `path` and its missing parents as an empty file
    fn materialize(&mut self, path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.ensure_directory(parent)? {
                return Err(Error::NotWritable(parent.to_path_buf()));
            }
        }
        self.transport.create_file(path)
    }

    /// Whether `path` can be written without creating anything
    ///
    /// A missing path is judged by its nearest existing ancestor.
    fn target_writable(&mut self, path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(is_writable(path) || self.repair_permissions(path)?);
        }
        let ancestor = path
            .ancestors()
            .skip(1)
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .find(|p| p.is_dir());
        match ancestor {
            Some(dir) if is_writable(dir) => Ok(true),
            Some(dir) => self.transport.chmod(dir, DIR_MODES),
            None => Ok(false),
        }
    }

    /// Drop every pending entry without writing
    pub fn discard(&mut self) -> usize {
        let count = self.cache.clear();
        if count > 0 {
            debug!("Discarded {} cached file(s)", count);
        }
        count
    }

    /// Make `path` writable, creating it first when missing
    pub fn repair_permissions(&mut self, path: &Path) -> Result<bool> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !self.ensure_directory(parent)? {
                    return Ok(false);
                }
            }
            self.transport.create_file(path)?;
        }

        if is_writable(path) {
            return Ok(true);
        }

        let modes = if path.is_dir() { DIR_MODES } else { FILE_MODES };
        let writable = self.transport.chmod(path, modes)?;
        if !writable {
            warn!("Unable to make {} writable", path.display());
        }
        Ok(writable)
    }

    /// Create `path` and any missing ancestors; returns whether it is usable
    pub fn ensure_directory(&mut self, path: &Path) -> Result<bool> {
        let mut missing = Vec::new();
        let mut cursor = Some(path);
        while let Some(current) = cursor {
            if current.is_dir() {
                break;
            }
            missing.push(current.to_path_buf());
            cursor = current.parent().filter(|p| !p.as_os_str().is_empty());
        }

        let Some(existing) = cursor else {
            return Ok(false);
        };

        if !is_writable(existing) && !missing.is_empty() {
            self.transport.chmod(existing, DIR_MODES)?;
        }

        for dir in missing.iter().rev() {
            debug!("Creating directory {}", dir.display());
            self.transport.create_dir(dir)?;
        }

        if !is_writable(path) {
            self.transport.chmod(path, DIR_MODES)?;
        }

        Ok(probe_access(path))
    }

    /// Mirror `source` into `destination` recursively
    pub fn copy_tree(&mut self, source: &Path, destination: &Path) -> Result<()> {
        if !self.ensure_directory(destination)? {
            return Err(Error::NotWritable(destination.to_path_buf()));
        }

        let mut entries: Vec<_> = fs::read_dir(source)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let from = entry.path();
            let to = destination.join(entry.file_name());
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                self.copy_tree(&from, &to)?;
                continue;
            }

            if self.exists(&to) {
                let data = self.read_file(&from)?;
                self.write_file(&to, &data)?;
                continue;
            }

            // Pre-register so a remote transport owns the new file
            self.transport.create_file(&to)?;
            self.repair_permissions(&to)?;
            fs::copy(&from, &to)?;
        }

        Ok(())
    }

    /// Delete one file, dropping any pending write for it
    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        if self.cache.remove(path) {
            debug!("Dropped pending write for {}", path.display());
        }
        if !path.exists() {
            return Ok(());
        }
        if !is_writable(path) {
            self.transport.chmod(path, FILE_MODES)?;
        }
        self.transport.delete(path)
    }

    /// Delete everything below `dir`, and `dir` itself when `delete_root`
    pub fn delete_tree(&mut self, dir: &Path, delete_root: bool) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        let entries: Vec<OsString> = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()?;

        for name in entries {
            let path = dir.join(name);
            if path.is_dir() {
                if !is_writable(&path) {
                    self.transport.chmod(&path, DIR_MODES)?;
                }
                self.delete_tree(&path, true)?;
            } else {
                if !is_writable(&path) {
                    self.transport.chmod(&path, FILE_MODES)?;
                }
                self.transport.delete(&path)?;
            }
        }

        if delete_root {
            self.transport.delete(dir)?;
        }
        Ok(())
    }

    /// Copy `path` aside to `<path>~` before it gets overwritten
    pub fn snapshot(&mut self, path: &Path) -> Result<PathBuf> {
        let mut name = path.as_os_str().to_os_string();
        name.push(SNAPSHOT_SUFFIX);
        let backup = PathBuf::from(name);

        let data = fs::read(path)?;
        if !backup.exists() {
            self.transport.create_file(&backup)?;
        }
        self.transport
            .write(&backup, &data, ContentKind::for_path(path))?;
        debug!("Snapshot of {} saved to {}", path.display(), backup.display());
        Ok(backup)
    }
}

impl Drop for PackageFs {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            warn!(
                "Package session dropped with {} unflushed write(s); they were not written",
                self.cache.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::tests::RecordingConnection;
    use super::*;

    #[test]
    fn test_cached_write_is_visible_before_flush() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a.php");
        fs::write(&file, "old").unwrap();

        let mut pfs = PackageFs::local();
        pfs.write_file(&file, b"new").unwrap();

        assert_eq!(pfs.pending(), 1);
        assert_eq!(pfs.read_file(&file).unwrap(), b"new");
        assert_eq!(fs::read(&file).unwrap(), b"old");

        assert_eq!(pfs.flush().unwrap(), 1);
        assert_eq!(fs::read(&file).unwrap(), b"new");
        assert_eq!(pfs.pending(), 0);
    }

    #[test]
    fn test_discard_leaves_disk_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a.php");
        fs::write(&file, "old").unwrap();

        let mut pfs = PackageFs::local();
        pfs.write_file(&file, b"new").unwrap();
        assert_eq!(pfs.discard(), 1);
        assert_eq!(fs::read(&file).unwrap(), b"old");
    }

    #[test]
    fn test_discarded_new_file_leaves_no_trace() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("Sources/new");
        let file = dir.join("Shoutbox.php");

        let mut pfs = PackageFs::local();
        pfs.write_file(&file, b"<?php").unwrap();

        assert!(pfs.exists(&file));
        assert_eq!(pfs.read_file(&file).unwrap(), b"<?php");
        assert!(!temp_dir.path().join("Sources").exists());

        assert_eq!(pfs.discard(), 1);
        assert!(!file.exists());
        assert!(!temp_dir.path().join("Sources").exists());
    }

    #[test]
    fn test_flush_creates_new_files_and_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a/b/new.php");

        let mut pfs = PackageFs::local();
        pfs.write_file(&file, b"<?php new").unwrap();
        assert!(!file.exists());

        assert_eq!(pfs.flush().unwrap(), 1);
        assert_eq!(fs::read(&file).unwrap(), b"<?php new");
    }

    #[test]
    fn test_failed_flush_keeps_unwritten_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = temp_dir.path().join("a.php");
        let second = temp_dir.path().join("b.php");
        fs::write(&first, "old a").unwrap();
        fs::write(&second, "old b").unwrap();

        let mut pfs = PackageFs::local();
        pfs.write_file(&first, b"new a").unwrap();
        pfs.write_file(&second, b"new b").unwrap();

        // The first target turns into a directory, so writing it fails
        fs::remove_file(&first).unwrap();
        fs::create_dir(&first).unwrap();

        assert!(pfs.flush().is_err());
        assert_eq!(pfs.pending(), 2);
        assert_eq!(pfs.read_file(&second).unwrap(), b"new b");
        assert_eq!(fs::read_to_string(&second).unwrap(), "old b");

        assert_eq!(pfs.discard(), 2);
        assert_eq!(fs::read_to_string(&second).unwrap(), "old b");
    }

    #[test]
    fn test_excluded_subtree_bypasses_cache() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = temp_dir.path().join("packages/temp");

        let mut pfs = PackageFs::local();
        pfs.exclude(&staging);
        let file = staging.join("install.xml");
        pfs.write_file(&file, b"<modification/>").unwrap();

        assert_eq!(pfs.pending(), 0);
        assert_eq!(fs::read(&file).unwrap(), b"<modification/>");
    }

    #[test]
    fn test_ensure_directory_creates_ancestors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let deep = temp_dir.path().join("a/b/c");

        let mut pfs = PackageFs::local();
        assert!(pfs.ensure_directory(&deep).unwrap());
        assert!(deep.is_dir());
        assert!(pfs.ensure_directory(&deep).unwrap());
    }

    #[test]
    fn test_ensure_directory_through_remote() {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = RecordingConnection::new(temp_dir.path());
        let calls = connection.calls.clone();
        let transport = RemoteTransport::new(connection, temp_dir.path());
        let mut pfs = PackageFs::new(Box::new(transport), WriteCache::disabled());

        assert!(pfs.ensure_directory(&temp_dir.path().join("x/y")).unwrap());
        assert_eq!(
            *calls.borrow(),
            vec!["create_dir /x".to_string(), "create_dir /x/y".to_string()]
        );
    }

    #[test]
    fn test_copy_tree_mirrors_and_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "A").unwrap();
        fs::write(src.join("nested/b.bin"), [1u8, 2, 3]).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("a.txt"), "old").unwrap();

        let mut pfs = PackageFs::new(Box::new(LocalTransport), WriteCache::disabled());
        pfs.copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "A");
        assert_eq!(fs::read(dst.join("nested/b.bin")).unwrap(), vec![1u8, 2, 3]);
    }

    #[test]
    fn test_copy_tree_overwrite_goes_through_cache() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a.txt"), "A").unwrap();
        fs::write(dst.join("a.txt"), "old").unwrap();

        let mut pfs = PackageFs::local();
        pfs.copy_tree(&src, &dst).unwrap();
        assert_eq!(pfs.pending(), 1);
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "old");
        pfs.flush().unwrap();
        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "A");
    }

    #[test]
    fn test_delete_tree_keeps_root_when_asked() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("gone");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/f.txt"), "x").unwrap();
        fs::write(root.join("g.txt"), "y").unwrap();

        let mut pfs = PackageFs::local();
        pfs.delete_tree(&root, false).unwrap();
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        pfs.delete_tree(&root, true).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_remove_file_drops_pending_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a.php");
        fs::write(&file, "old").unwrap();

        let mut pfs = PackageFs::local();
        pfs.write_file(&file, b"new").unwrap();
        pfs.remove_file(&file).unwrap();

        assert_eq!(pfs.pending(), 0);
        assert!(!file.exists());
        pfs.remove_file(&file).unwrap();
    }

    #[test]
    fn test_snapshot_copies_aside() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("Load.php");
        fs::write(&file, "<?php // original").unwrap();

        let mut pfs = PackageFs::local();
        let backup = pfs.snapshot(&file).unwrap();
        assert_eq!(backup, temp_dir.path().join("Load.php~"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "<?php // original");
    }

    #[test]
    fn test_probe_access() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(probe_access(temp_dir.path()));
        assert!(!probe_access(&temp_dir.path().join("nope")));
    }
}
