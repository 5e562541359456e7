// src/filesystem/transport.rs

//! Write transports
//!
//! Every mutation of the target tree goes through a `Transport`. Two
//! implementations exist and one is picked per session:
//! - `LocalTransport`: direct `std::fs` calls
//! - `RemoteTransport`: creation, permission changes and deletion are sent
//!   over a remote connection (FTP-style) whose paths are relative to a
//!   configured root; content lands on the shared local path

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Modes tried, in order, to make a directory writable
pub const DIR_MODES: &[u32] = &[0o755, 0o775, 0o777];

/// Modes tried, in order, to make a file writable
pub const FILE_MODES: &[u32] = &[0o644, 0o664, 0o666];

/// Extensions written as text
const TEXT_EXTENSIONS: &[&str] = &["php", "txt", "js", "css", "vbs", "html", "htm", "xml", "json"];

/// How content should be transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Binary,
}

impl ContentKind {
    /// Classify by file extension
    pub fn for_path(path: &Path) -> Self {
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_text {
            ContentKind::Text
        } else {
            ContentKind::Binary
        }
    }
}

/// Capability set used by `PackageFs` for every mutation
pub trait Transport {
    /// Short name for logs ("local", "remote")
    fn name(&self) -> &str;

    /// Replace the content of `path`
    fn write(&mut self, path: &Path, data: &[u8], kind: ContentKind) -> Result<()>;

    /// Try `modes` in order until `path` is writable; returns whether it is
    fn chmod(&mut self, path: &Path, modes: &[u32]) -> Result<bool>;

    /// Create an empty file
    fn create_file(&mut self, path: &Path) -> Result<()>;

    /// Create one directory (parent must exist)
    fn create_dir(&mut self, path: &Path) -> Result<()>;

    /// Delete a file or an empty directory
    fn delete(&mut self, path: &Path) -> Result<()>;
}

/// Whether the current process may write to `path`
#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
    use nix::unistd::{AccessFlags, access};
    access(path, AccessFlags::W_OK).is_ok()
}

/// Whether the current process may write to `path`
#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, perms)
}

/// Direct local filesystem access
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn write(&mut self, path: &Path, data: &[u8], kind: ContentKind) -> Result<()> {
        debug!("Writing {} bytes ({:?}) to {}", data.len(), kind, path.display());
        fs::write(path, data)?;
        Ok(())
    }

    fn chmod(&mut self, path: &Path, modes: &[u32]) -> Result<bool> {
        for &mode in modes {
            if let Err(e) = set_mode(path, mode) {
                debug!("chmod {:o} on {} failed: {}", mode, path.display(), e);
                continue;
            }
            if is_writable(path) {
                return Ok(true);
            }
        }
        Ok(is_writable(path))
    }

    fn create_file(&mut self, path: &Path) -> Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(())
    }

    fn create_dir(&mut self, path: &Path) -> Result<()> {
        fs::create_dir(path)?;
        Ok(())
    }

    fn delete(&mut self, path: &Path) -> Result<()> {
        if path.is_dir() {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// A remote file-transfer session (FTP or similar)
///
/// Paths are relative to the connection's root, using `/` separators.
pub trait RemoteConnection {
    /// Apply the first mode in `modes` the server accepts
    fn chmod(&mut self, path: &str, modes: &[u32]) -> Result<()>;
    fn create_file(&mut self, path: &str) -> Result<()>;
    fn create_dir(&mut self, path: &str) -> Result<()>;
    fn delete(&mut self, path: &str) -> Result<()>;
}

/// Transport routing metadata operations through a remote connection
pub struct RemoteTransport<C: RemoteConnection> {
    connection: C,
    root: PathBuf,
}

impl<C: RemoteConnection> RemoteTransport<C> {
    /// `root` is the local path the connection's root maps to
    pub fn new(connection: C, root: impl Into<PathBuf>) -> Self {
        Self {
            connection,
            root: root.into(),
        }
    }

    /// Strip the configured root from an absolute local path
    pub fn remote_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .filter(|c| c != "/")
            .collect::<Vec<_>>()
            .join("/");
        format!("/{}", joined)
    }
}

impl<C: RemoteConnection> Transport for RemoteTransport<C> {
    fn name(&self) -> &str {
        "remote"
    }

    fn write(&mut self, path: &Path, data: &[u8], kind: ContentKind) -> Result<()> {
        if !path.exists() {
            let remote = self.remote_path(path);
            self.connection.create_file(&remote)?;
        }
        debug!("Writing {} bytes ({:?}) to {}", data.len(), kind, path.display());
        fs::write(path, data)?;
        Ok(())
    }

    fn chmod(&mut self, path: &Path, modes: &[u32]) -> Result<bool> {
        let remote = self.remote_path(path);
        if let Err(e) = self.connection.chmod(&remote, modes) {
            debug!("Remote chmod on {} failed: {}", remote, e);
        }
        Ok(is_writable(path))
    }

    fn create_file(&mut self, path: &Path) -> Result<()> {
        let remote = self.remote_path(path);
        self.connection.create_file(&remote)
    }

    fn create_dir(&mut self, path: &Path) -> Result<()> {
        let remote = self.remote_path(path);
        self.connection.create_dir(&remote)
    }

    fn delete(&mut self, path: &Path) -> Result<()> {
        let remote = self.remote_path(path);
        self.connection.delete(&remote).map_err(|e| match e {
            Error::Transport(msg) => Error::Transport(format!("{}: {}", remote, msg)),
            other => other,
        })
    }
}
