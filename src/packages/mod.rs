// src/packages/mod.rs

//! Package handling for Modsmith
//!
//! A package is an archive holding a `package-info.xml` manifest plus the
//! modification documents and files its sections refer to.
//! - `archive`: detect, list and unpack tar.gz / zip packages
//! - `manifest`: parse the manifest and pick the section for a host version

pub mod archive;
pub mod manifest;

pub use archive::{ArchiveEntry, ArchiveFormat, ExtractOutcome, extract, extract_file};
pub use manifest::{InstallStep, MANIFEST_FILE, PackageManifest, Section};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Locate the manifest in a staging directory
///
/// Packages either carry it at their root or inside one top-level folder.
pub fn find_manifest(staging_dir: &Path) -> Result<PathBuf> {
    let direct = staging_dir.join(MANIFEST_FILE);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut nested: Vec<PathBuf> = std::fs::read_dir(staging_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path().join(MANIFEST_FILE))
        .filter(|p| p.is_file())
        .collect();
    nested.sort();

    nested.into_iter().next().ok_or_else(|| {
        Error::MalformedDocument(format!(
            "no {} found in {}",
            MANIFEST_FILE,
            staging_dir.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_manifest_at_root_or_nested() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(find_manifest(temp_dir.path()).is_err());

        let nested = temp_dir.path().join("shoutbox");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(MANIFEST_FILE), "<package-info/>").unwrap();
        assert_eq!(
            find_manifest(temp_dir.path()).unwrap(),
            nested.join(MANIFEST_FILE)
        );

        std::fs::write(temp_dir.path().join(MANIFEST_FILE), "<package-info/>").unwrap();
        assert_eq!(
            find_manifest(temp_dir.path()).unwrap(),
            temp_dir.path().join(MANIFEST_FILE)
        );
    }
}
