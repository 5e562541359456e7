// src/packages/archive.rs

//! Package archive staging
//!
//! Packages ship as gzip-compressed tarballs or zip files. The format is
//! detected from the leading magic bytes; decoding is left to the `tar`,
//! `flate2` and `zip` crates. Extracted files are written through
//! `PackageFs` so the staging area follows the session's transport.

use crate::error::{Error, Result};
use crate::filesystem::PackageFs;
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{debug, info};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Supported archive framings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from leading bytes
    pub fn detect(data: &[u8]) -> Result<Self> {
        if data.starts_with(GZIP_MAGIC) {
            Ok(ArchiveFormat::TarGz)
        } else if data.starts_with(ZIP_MAGIC) {
            Ok(ArchiveFormat::Zip)
        } else {
            Err(Error::Archive(
                "unrecognized archive format (expected tar.gz or zip)".to_string(),
            ))
        }
    }
}

/// One entry of an archive listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated, without a leading `./`
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// What `extract` produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// No destination was given: the archive's entries
    Listing(Vec<ArchiveEntry>),
    /// A single file was requested: its bytes
    Content(Vec<u8>),
    /// Files written below the destination
    Extracted(Vec<PathBuf>),
}

/// An entry with its content loaded
struct LoadedEntry {
    entry: ArchiveEntry,
    data: Vec<u8>,
}

/// Decode, list or unpack an archive held in memory
///
/// - no `destination`: list entries (filtered)
/// - `single_file`: return that file's bytes; `*/name` matches the file
///   name in any directory
/// - otherwise: write matching files below `destination`, skipping existing
///   files unless `overwrite`
pub fn extract(
    fs: &mut PackageFs,
    data: &[u8],
    destination: Option<&Path>,
    single_file: Option<&str>,
    overwrite: bool,
    filter: Option<&Regex>,
) -> Result<ExtractOutcome> {
    let format = ArchiveFormat::detect(data)?;
    let entries = match format {
        ArchiveFormat::TarGz => read_tar_gz(data)?,
        ArchiveFormat::Zip => read_zip(data)?,
    };
    debug!("Read {} entries from {:?} archive", entries.len(), format);

    if let Some(wanted) = single_file {
        return entries
            .into_iter()
            .find(|e| !e.entry.is_dir && matches_single(&e.entry.path, wanted))
            .map(|e| ExtractOutcome::Content(e.data))
            .ok_or_else(|| Error::Archive(format!("{} not found in archive", wanted)));
    }

    let selected = entries
        .into_iter()
        .filter(|e| filter.is_none_or(|f| f.is_match(&e.entry.path)));

    let Some(destination) = destination else {
        return Ok(ExtractOutcome::Listing(selected.map(|e| e.entry).collect()));
    };

    let mut written = Vec::new();
    for loaded in selected {
        let target = destination.join(&loaded.entry.path);
        if loaded.entry.is_dir {
            fs.ensure_directory(&target)?;
            continue;
        }
        if !overwrite && fs.exists(&target) {
            debug!("Keeping existing {}", target.display());
            continue;
        }
        fs.write_file(&target, &loaded.data)?;
        written.push(target);
    }

    info!(
        "Extracted {} file(s) to {}",
        written.len(),
        destination.display()
    );
    Ok(ExtractOutcome::Extracted(written))
}

/// Read an archive file from disk and unpack it below `destination`
pub fn extract_file(fs: &mut PackageFs, archive: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    let data = std::fs::read(archive)?;
    match extract(fs, &data, Some(destination), None, true, None)? {
        ExtractOutcome::Extracted(files) => Ok(files),
        _ => Ok(Vec::new()),
    }
}

fn matches_single(path: &str, wanted: &str) -> bool {
    match wanted.strip_prefix("*/") {
        Some(name) => path.rsplit('/').next() == Some(name),
        None => path == wanted.trim_start_matches("./"),
    }
}

/// Normalize an entry name, refusing anything that escapes the destination
fn clean_path(raw: &str) -> Result<Option<String>> {
    let mut parts = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Archive(format!(
                    "entry {} points outside the archive root",
                    raw
                )));
            }
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

fn read_tar_gz(data: &[u8]) -> Result<Vec<LoadedEntry>> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let mut entries = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| Error::Archive(format!("Failed to read tarball: {}", e)))?
    {
        let mut entry = entry.map_err(|e| Error::Archive(format!("Bad tar entry: {}", e)))?;
        let raw = entry
            .path()
            .map_err(|e| Error::Archive(format!("Bad tar entry path: {}", e)))?
            .to_string_lossy()
            .to_string();
        let Some(path) = clean_path(&raw)? else {
            continue;
        };

        let entry_type = entry.header().entry_type();
        if !entry_type.is_file() && !entry_type.is_dir() {
            debug!("Skipping special tar entry {}", path);
            continue;
        }

        let mut content = Vec::new();
        if entry_type.is_file() {
            entry.read_to_end(&mut content)?;
        }
        entries.push(LoadedEntry {
            entry: ArchiveEntry {
                path,
                size: content.len() as u64,
                is_dir: entry_type.is_dir(),
            },
            data: content,
        });
    }

    Ok(entries)
}

fn read_zip(data: &[u8]) -> Result<Vec<LoadedEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(path) = clean_path(file.name())? else {
            continue;
        };

        let is_dir = file.is_dir();
        let mut content = Vec::new();
        if !is_dir {
            file.read_to_end(&mut content)?;
        }
        entries.push(LoadedEntry {
            entry: ArchiveEntry {
                path,
                size: content.len() as u64,
                is_dir,
            },
            data: content,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{LocalTransport, WriteCache};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        for (path, content) in files {
            writer.start_file(*path, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn direct_fs() -> PackageFs {
        PackageFs::new(Box::new(LocalTransport), WriteCache::disabled())
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            ArchiveFormat::detect(&tar_gz(&[("a", "b")])).unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::detect(&zip_bytes(&[("a", "b")])).unwrap(),
            ArchiveFormat::Zip
        );
        assert!(matches!(
            ArchiveFormat::detect(b"plain text"),
            Err(Error::Archive(_))
        ));
    }

    #[test]
    fn test_listing_without_destination() {
        let data = tar_gz(&[("package-info.xml", "<package-info/>"), ("src/a.php", "x")]);
        let mut pfs = direct_fs();

        let outcome = extract(&mut pfs, &data, None, None, false, None).unwrap();
        let ExtractOutcome::Listing(entries) = outcome else {
            panic!("expected a listing");
        };
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["package-info.xml", "src/a.php"]);
        assert_eq!(entries[1].size, 1);
    }

    #[test]
    fn test_single_file_content() {
        let data = zip_bytes(&[("pkg/package-info.xml", "<package-info/>"), ("pkg/a.php", "x")]);
        let mut pfs = direct_fs();

        let outcome =
            extract(&mut pfs, &data, None, Some("*/package-info.xml"), false, None).unwrap();
        assert_eq!(outcome, ExtractOutcome::Content(b"<package-info/>".to_vec()));

        let missing = extract(&mut pfs, &data, None, Some("nope.txt"), false, None);
        assert!(matches!(missing, Err(Error::Archive(_))));
    }

    #[test]
    fn test_extract_respects_filter_and_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data = tar_gz(&[("a.php", "new"), ("b.txt", "b"), ("c.php", "c")]);
        std::fs::write(temp_dir.path().join("a.php"), "old").unwrap();

        let filter = Regex::new(r"\.php$").unwrap();
        let mut pfs = direct_fs();
        let outcome = extract(
            &mut pfs,
            &data,
            Some(temp_dir.path()),
            None,
            false,
            Some(&filter),
        )
        .unwrap();

        assert_eq!(
            outcome,
            ExtractOutcome::Extracted(vec![temp_dir.path().join("c.php")])
        );
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("a.php")).unwrap(),
            "old"
        );
        assert!(!temp_dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_extract_file_from_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = temp_dir.path().join("pkg.zip");
        std::fs::write(&archive, zip_bytes(&[("dir/x.txt", "x")])).unwrap();
        let dest = temp_dir.path().join("stage");

        let mut pfs = direct_fs();
        let files = extract_file(&mut pfs, &archive, &dest).unwrap();
        assert_eq!(files, vec![dest.join("dir/x.txt")]);
        assert_eq!(std::fs::read_to_string(dest.join("dir/x.txt")).unwrap(), "x");
    }

    #[test]
    fn test_escaping_entries_are_refused() {
        assert!(clean_path("../etc/passwd").is_err());
        assert!(clean_path("/etc/passwd").is_err());
        assert_eq!(clean_path("./a/./b").unwrap(), Some("a/b".to_string()));
        assert_eq!(clean_path("./").unwrap(), None);
    }
}
