// src/paths.rs

//! Symbolic path variables
//!
//! Instruction documents address files through variables such as
//! `$sourcedir/Load.php` or `$themedir/index.template.php`. `PathVars` holds
//! the concrete roots of one host application and expands those variables
//! into absolute paths.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Concrete directories of a host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathVars {
    /// Application root (`$rootdir`)
    pub root_dir: PathBuf,
    /// Application source tree (`$sourcedir`)
    pub source_dir: PathBuf,
    /// Default theme (`$themedir`)
    pub theme_dir: PathBuf,
    /// Directory holding every theme (`$themes_dir`)
    pub themes_dir: PathBuf,
    /// Default theme images (`$imagesdir`)
    pub images_dir: PathBuf,
    /// Default theme languages (`$languagedir`)
    pub language_dir: PathBuf,
    /// Avatars (`$avatardir`)
    pub avatar_dir: PathBuf,
    /// Smileys (`$smileysdir`)
    pub smileys_dir: PathBuf,
    /// Staging root of the package being applied (`$package`)
    pub package_dir: Option<PathBuf>,
}

impl PathVars {
    /// Derive the conventional layout below an application root
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root_dir = root.into();
        let themes_dir = root_dir.join("Themes");
        let theme_dir = themes_dir.join("default");
        Self {
            source_dir: root_dir.join("Sources"),
            images_dir: theme_dir.join("images"),
            language_dir: theme_dir.join("languages"),
            avatar_dir: root_dir.join("avatars"),
            smileys_dir: root_dir.join("Smileys"),
            theme_dir,
            themes_dir,
            root_dir,
            package_dir: None,
        }
    }

    /// Same layout with `$package` pointing at a staging directory
    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = Some(dir.into());
        self
    }

    /// Variable table, longest names first so `$themes_dir` wins over `$themedir`
    fn variables(&self) -> Vec<(&'static str, &Path)> {
        let mut vars: Vec<(&'static str, &Path)> = vec![
            ("$rootdir", self.root_dir.as_path()),
            ("$boarddir", self.root_dir.as_path()),
            ("$sourcedir", self.source_dir.as_path()),
            ("$themedir", self.theme_dir.as_path()),
            ("$themes_dir", self.themes_dir.as_path()),
            ("$imagesdir", self.images_dir.as_path()),
            ("$languagedir", self.language_dir.as_path()),
            ("$languages_dir", self.language_dir.as_path()),
            ("$avatardir", self.avatar_dir.as_path()),
            ("$avatars_dir", self.avatar_dir.as_path()),
            ("$smileysdir", self.smileys_dir.as_path()),
            ("$smileys_dir", self.smileys_dir.as_path()),
        ];
        if let Some(package_dir) = &self.package_dir {
            vars.push(("$package", package_dir.as_path()));
        }
        vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        vars
    }

    /// Expand a leading variable, without any existence lookup
    pub fn substitute(&self, raw: &str) -> PathBuf {
        let raw = raw.trim();
        for (name, dir) in self.variables() {
            if let Some(rest) = raw.strip_prefix(name) {
                let rest = rest.trim_start_matches(['/', '\\']);
                return if rest.is_empty() {
                    dir.to_path_buf()
                } else {
                    dir.join(rest)
                };
            }
        }
        PathBuf::from(raw)
    }

    /// Expand a document path to an absolute path
    ///
    /// Relative leftovers are looked up below the root, source, theme and
    /// theme-language directories; the root wins when none has the file.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let path = self.substitute(raw);
        if path.is_absolute() {
            return Ok(path);
        }

        let places = [
            &self.root_dir,
            &self.source_dir,
            &self.theme_dir,
            &self.language_dir,
        ];
        let resolved = places
            .iter()
            .map(|place| place.join(&path))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| self.root_dir.join(&path));

        if !resolved.is_absolute() {
            return Err(Error::MalformedDocument(format!(
                "path '{}' does not resolve to an absolute path",
                raw
            )));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_known_variables() {
        let vars = PathVars::from_root("/srv/forum");
        assert_eq!(
            vars.substitute("$sourcedir/Load.php"),
            PathBuf::from("/srv/forum/Sources/Load.php")
        );
        assert_eq!(
            vars.substitute("$themedir/index.template.php"),
            PathBuf::from("/srv/forum/Themes/default/index.template.php")
        );
        assert_eq!(
            vars.substitute("$themes_dir/other/style.css"),
            PathBuf::from("/srv/forum/Themes/other/style.css")
        );
        assert_eq!(
            vars.substitute("$languagedir"),
            PathBuf::from("/srv/forum/Themes/default/languages")
        );
    }

    #[test]
    fn test_package_variable_requires_staging() {
        let vars = PathVars::from_root("/srv/forum");
        assert_eq!(vars.substitute("$package/x"), PathBuf::from("$package/x"));

        let vars = vars.with_package_dir("/tmp/stage");
        assert_eq!(vars.substitute("$package/x"), PathBuf::from("/tmp/stage/x"));
    }

    #[test]
    fn test_resolve_relative_prefers_existing_location() {
        let temp_dir = tempfile::tempdir().unwrap();
        let vars = PathVars::from_root(temp_dir.path());
        std::fs::create_dir_all(&vars.source_dir).unwrap();
        std::fs::write(vars.source_dir.join("Subs.php"), "<?php").unwrap();

        assert_eq!(
            vars.resolve("Subs.php").unwrap(),
            vars.source_dir.join("Subs.php")
        );
        assert_eq!(
            vars.resolve("new.php").unwrap(),
            temp_dir.path().join("new.php")
        );
    }

    #[test]
    fn test_resolve_relative_root_is_malformed() {
        let vars = PathVars::from_root("relative/root");
        assert!(matches!(
            vars.resolve("file.php"),
            Err(Error::MalformedDocument(_))
        ));
    }
}
