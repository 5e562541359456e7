// src/packages/manifest.rs

//! Package manifest (`package-info.xml`)
//!
//! A manifest names the package and lists install, upgrade and uninstall
//! sections. Each section declares which host versions it supports and the
//! ordered steps to run:
//!
//! ```xml
//! <package-info>
//!   <id>author:shoutbox</id>
//!   <name>Shoutbox</name>
//!   <version>1.1</version>
//!   <type>modification</type>
//!   <install for="2.0 - 2.0.99">
//!     <modification>install.xml</modification>
//!     <require-dir name="Themes" destination="$boarddir" />
//!   </install>
//!   <upgrade from="1.0" for="2.0 - 2.0.99">
//!     <modification>upgrade.xml</modification>
//!   </upgrade>
//!   <uninstall for="2.0 - 2.0.99">
//!     <modification reverse="true">install.xml</modification>
//!   </uninstall>
//! </package-info>
//! ```

use crate::db::models::PackageInfo;
use crate::document::{Node, xml};
use crate::error::{Error, Result};
use crate::version::{self, VersionExpression};
use std::cmp::Ordering;
use std::path::Path;

/// Root tag of a manifest
pub const ROOT_TAG: &str = "package-info";

/// File name a manifest is looked up by inside a package
pub const MANIFEST_FILE: &str = "package-info.xml";

/// One step of an install, upgrade or uninstall section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// Apply a modification document shipped in the package
    Modification { path: String, reverse: bool },
    /// Copy one package file into the host tree
    RequireFile { from: String, destination: String },
    /// Copy a package directory into the host tree
    RequireDir { from: String, destination: String },
    /// Delete a host file
    RemoveFile { path: String },
    /// Delete a host directory and everything below it
    RemoveDir { path: String },
}

/// A version-gated list of steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Host versions this section supports
    pub for_versions: String,
    /// Previously installed versions an upgrade section applies to
    pub from_versions: Option<String>,
    pub steps: Vec<InstallStep>,
}

impl Section {
    pub fn supports(&self, app_version: &str) -> bool {
        version::satisfies(app_version, &self.for_versions)
    }

    /// Modification steps only, in order
    pub fn modifications(&self) -> impl Iterator<Item = (&str, bool)> {
        self.steps.iter().filter_map(|step| match step {
            InstallStep::Modification { path, reverse } => Some((path.as_str(), *reverse)),
            _ => None,
        })
    }
}

/// A validated package manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub package_type: String,
    pub install: Vec<Section>,
    pub upgrade: Vec<Section>,
    pub uninstall: Vec<Section>,
}

impl PackageManifest {
    pub fn from_tree(root: &Node) -> Result<Self> {
        if root.name != ROOT_TAG {
            return Err(Error::MalformedDocument(format!(
                "expected <{}> root, found <{}>",
                ROOT_TAG, root.name
            )));
        }

        let required = |tag: &str| {
            root.fetch(tag)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::MalformedDocument(format!("package-info has no <{}>", tag)))
        };

        let id = required("id")?;
        let name = required("name")?;
        let version = required("version")?;
        let package_type = root
            .fetch("type")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "modification".to_string());

        let sections = |tag: &str| -> Result<Vec<Section>> {
            root.set(tag).into_iter().map(section_from).collect()
        };

        Ok(Self {
            id,
            name,
            version,
            package_type,
            install: sections("install")?,
            upgrade: sections("upgrade")?,
            uninstall: sections("uninstall")?,
        })
    }

    pub fn from_xml(xml_content: &str) -> Result<Self> {
        Self::from_tree(&xml::parse(xml_content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_tree(&xml::parse_file(path)?)
    }

    /// First install section supporting `app_version`
    pub fn install_section(&self, app_version: &str) -> Option<&Section> {
        self.install.iter().find(|s| s.supports(app_version))
    }

    /// First uninstall section supporting `app_version`
    pub fn uninstall_section(&self, app_version: &str) -> Option<&Section> {
        self.uninstall.iter().find(|s| s.supports(app_version))
    }

    /// Best upgrade section for moving from `installed` on `app_version`
    ///
    /// Among sections whose `from` accepts the installed version, the one
    /// naming the highest version at or below it wins; earlier sections win
    /// ties.
    pub fn upgrade_section(&self, installed: &str, app_version: &str) -> Option<&Section> {
        let mut best: Option<(&Section, Option<String>)> = None;

        for section in self.upgrade.iter().filter(|s| s.supports(app_version)) {
            let from = section.from_versions.as_deref().unwrap_or("all");
            let expression = VersionExpression::parse(from);
            if !expression.satisfied_by(installed) {
                continue;
            }

            let rank = expression.highest_below(installed);
            let better = match (&best, &rank) {
                (None, _) => true,
                (Some((_, None)), Some(_)) => true,
                (Some((_, Some(current))), Some(candidate)) => {
                    version::compare(candidate, current) == Ordering::Greater
                }
                _ => false,
            };
            if better {
                best = Some((section, rank));
            }
        }

        best.map(|(section, _)| section)
    }

    /// Identity to record once the package is installed
    pub fn record_info(&self, filename: &str, actor: &str) -> PackageInfo {
        PackageInfo {
            package_id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            filename: filename.to_string(),
            actor: actor.to_string(),
        }
    }
}

fn section_from(node: &Node) -> Result<Section> {
    let for_versions = node
        .attr("for")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("all")
        .to_string();
    let from_versions = node
        .attr("from")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let mut steps = Vec::new();
    for child in &node.children {
        let text = child.text.trim().to_string();
        let step = match child.name.as_str() {
            "modification" => InstallStep::Modification {
                path: non_empty(text, child)?,
                reverse: child.attr("reverse").is_some_and(|v| v.trim() == "true"),
            },
            "require-file" | "require-dir" => {
                let from = child
                    .attr("name")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::MalformedDocument(format!("<{}> has no name", child.name))
                    })?;
                let destination = child
                    .attr("destination")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::MalformedDocument(format!("<{}> has no destination", child.name))
                    })?;
                if child.name == "require-file" {
                    InstallStep::RequireFile { from, destination }
                } else {
                    InstallStep::RequireDir { from, destination }
                }
            }
            "remove-file" | "remove-dir" => {
                let path = child
                    .attr("name")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        Error::MalformedDocument(format!("<{}> has no name", child.name))
                    })?;
                if child.name == "remove-file" {
                    InstallStep::RemoveFile { path }
                } else {
                    InstallStep::RemoveDir { path }
                }
            }
            // readme, credits and the like are presentation only
            _ => continue,
        };
        steps.push(step);
    }

    Ok(Section {
        for_versions,
        from_versions,
        steps,
    })
}

fn non_empty(text: String, node: &Node) -> Result<String> {
    if text.is_empty() {
        Err(Error::MalformedDocument(format!("empty <{}> step", node.name)))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0"?>
<package-info>
  <id>author:shoutbox</id>
  <name>Shoutbox</name>
  <version>1.2</version>
  <install for="2.0 - 2.0.99">
    <readme>readme.txt</readme>
    <modification>install.xml</modification>
    <require-file name="Shoutbox.php" destination="$sourcedir" />
    <require-dir name="shoutbox" destination="$themedir" />
  </install>
  <install for="1.1.*">
    <modification>install_11.xml</modification>
  </install>
  <upgrade from="1.0, 1.0.5" for="2.0 - 2.0.99">
    <modification>upgrade_10.xml</modification>
  </upgrade>
  <upgrade from="1.1" for="2.0 - 2.0.99">
    <modification>upgrade_11.xml</modification>
  </upgrade>
  <uninstall for="2.0 - 2.0.99">
    <modification reverse="true">install.xml</modification>
    <remove-file name="$sourcedir/Shoutbox.php" />
    <remove-dir name="$themedir/shoutbox" />
  </uninstall>
</package-info>"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PackageManifest::from_xml(MANIFEST).unwrap();
        assert_eq!(manifest.id, "author:shoutbox");
        assert_eq!(manifest.version, "1.2");
        assert_eq!(manifest.package_type, "modification");
        assert_eq!(manifest.install.len(), 2);
        assert_eq!(manifest.upgrade.len(), 2);

        let install = &manifest.install[0];
        assert_eq!(
            install.steps,
            vec![
                InstallStep::Modification {
                    path: "install.xml".to_string(),
                    reverse: false
                },
                InstallStep::RequireFile {
                    from: "Shoutbox.php".to_string(),
                    destination: "$sourcedir".to_string()
                },
                InstallStep::RequireDir {
                    from: "shoutbox".to_string(),
                    destination: "$themedir".to_string()
                },
            ]
        );

        let uninstall = &manifest.uninstall[0];
        assert_eq!(
            uninstall.modifications().collect::<Vec<_>>(),
            vec![("install.xml", true)]
        );
    }

    #[test]
    fn test_install_section_by_host_version() {
        let manifest = PackageManifest::from_xml(MANIFEST).unwrap();
        let section = manifest.install_section("2.0.4").unwrap();
        assert_eq!(section.modifications().next(), Some(("install.xml", false)));

        let section = manifest.install_section("1.1.9").unwrap();
        assert_eq!(section.modifications().next(), Some(("install_11.xml", false)));

        assert!(manifest.install_section("3.0").is_none());
    }

    #[test]
    fn test_upgrade_section_prefers_closest_from() {
        let manifest = PackageManifest::from_xml(MANIFEST).unwrap();

        let section = manifest.upgrade_section("1.1", "2.0.1").unwrap();
        assert_eq!(section.modifications().next(), Some(("upgrade_11.xml", false)));

        let section = manifest.upgrade_section("1.0.5", "2.0.1").unwrap();
        assert_eq!(section.modifications().next(), Some(("upgrade_10.xml", false)));

        assert!(manifest.upgrade_section("0.9", "2.0.1").is_none());
        assert!(manifest.upgrade_section("1.1", "3.0").is_none());
    }

    #[test]
    fn test_upgrade_without_from_accepts_any() {
        let manifest = PackageManifest::from_xml(
            r#"<package-info><id>a:b</id><name>B</name><version>2</version>
               <upgrade><modification>up.xml</modification></upgrade></package-info>"#,
        )
        .unwrap();
        assert!(manifest.upgrade_section("1.0", "9.9").is_some());
    }

    #[test]
    fn test_missing_identity_is_malformed() {
        let result = PackageManifest::from_xml(
            "<package-info><name>B</name><version>1</version></package-info>",
        );
        assert!(matches!(result, Err(Error::MalformedDocument(_))));

        let result = PackageManifest::from_xml("<modification/>");
        assert!(matches!(result, Err(Error::MalformedDocument(_))));
    }

    #[test]
    fn test_record_info() {
        let manifest = PackageManifest::from_xml(MANIFEST).unwrap();
        let info = manifest.record_info("shoutbox_1.2.zip", "admin");
        assert_eq!(info.package_id, "author:shoutbox");
        assert_eq!(info.name, "Shoutbox");
        assert_eq!(info.filename, "shoutbox_1.2.zip");
    }
}
