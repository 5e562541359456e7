// src/install.rs

//! Install sessions
//!
//! An `Installer` ties the pieces together for one package: it reads the
//! manifest from a staging directory, gates on the installed version and the
//! host version, dry-runs the selected section, applies it for real, flushes
//! the write cache and records the outcome.

use crate::db::{self, models::InstalledPackage, models::PersistenceChange};
use crate::document::ModificationDocument;
use crate::engine::{Action, EngineOptions, FailureReason, ModificationEngine, ModificationReport, ThemeRoot};
use crate::error::{Error, Result};
use crate::filesystem::PackageFs;
use crate::packages::{self, InstallStep, PackageManifest, Section};
use crate::paths::PathVars;
use crate::version;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Per-run install switches
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Apply even when the dry run reported failures
    pub force: bool,
    /// Copy modified files to `<file>~` first
    pub snapshot: bool,
    /// Who performs the operation
    pub actor: String,
    /// Archive file name to record; defaults to the staging directory name
    pub archive_name: Option<String>,
    /// Database changes the host made for this package
    pub persistence_changes: Vec<PersistenceChange>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            force: false,
            snapshot: false,
            actor: "modsmith".to_string(),
            archive_name: None,
            persistence_changes: Vec::new(),
        }
    }
}

/// Result of `Installer::install`
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub package_id: String,
    pub version: String,
    /// Set when the package was applied and recorded
    pub install_id: Option<i64>,
    pub is_upgrade: bool,
    /// The real run's log, or the dry run's when the install was refused
    pub report: ModificationReport,
}

/// Result of `Installer::uninstall`
#[derive(Debug, Clone)]
pub struct UninstallOutcome {
    pub report: ModificationReport,
    /// Recorded database changes the host should now reverse
    pub persistence_changes: Vec<PersistenceChange>,
}

/// Collects the actions of every step of a section
struct SectionLog {
    actions: Vec<Action>,
    status: bool,
}

impl SectionLog {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            status: true,
        }
    }

    /// Append an engine report, folding its result into ours
    fn absorb(&mut self, report: ModificationReport) {
        self.status &= report.status();
        self.actions.extend(
            report
                .actions
                .into_iter()
                .filter(|a| !matches!(a, Action::Result { .. })),
        );
    }

    fn fail(&mut self, action: Action) {
        self.status = false;
        self.actions.push(action);
    }

    fn finish(mut self) -> ModificationReport {
        self.actions.push(Action::Result {
            status: self.status,
        });
        ModificationReport {
            actions: self.actions,
        }
    }
}

/// Installs and removes packages against one host tree
pub struct Installer<'a> {
    conn: &'a mut Connection,
    fs: PackageFs,
    vars: PathVars,
    themes: Vec<ThemeRoot>,
}

impl<'a> Installer<'a> {
    pub fn new(conn: &'a mut Connection, fs: PackageFs, vars: PathVars) -> Self {
        Self {
            conn,
            fs,
            vars,
            themes: Vec::new(),
        }
    }

    pub fn with_themes(mut self, themes: Vec<ThemeRoot>) -> Self {
        self.themes = themes;
        self
    }

    pub fn fs(&self) -> &PackageFs {
        &self.fs
    }

    /// Install (or upgrade to) the package staged in `staging_dir`
    pub fn install(
        &mut self,
        staging_dir: &Path,
        app_version: &str,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let (manifest, package_root) = load_manifest(staging_dir)?;
        info!(
            "Installing {} {} ({})",
            manifest.name, manifest.version, manifest.id
        );

        let existing = InstalledPackage::is_installed(self.conn, &manifest.id, None)?;
        let (section, is_upgrade) = match &existing {
            Some(record) if version::compare(&record.version, &manifest.version) != Ordering::Less => {
                return Err(Error::AlreadyInstalled {
                    package: manifest.id.clone(),
                    version: record.version.clone(),
                });
            }
            Some(record) => {
                info!("Upgrading {} from {}", manifest.id, record.version);
                (manifest.upgrade_section(&record.version, app_version), true)
            }
            None => (manifest.install_section(app_version), false),
        };
        let section = section.ok_or_else(|| Error::IncompatibleVersion {
            package: manifest.id.clone(),
            version: app_version.to_string(),
        })?;

        let themes = self.themes.clone();
        let base = EngineOptions {
            snapshot: options.snapshot,
            ..Default::default()
        };

        let dry_run = self.apply_section(
            section,
            &package_root,
            &themes,
            EngineOptions {
                dry_run: true,
                ..base
            },
        )?;
        self.fs.discard();

        if !dry_run.status() && !options.force {
            warn!(
                "Dry run of {} failed with {} problem(s); not applying",
                manifest.id,
                dry_run.failed_steps().len()
            );
            return Ok(InstallOutcome {
                package_id: manifest.id,
                version: manifest.version,
                install_id: None,
                is_upgrade,
                report: dry_run,
            });
        }

        let report = self.apply_section(section, &package_root, &themes, base)?;
        self.commit()?;

        let archive_name = options.archive_name.clone().unwrap_or_else(|| {
            staging_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        let record = manifest.record_info(&archive_name, &options.actor);
        let failed_steps = report.failed_steps();
        let touched_themes = report.themes();

        let install_id = db::transaction(self.conn, |tx| {
            InstalledPackage::record_install(
                tx,
                &record,
                &failed_steps,
                &touched_themes,
                &options.persistence_changes,
                is_upgrade,
            )
        })?;

        Ok(InstallOutcome {
            package_id: manifest.id,
            version: manifest.version,
            install_id: Some(install_id),
            is_upgrade,
            report,
        })
    }

    /// Remove `package_id` using the package staged in `staging_dir`
    ///
    /// Runs the uninstall section, or the install section in undo mode when
    /// the package has none. Theme copies are only reverted for themes the
    /// install touched.
    pub fn uninstall(
        &mut self,
        staging_dir: &Path,
        package_id: &str,
        app_version: &str,
        options: &InstallOptions,
    ) -> Result<UninstallOutcome> {
        let record = InstalledPackage::is_installed(self.conn, package_id, None)?
            .ok_or_else(|| Error::NotInstalled(package_id.to_string()))?;

        let (manifest, package_root) = load_manifest(staging_dir)?;
        if manifest.id != package_id {
            return Err(Error::MalformedDocument(format!(
                "staged package is {}, not {}",
                manifest.id, package_id
            )));
        }

        let (section, undo) = match manifest.uninstall_section(app_version) {
            Some(section) => (section, false),
            None => {
                let section = manifest.install_section(app_version).ok_or_else(|| {
                    Error::IncompatibleVersion {
                        package: manifest.id.clone(),
                        version: app_version.to_string(),
                    }
                })?;
                (section, true)
            }
        };
        info!(
            "Uninstalling {} {} (install #{})",
            manifest.name, record.version, record.id_install
        );

        let themes: Vec<ThemeRoot> = self
            .themes
            .iter()
            .filter(|t| record.themes.contains(&t.id))
            .cloned()
            .collect();

        let report = self.apply_section(
            section,
            &package_root,
            &themes,
            EngineOptions {
                undo,
                snapshot: options.snapshot,
                dry_run: false,
            },
        )?;
        self.commit()?;

        db::transaction(self.conn, |tx| {
            InstalledPackage::mark_uninstalled(tx, package_id, record.id_install, &options.actor)
        })?;

        Ok(UninstallOutcome {
            report,
            persistence_changes: record.db_changes,
        })
    }

    /// Flush pending writes, dropping them if any target stays unwritable
    fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.fs.flush() {
            self.fs.discard();
            return Err(e);
        }
        Ok(())
    }

    /// Run a section, dropping every pending write when a step errors out
    fn apply_section(
        &mut self,
        section: &Section,
        package_root: &Path,
        themes: &[ThemeRoot],
        options: EngineOptions,
    ) -> Result<ModificationReport> {
        match self.run_section(section, package_root, themes, options) {
            Ok(report) => Ok(report),
            Err(e) => {
                let dropped = self.fs.discard();
                warn!("Section aborted ({}); dropped {} pending write(s)", e, dropped);
                Err(e)
            }
        }
    }

    fn run_section(
        &mut self,
        section: &Section,
        package_root: &Path,
        themes: &[ThemeRoot],
        options: EngineOptions,
    ) -> Result<ModificationReport> {
        let vars = self.vars.clone().with_package_dir(package_root);
        let mut log = SectionLog::new();

        for step in &section.steps {
            match step {
                InstallStep::Modification { path, reverse } => {
                    let document_path = package_root.join(path);
                    if !document_path.is_file() {
                        log.fail(Action::Missing {
                            filename: document_path,
                        });
                        continue;
                    }
                    let document =
                        ModificationDocument::from_xml(&self.fs.read_to_string(&document_path)?)?;
                    let report = ModificationEngine::new(&mut self.fs, &vars)
                        .with_themes(themes.to_vec())
                        .with_options(EngineOptions {
                            undo: options.undo != *reverse,
                            ..options
                        })
                        .apply(&document)?;
                    log.absorb(report);
                }
                InstallStep::RequireFile { from, destination } => {
                    let target = vars.resolve(destination)?.join(file_name(from)?);
                    if options.undo {
                        self.remove(&mut log, &target, false, options.dry_run);
                    } else {
                        self.require_file(&mut log, &package_root.join(from), &target, options.dry_run)?;
                    }
                }
                InstallStep::RequireDir { from, destination } => {
                    let target = vars.resolve(destination)?.join(file_name(from)?);
                    if options.undo {
                        self.remove(&mut log, &target, true, options.dry_run);
                    } else {
                        self.require_dir(&mut log, &package_root.join(from), &target, options.dry_run);
                    }
                }
                InstallStep::RemoveFile { path } if !options.undo => {
                    let target = vars.resolve(path)?;
                    self.remove(&mut log, &target, false, options.dry_run);
                }
                InstallStep::RemoveDir { path } if !options.undo => {
                    let target = vars.resolve(path)?;
                    self.remove(&mut log, &target, true, options.dry_run);
                }
                // Removals cannot be undone
                InstallStep::RemoveFile { .. } | InstallStep::RemoveDir { .. } => {}
            }
        }

        Ok(log.finish())
    }

    fn require_file(
        &mut self,
        log: &mut SectionLog,
        source: &Path,
        target: &Path,
        dry_run: bool,
    ) -> Result<()> {
        if !source.is_file() {
            log.fail(Action::Missing {
                filename: source.to_path_buf(),
            });
            return Ok(());
        }

        let data = std::fs::read(source)?;
        if !dry_run {
            if let Err(e) = self.fs.write_file(target, &data) {
                warn!("Copying {} failed: {}", source.display(), e);
                log.fail(not_writable(target));
                return Ok(());
            }
        }
        log.actions.push(Action::Saved {
            filename: target.to_path_buf(),
            sha256: format!("{:x}", Sha256::digest(&data)),
            theme: None,
        });
        Ok(())
    }

    fn require_dir(&mut self, log: &mut SectionLog, source: &Path, target: &Path, dry_run: bool) {
        if !source.is_dir() {
            log.fail(Action::Missing {
                filename: source.to_path_buf(),
            });
            return;
        }

        if !dry_run {
            if let Err(e) = self.fs.copy_tree(source, target) {
                warn!("Copying {} failed: {}", source.display(), e);
                log.fail(not_writable(target));
                return;
            }
        }
        log.actions.push(Action::Copied {
            filename: target.to_path_buf(),
        });
    }

    fn remove(&mut self, log: &mut SectionLog, target: &Path, is_dir: bool, dry_run: bool) {
        if !target.exists() {
            log.fail(Action::Missing {
                filename: target.to_path_buf(),
            });
            return;
        }

        if !dry_run {
            let result = if is_dir {
                self.fs.delete_tree(target, true)
            } else {
                self.fs.remove_file(target)
            };
            if let Err(e) = result {
                warn!("Removing {} failed: {}", target.display(), e);
                log.fail(not_writable(target));
                return;
            }
        }
        log.actions.push(Action::Removed {
            filename: target.to_path_buf(),
        });
    }
}

fn load_manifest(staging_dir: &Path) -> Result<(PackageManifest, PathBuf)> {
    let manifest_path = packages::find_manifest(staging_dir)?;
    let manifest = PackageManifest::from_file(&manifest_path)?;
    let package_root = manifest_path
        .parent()
        .unwrap_or(staging_dir)
        .to_path_buf();
    Ok((manifest, package_root))
}

fn file_name(path: &str) -> Result<&std::ffi::OsStr> {
    Path::new(path)
        .file_name()
        .ok_or_else(|| Error::MalformedDocument(format!("{} does not name a file", path)))
}

fn not_writable(target: &Path) -> Action {
    Action::Failure {
        filename: target.to_path_buf(),
        reason: FailureReason::NotWritable,
        search: String::new(),
        search_original: String::new(),
        replace_original: String::new(),
        theme: None,
    }
}
