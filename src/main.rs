// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use modsmith::db::models::InstalledPackage;
use modsmith::document::ModificationDocument;
use modsmith::engine::{Action, EngineOptions, ModificationEngine, ModificationReport, ThemeRoot};
use modsmith::filesystem::PackageFs;
use modsmith::install::{InstallOptions, Installer};
use modsmith::paths::PathVars;
use modsmith::{db, packages, version};
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory below the host root where installed archives are kept
const PACKAGES_DIR: &str = "Packages";

#[derive(Parser)]
#[command(name = "modsmith")]
#[command(author, version, about = "Package modification engine with undo, theme fan-out and install history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Host application layout
#[derive(Args, Clone)]
struct HostArgs {
    /// Host application root directory
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
    /// Default theme directory (default: <root>/Themes/default)
    #[arg(short, long)]
    theme: Option<PathBuf>,
}

impl HostArgs {
    fn vars(&self) -> PathVars {
        let mut vars = PathVars::from_root(&self.root);
        if let Some(theme) = &self.theme {
            vars.images_dir = theme.join("images");
            vars.language_dir = theme.join("languages");
            vars.theme_dir = theme.clone();
        }
        vars
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Modsmith database
    Init {
        /// Database path (default: /var/lib/modsmith/modsmith.db)
        #[arg(short, long, default_value = db::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Apply a modification document to the host tree
    Apply {
        /// Path to the modification XML
        document: PathBuf,
        #[command(flatten)]
        host: HostArgs,
        /// Reverse the document instead of applying it
        #[arg(long)]
        undo: bool,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Keep a `<file>~` copy of every overwritten file
        #[arg(long)]
        backup: bool,
        /// Print the action log as JSON
        #[arg(long)]
        json: bool,
    },
    /// Install or upgrade a package archive (tar.gz or zip)
    Install {
        /// Path to the package archive
        archive: PathBuf,
        #[command(flatten)]
        host: HostArgs,
        /// Database path (default: /var/lib/modsmith/modsmith.db)
        #[arg(short, long, default_value = db::DEFAULT_DB_PATH)]
        db_path: String,
        /// Host application version
        #[arg(short, long)]
        app_version: String,
        /// Apply even when the dry run reports failures
        #[arg(short, long)]
        force: bool,
        /// Keep a `<file>~` copy of every overwritten file
        #[arg(long)]
        backup: bool,
        /// Name recorded as the installing member
        #[arg(long, default_value = "modsmith")]
        actor: String,
    },
    /// Uninstall an installed package
    Uninstall {
        /// Package id, e.g. author:package
        package_id: String,
        #[command(flatten)]
        host: HostArgs,
        /// Database path (default: /var/lib/modsmith/modsmith.db)
        #[arg(short, long, default_value = db::DEFAULT_DB_PATH)]
        db_path: String,
        /// Host application version
        #[arg(short, long)]
        app_version: String,
        /// Package archive (default: the archive kept at install time)
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Name recorded as the removing member
        #[arg(long, default_value = "modsmith")]
        actor: String,
    },
    /// List installed packages
    List {
        /// Database path (default: /var/lib/modsmith/modsmith.db)
        #[arg(short, long, default_value = db::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show every install record of a package
    History {
        /// Package id
        package_id: String,
        /// Database path (default: /var/lib/modsmith/modsmith.db)
        #[arg(short, long, default_value = db::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Check a version against a version expression
    Check {
        /// Version, e.g. 2.0.4
        candidate: String,
        /// Expression, e.g. "2.0 - 2.0.99, 2.1 RC*"
        expression: String,
    },
}

fn print_report(report: &ModificationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for action in &report.actions {
        match action {
            Action::Result { status } => {
                println!("{}", if *status { "Result: success" } else { "Result: FAILED" });
            }
            Action::Failure {
                filename, reason, search_original, ..
            } => {
                println!(
                    "  failure    {} ({:?}): {}",
                    filename.display(),
                    reason,
                    search_original.lines().next().unwrap_or("")
                );
            }
            other => {
                if let Some(filename) = other.filename() {
                    println!("  {:<10} {}", other.kind(), filename.display());
                }
            }
        }
    }
    Ok(())
}

/// Keep a copy of the archive below `<root>/Packages` for later removal
fn keep_archive(root: &Path, archive: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{} is not a file", archive.display()))?;
    let packages_dir = root.join(PACKAGES_DIR);
    std::fs::create_dir_all(&packages_dir)
        .with_context(|| format!("creating {}", packages_dir.display()))?;

    let kept = packages_dir.join(name);
    if kept != archive {
        std::fs::copy(archive, &kept)
            .with_context(|| format!("copying {} to {}", archive.display(), kept.display()))?;
    }
    Ok(kept)
}

/// Unpack an archive into a fresh staging directory
fn stage(fs: &mut PackageFs, archive: &Path) -> Result<tempfile::TempDir> {
    let staging = tempfile::tempdir().context("creating staging directory")?;
    fs.exclude(staging.path());
    let files = packages::extract_file(fs, archive, staging.path())?;
    info!("Staged {} file(s) from {}", files.len(), archive.display());
    Ok(staging)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing Modsmith database at: {}", db_path);
            db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Apply {
            document,
            host,
            undo,
            dry_run,
            backup,
            json,
        }) => {
            let vars = host.vars();
            let themes = ThemeRoot::scan(&vars)?;
            let xml = std::fs::read_to_string(&document)
                .with_context(|| format!("reading {}", document.display()))?;
            let document = ModificationDocument::from_xml(&xml)?;

            let mut fs = PackageFs::local();
            let report = ModificationEngine::new(&mut fs, &vars)
                .with_themes(themes)
                .with_options(EngineOptions {
                    undo,
                    dry_run,
                    snapshot: backup,
                })
                .apply(&document)?;

            if dry_run {
                fs.discard();
            } else {
                let written = fs.flush()?;
                info!("Wrote {} file(s) via {} transport", written, fs.transport_name());
            }

            print_report(&report, json)?;
            if !report.status() {
                return Err(anyhow::anyhow!("modification finished with failures"));
            }
            Ok(())
        }
        Some(Commands::Install {
            archive,
            host,
            db_path,
            app_version,
            force,
            backup,
            actor,
        }) => {
            info!("Installing package: {}", archive.display());
            let vars = host.vars();
            let themes = ThemeRoot::scan(&vars)?;
            let mut conn = db::open(&db_path)?;

            let kept = keep_archive(&vars.root_dir, &archive)?;
            let mut fs = PackageFs::local();
            let staging = stage(&mut fs, &kept)?;

            let options = InstallOptions {
                force,
                snapshot: backup,
                actor,
                archive_name: kept
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string()),
                ..Default::default()
            };
            let outcome = Installer::new(&mut conn, fs, vars)
                .with_themes(themes)
                .install(staging.path(), &app_version, &options)?;

            print_report(&outcome.report, false)?;
            match outcome.install_id {
                Some(id) => {
                    println!(
                        "{} package: {} version {} (install #{})",
                        if outcome.is_upgrade { "Upgraded" } else { "Installed" },
                        outcome.package_id,
                        outcome.version,
                        id
                    );
                    Ok(())
                }
                None => Err(anyhow::anyhow!(
                    "dry run of {} failed; rerun with --force to apply anyway",
                    outcome.package_id
                )),
            }
        }
        Some(Commands::Uninstall {
            package_id,
            host,
            db_path,
            app_version,
            archive,
            actor,
        }) => {
            info!("Uninstalling package: {}", package_id);
            let vars = host.vars();
            let themes = ThemeRoot::scan(&vars)?;
            let mut conn = db::open(&db_path)?;

            let archive = match archive {
                Some(path) => path,
                None => {
                    let record = InstalledPackage::is_installed(&conn, &package_id, None)?
                        .ok_or_else(|| anyhow::anyhow!("Package '{}' is not installed", package_id))?;
                    vars.root_dir.join(PACKAGES_DIR).join(record.filename)
                }
            };

            let mut fs = PackageFs::local();
            let staging = stage(&mut fs, &archive)?;
            let options = InstallOptions {
                actor,
                ..Default::default()
            };
            let outcome = Installer::new(&mut conn, fs, vars)
                .with_themes(themes)
                .uninstall(staging.path(), &package_id, &app_version, &options)?;

            print_report(&outcome.report, false)?;
            for change in &outcome.persistence_changes {
                println!("  pending database change: {}", serde_json::to_string(change)?);
            }
            println!("Uninstalled package: {}", package_id);
            Ok(())
        }
        Some(Commands::List { db_path }) => {
            let conn = db::open(&db_path)?;
            let installed = InstalledPackage::list_installed(&conn)?;

            if installed.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for package in &installed {
                    println!(
                        "  {} {} [{}] ({})",
                        package.name,
                        package.version,
                        package.package_id,
                        package.install_state.as_str()
                    );
                    if !package.failed_steps.is_empty() {
                        println!("    {} step(s) failed at install", package.failed_steps.len());
                    }
                }
                println!("\nTotal: {} package(s)", installed.len());
            }
            Ok(())
        }
        Some(Commands::History { package_id, db_path }) => {
            let conn = db::open(&db_path)?;
            let records = InstalledPackage::history(&conn, &package_id)?;

            if records.is_empty() {
                println!("No history for {}.", package_id);
            } else {
                println!("History of {}:", package_id);
                for record in &records {
                    print!(
                        "  [{}] {} {} by {} at {}",
                        record.id_install,
                        record.install_state.as_str(),
                        record.version,
                        record.member_installed,
                        record.time_installed
                    );
                    if let (Some(by), Some(at)) = (&record.member_removed, &record.time_removed) {
                        print!(", removed by {} at {}", by, at);
                    }
                    println!();
                }
            }
            Ok(())
        }
        Some(Commands::Check {
            candidate,
            expression,
        }) => {
            if version::satisfies(&candidate, &expression) {
                println!("{} satisfies {}", candidate, expression);
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} does not satisfy {}", candidate, expression))
            }
        }
        None => {
            // No command provided, show help
            println!("Modsmith v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'modsmith --help' for usage information");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_theme_flag_moves_theme_dirs() {
        let host = HostArgs {
            root: PathBuf::from("/srv/forum"),
            theme: Some(PathBuf::from("/srv/themes/dark")),
        };
        let vars = host.vars();
        assert_eq!(vars.source_dir, PathBuf::from("/srv/forum/Sources"));
        assert_eq!(vars.theme_dir, PathBuf::from("/srv/themes/dark"));
        assert_eq!(vars.language_dir, PathBuf::from("/srv/themes/dark/languages"));
    }

    #[test]
    fn test_keep_archive_copies_into_packages_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = temp_dir.path().join("shoutbox.zip");
        std::fs::write(&archive, b"PK\x03\x04").unwrap();
        let root = temp_dir.path().join("forum");

        let kept = keep_archive(&root, &archive).unwrap();
        assert_eq!(kept, root.join("Packages/shoutbox.zip"));
        assert!(kept.exists());
        assert_eq!(keep_archive(&root, &kept).unwrap(), kept);
    }
}
