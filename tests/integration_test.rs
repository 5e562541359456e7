// tests/integration_test.rs

//! Integration tests for Modsmith
//!
//! These tests verify end-to-end functionality across modules.

use modsmith::db;
use modsmith::db::models::{InstallState, InstalledPackage, PersistenceChange};
use modsmith::document::ModificationDocument;
use modsmith::engine::{EngineOptions, ModificationEngine, ThemeRoot};
use modsmith::filesystem::PackageFs;
use modsmith::install::{InstallOptions, Installer};
use modsmith::packages;
use modsmith::paths::PathVars;
use modsmith::version;
use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const DISPLAY_XML: &str = r#"<?xml version="1.0"?>
<modification>
  <file name="$sourcedir/Display.php">
    <operation>
      <search position="replace"><![CDATA[bar();]]></search>
      <add><![CDATA[baz($context['id']);]]></add>
    </operation>
    <operation>
      <search position="before"><![CDATA[foo();]]></search>
      <add><![CDATA[pre();
]]></add>
    </operation>
  </file>
  <file name="$sourcedir/Optional.php" error="skip">
    <operation>
      <search position="replace"><![CDATA[a]]></search>
      <add><![CDATA[b]]></add>
    </operation>
  </file>
</modification>"#;

fn host() -> (tempfile::TempDir, PathVars) {
    let temp_dir = tempfile::tempdir().unwrap();
    let vars = PathVars::from_root(temp_dir.path().join("forum"));
    fs::create_dir_all(&vars.source_dir).unwrap();
    fs::create_dir_all(&vars.theme_dir).unwrap();
    (temp_dir, vars)
}

fn apply(vars: &PathVars, xml: &str, options: EngineOptions) -> modsmith::engine::ModificationReport {
    let document = ModificationDocument::from_xml(xml).unwrap();
    let mut pfs = PackageFs::local();
    let report = ModificationEngine::new(&mut pfs, vars)
        .with_themes(ThemeRoot::scan(vars).unwrap())
        .with_options(options)
        .apply(&document)
        .unwrap();
    if options.dry_run {
        pfs.discard();
    } else {
        pfs.flush().unwrap();
    }
    report
}

#[test]
fn test_database_lifecycle() {
    // Create a temporary database
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    // Remove the temp file so init can create it
    drop(temp_file);

    assert!(matches!(
        db::open(&db_path),
        Err(modsmith::Error::DatabaseNotFound(_))
    ));

    db::init(&db_path).unwrap();
    assert!(Path::new(&db_path).exists());

    let conn = db::open(&db_path).unwrap();
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal");
    assert!(InstalledPackage::list_installed(&conn).unwrap().is_empty());
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested/path/to/modsmith.db")
        .to_str()
        .unwrap()
        .to_string();

    db::init(&db_path).unwrap();
    assert!(Path::new(&db_path).exists());
}

#[test]
fn test_xml_document_apply_dry_run_and_undo() {
    let (_temp, vars) = host();
    let file = vars.source_dir.join("Display.php");
    let original = "<?php\nfoo();\nbar();\n";
    fs::write(&file, original).unwrap();

    let preview = apply(
        &vars,
        DISPLAY_XML,
        EngineOptions {
            dry_run: true,
            ..Default::default()
        },
    );
    assert!(preview.status());
    assert_eq!(fs::read_to_string(&file).unwrap(), original);
    assert_eq!(preview.count("skipping"), 1);

    let report = apply(&vars, DISPLAY_XML, EngineOptions::default());
    assert!(report.status());
    assert_eq!(report.count("replace"), 2);
    assert_eq!(
        fs::read_to_string(&file).unwrap(),
        "<?php\npre();\nfoo();\nbaz($context['id']);\n"
    );

    let undo = apply(
        &vars,
        DISPLAY_XML,
        EngineOptions {
            undo: true,
            ..Default::default()
        },
    );
    assert!(undo.status());
    assert_eq!(fs::read_to_string(&file).unwrap(), original);

    let json = serde_json::to_value(&undo).unwrap();
    assert_eq!(json["actions"][0]["type"], "opened");
}

#[test]
fn test_theme_fan_out_from_xml() {
    let (_temp, vars) = host();
    let dark = vars.themes_dir.join("dark");
    fs::create_dir_all(&dark).unwrap();
    fs::write(vars.theme_dir.join("index.template.php"), "<body>\n</body>").unwrap();
    fs::write(dark.join("index.template.php"), "<body>\n</body>").unwrap();

    let xml = r#"<modification>
  <file name="$themedir/index.template.php">
    <operation>
      <search position="after"><![CDATA[<body>]]></search>
      <add><![CDATA[<div id="shoutbox"></div>]]></add>
    </operation>
  </file>
</modification>"#;
    let report = apply(&vars, xml, EngineOptions::default());

    assert!(report.status());
    assert_eq!(report.themes(), vec![2]);
    for root in [&vars.theme_dir, &dark] {
        assert_eq!(
            fs::read_to_string(root.join("index.template.php")).unwrap(),
            "<body><div id=\"shoutbox\"></div>\n</body>"
        );
    }
}

#[test]
fn test_failing_document_reports_every_problem() {
    let (_temp, vars) = host();
    fs::write(vars.source_dir.join("Display.php"), "<?php\nfoo();\n").unwrap();

    let report = apply(&vars, DISPLAY_XML, EngineOptions::default());
    assert!(!report.status());

    let steps = report.failed_steps();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].contains("bar();"));
    // The sibling operation still ran
    assert_eq!(
        fs::read_to_string(vars.source_dir.join("Display.php")).unwrap(),
        "<?php\npre();\nfoo();\n"
    );
}

fn package_zip(path: &Path, version: &str) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();

    let entries = [
        (
            "shoutbox/package-info.xml",
            format!(
                r#"<?xml version="1.0"?>
<package-info>
  <id>author:shoutbox</id>
  <name>Shoutbox</name>
  <version>{}</version>
  <install for="2.0 - 2.0.99, 2.1 RC*">
    <modification>install.xml</modification>
    <require-file name="Shoutbox.php" destination="$sourcedir" />
  </install>
  <uninstall for="2.0 - 2.0.99, 2.1 RC*">
    <modification reverse="true">install.xml</modification>
    <remove-file name="$sourcedir/Shoutbox.php" />
  </uninstall>
</package-info>"#,
                version
            ),
        ),
        (
            "shoutbox/install.xml",
            r#"<modification>
  <file name="$sourcedir/Display.php">
    <operation>
      <search position="before"><![CDATA[foo();]]></search>
      <add><![CDATA[shoutbox();
]]></add>
    </operation>
  </file>
</modification>"#
                .to_string(),
        ),
        ("shoutbox/Shoutbox.php", "<?php\nfunction shoutbox() {}\n".to_string()),
    ];

    for (name, content) in entries {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_install_and_uninstall_from_archive() {
    let (temp, vars) = host();
    let display = vars.source_dir.join("Display.php");
    fs::write(&display, "<?php\nfoo();\n").unwrap();

    let db_path = temp.path().join("modsmith.db").to_str().unwrap().to_string();
    db::init(&db_path).unwrap();
    let mut conn = db::open(&db_path).unwrap();

    let archive = temp.path().join("shoutbox_1-0.zip");
    package_zip(&archive, "1.0");

    // Install
    let staging = tempfile::tempdir().unwrap();
    let mut pfs = PackageFs::local();
    pfs.exclude(staging.path());
    packages::extract_file(&mut pfs, &archive, staging.path()).unwrap();

    let options = InstallOptions {
        archive_name: Some("shoutbox_1-0.zip".to_string()),
        persistence_changes: vec![PersistenceChange::RemoveTable {
            name: "shoutbox".to_string(),
        }],
        ..Default::default()
    };
    let outcome = Installer::new(&mut conn, pfs, vars.clone())
        .install(staging.path(), "2.1 RC2", &options)
        .unwrap();

    assert!(outcome.report.status());
    assert!(outcome.install_id.is_some());
    assert_eq!(
        fs::read_to_string(&display).unwrap(),
        "<?php\nshoutbox();\nfoo();\n"
    );
    assert!(vars.source_dir.join("Shoutbox.php").exists());
    assert_eq!(
        InstalledPackage::dependency_version(&conn, "author:shoutbox").unwrap(),
        Some("1.0".to_string())
    );

    // Uninstall through the explicit uninstall section
    let outcome = Installer::new(&mut conn, PackageFs::local(), vars.clone())
        .uninstall(staging.path(), "author:shoutbox", "2.1 RC2", &InstallOptions::default())
        .unwrap();

    assert!(outcome.report.status());
    assert_eq!(fs::read_to_string(&display).unwrap(), "<?php\nfoo();\n");
    assert!(!vars.source_dir.join("Shoutbox.php").exists());
    assert_eq!(
        outcome.persistence_changes,
        vec![PersistenceChange::RemoveTable {
            name: "shoutbox".to_string()
        }]
    );

    let history = InstalledPackage::history(&conn, "author:shoutbox").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].install_state, InstallState::NotInstalled);
    assert_eq!(history[0].filename, "shoutbox_1-0.zip");
    assert!(history[0].time_removed.is_some());
    assert!(InstalledPackage::list_installed(&conn).unwrap().is_empty());
}

#[test]
fn test_version_resolution() {
    assert_eq!(version::compare("2.0", "2.0.0"), Ordering::Equal);
    assert_eq!(version::compare("2.1 RC2", "2.1"), Ordering::Less);
    assert_eq!(version::compare("2.0.10", "2.0.9"), Ordering::Greater);

    assert!(version::satisfies("2.0.4", "2.0 - 2.0.99"));
    assert!(version::satisfies("2.1 RC2", "2.0 - 2.0.99, 2.1 RC*"));
    assert!(!version::satisfies("2.2", "2.0 - 2.0.99, 2.1 RC*"));
    assert!(version::satisfies("anything", "all"));
}
