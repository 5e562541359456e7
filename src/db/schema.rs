// src/db/schema.rs

//! Database schema definitions and migrations for Modsmith
//!
//! This module defines the SQLite schema for the install history and
//! provides a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// Creates the install history table. Rows are appended for every install
/// and upgrade and are never deleted; removal only flips `install_state`.
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE installed_packages (
            id_install INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id TEXT NOT NULL,
            version TEXT NOT NULL,
            filename TEXT NOT NULL,
            name TEXT NOT NULL,
            time_installed TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            member_installed TEXT NOT NULL,
            install_state TEXT NOT NULL DEFAULT 'installed'
                CHECK(install_state IN ('not-installed', 'installed', 'upgraded')),
            themes TEXT NOT NULL DEFAULT '',
            member_removed TEXT,
            time_removed TEXT
        );

        CREATE INDEX idx_installed_packages_package ON installed_packages(package_id);
        CREATE INDEX idx_installed_packages_state ON installed_packages(install_state);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Track what a package left behind
///
/// Adds JSON columns for the steps that failed during install and for the
/// database changes a later uninstall may reverse.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE installed_packages ADD COLUMN failed_steps TEXT NOT NULL DEFAULT '[]';
        ALTER TABLE installed_packages ADD COLUMN db_changes TEXT NOT NULL DEFAULT '[]';
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
