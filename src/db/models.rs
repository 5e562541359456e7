// src/db/models.rs

//! Data models for Modsmith database entities
//!
//! `InstalledPackage` is one row of the install history. Rows are appended
//! for every install and upgrade; removal flips the state instead of
//! deleting, so the full lifecycle of a package stays queryable.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

const COLUMNS: &str = "id_install, package_id, version, filename, name, time_installed, \
     member_installed, install_state, themes, failed_steps, db_changes, member_removed, time_removed";

/// Lifecycle state of one install record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallState {
    NotInstalled,
    Installed,
    Upgraded,
}

impl InstallState {
    pub fn as_str(&self) -> &str {
        match self {
            InstallState::NotInstalled => "not-installed",
            InstallState::Installed => "installed",
            InstallState::Upgraded => "upgraded",
        }
    }
}

impl FromStr for InstallState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not-installed" => Ok(InstallState::NotInstalled),
            "installed" => Ok(InstallState::Installed),
            "upgraded" => Ok(InstallState::Upgraded),
            _ => Err(format!("Invalid install state: {}", s)),
        }
    }
}

/// A database change made by a package that uninstall may reverse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistenceChange {
    RemoveTable { name: String },
    RemoveColumn { table: String, column: String },
    RemoveIndex { table: String, index: String },
    RemoveSetting { name: String },
}

/// Identity of a package being recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub package_id: String,
    pub name: String,
    pub version: String,
    /// Archive the package was installed from
    pub filename: String,
    /// Who performed the install
    pub actor: String,
}

/// One install or upgrade event
#[derive(Debug, Clone, Serialize)]
pub struct InstalledPackage {
    pub id_install: i64,
    pub package_id: String,
    pub version: String,
    pub filename: String,
    pub name: String,
    pub time_installed: String,
    pub member_installed: String,
    pub install_state: InstallState,
    pub themes: Vec<i64>,
    pub failed_steps: Vec<String>,
    pub db_changes: Vec<PersistenceChange>,
    pub member_removed: Option<String>,
    pub time_removed: Option<String>,
}

impl InstalledPackage {
    /// The authoritative record for `package_id`, optionally pinned to one install
    pub fn is_installed(
        conn: &Connection,
        package_id: &str,
        install_id: Option<i64>,
    ) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {} FROM installed_packages
             WHERE package_id = ?1 AND install_state != 'not-installed'
               AND (?2 IS NULL OR id_install = ?2)
             ORDER BY id_install DESC LIMIT 1",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let record = stmt
            .query_row(params![package_id, install_id], Self::from_row)
            .optional()?;
        Ok(record)
    }

    /// Append a record for a finished install or upgrade
    ///
    /// On upgrade every earlier active record of the package is retired so
    /// the new one stays authoritative after a later removal.
    pub fn record_install(
        conn: &Connection,
        info: &PackageInfo,
        failed_steps: &[String],
        themes: &[i64],
        persistence_changes: &[PersistenceChange],
        is_upgrade: bool,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();

        if is_upgrade {
            let retired = conn.execute(
                "UPDATE installed_packages
                 SET install_state = 'not-installed', member_removed = ?2, time_removed = ?3
                 WHERE package_id = ?1 AND install_state != 'not-installed'",
                params![&info.package_id, &info.actor, &now],
            )?;
            debug!("Retired {} earlier record(s) of {}", retired, info.package_id);
        }

        let state = if is_upgrade {
            InstallState::Upgraded
        } else {
            InstallState::Installed
        };
        let themes = themes
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");

        conn.execute(
            "INSERT INTO installed_packages
                (package_id, version, filename, name, time_installed, member_installed,
                 install_state, themes, failed_steps, db_changes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &info.package_id,
                &info.version,
                &info.filename,
                &info.name,
                &now,
                &info.actor,
                state.as_str(),
                themes,
                serde_json::to_string(failed_steps)?,
                serde_json::to_string(persistence_changes)?,
            ],
        )?;

        let id = conn.last_insert_rowid();
        info!(
            "Recorded {} {} of {} (install #{})",
            state.as_str(),
            info.version,
            info.package_id,
            id
        );
        Ok(id)
    }

    /// Flip one install record to `not-installed`
    pub fn mark_uninstalled(
        conn: &Connection,
        package_id: &str,
        install_id: i64,
        actor: &str,
    ) -> Result<()> {
        let changed = conn.execute(
            "UPDATE installed_packages
             SET install_state = 'not-installed', member_removed = ?3, time_removed = ?4
             WHERE package_id = ?1 AND id_install = ?2 AND install_state != 'not-installed'",
            params![package_id, install_id, actor, chrono::Utc::now().to_rfc3339()],
        )?;

        if changed == 0 {
            return Err(Error::NotInstalled(package_id.to_string()));
        }
        info!("Marked install #{} of {} as removed", install_id, package_id);
        Ok(())
    }

    /// Installed version of `package_id`, if any
    pub fn dependency_version(conn: &Connection, package_id: &str) -> Result<Option<String>> {
        Ok(Self::is_installed(conn, package_id, None)?.map(|p| p.version))
    }

    /// Every record of `package_id`, newest first
    pub fn history(conn: &Connection, package_id: &str) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM installed_packages WHERE package_id = ?1 ORDER BY id_install DESC",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The authoritative record of every installed package
    pub fn list_installed(conn: &Connection) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM installed_packages p
             WHERE install_state != 'not-installed'
               AND id_install = (
                   SELECT MAX(q.id_install) FROM installed_packages q
                   WHERE q.package_id = p.package_id AND q.install_state != 'not-installed'
               )
             ORDER BY name, package_id",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let invalid = |index: usize, e: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, e)
        };

        let state_str: String = row.get(7)?;
        let install_state = state_str.parse::<InstallState>().map_err(|e| {
            invalid(
                7,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        let themes_str: String = row.get(8)?;
        let themes = themes_str
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| t.trim().parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid(8, Box::new(e)))?;

        let steps_str: String = row.get(9)?;
        let failed_steps = serde_json::from_str(&steps_str).map_err(|e| invalid(9, Box::new(e)))?;

        let changes_str: String = row.get(10)?;
        let db_changes =
            serde_json::from_str(&changes_str).map_err(|e| invalid(10, Box::new(e)))?;

        Ok(Self {
            id_install: row.get(0)?,
            package_id: row.get(1)?,
            version: row.get(2)?,
            filename: row.get(3)?,
            name: row.get(4)?,
            time_installed: row.get(5)?,
            member_installed: row.get(6)?,
            install_state,
            themes,
            failed_steps,
            db_changes,
            member_removed: row.get(11)?,
            time_removed: row.get(12)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn info(version: &str) -> PackageInfo {
        PackageInfo {
            package_id: "author:shoutbox".to_string(),
            name: "Shoutbox".to_string(),
            version: version.to_string(),
            filename: format!("shoutbox_{}.zip", version),
            actor: "admin".to_string(),
        }
    }

    #[test]
    fn test_record_and_find() {
        let (_temp, conn) = create_test_db();

        let changes = vec![
            PersistenceChange::RemoveTable {
                name: "shouts".to_string(),
            },
            PersistenceChange::RemoveSetting {
                name: "shoutbox_enabled".to_string(),
            },
        ];
        let id = InstalledPackage::record_install(
            &conn,
            &info("1.0"),
            &["Missing file: /x.php".to_string()],
            &[2, 3],
            &changes,
            false,
        )
        .unwrap();
        assert!(id > 0);

        let found = InstalledPackage::is_installed(&conn, "author:shoutbox", None)
            .unwrap()
            .unwrap();
        assert_eq!(found.id_install, id);
        assert_eq!(found.install_state, InstallState::Installed);
        assert_eq!(found.themes, vec![2, 3]);
        assert_eq!(found.failed_steps, vec!["Missing file: /x.php".to_string()]);
        assert_eq!(found.db_changes, changes);
        assert_eq!(found.member_installed, "admin");
        assert!(found.member_removed.is_none());

        assert!(
            InstalledPackage::is_installed(&conn, "author:shoutbox", Some(id + 1))
                .unwrap()
                .is_none()
        );
        assert_eq!(
            InstalledPackage::dependency_version(&conn, "author:shoutbox").unwrap(),
            Some("1.0".to_string())
        );
    }

    #[test]
    fn test_uninstall_keeps_history() {
        let (_temp, conn) = create_test_db();
        let id =
            InstalledPackage::record_install(&conn, &info("1.0"), &[], &[], &[], false).unwrap();

        InstalledPackage::mark_uninstalled(&conn, "author:shoutbox", id, "root").unwrap();

        assert!(
            InstalledPackage::is_installed(&conn, "author:shoutbox", None)
                .unwrap()
                .is_none()
        );
        let history = InstalledPackage::history(&conn, "author:shoutbox").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].install_state, InstallState::NotInstalled);
        assert_eq!(history[0].member_removed.as_deref(), Some("root"));
        assert!(history[0].time_removed.is_some());

        // Second removal of the same record is refused
        let again = InstalledPackage::mark_uninstalled(&conn, "author:shoutbox", id, "root");
        assert!(matches!(again, Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_upgrade_supersedes_earlier_record() {
        let (_temp, conn) = create_test_db();
        let first =
            InstalledPackage::record_install(&conn, &info("1.0"), &[], &[], &[], false).unwrap();
        let second =
            InstalledPackage::record_install(&conn, &info("1.1"), &[], &[], &[], true).unwrap();

        let current = InstalledPackage::is_installed(&conn, "author:shoutbox", None)
            .unwrap()
            .unwrap();
        assert_eq!(current.id_install, second);
        assert_eq!(current.install_state, InstallState::Upgraded);

        let history = InstalledPackage::history(&conn, "author:shoutbox").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id_install, first);
        assert_eq!(history[1].install_state, InstallState::NotInstalled);

        InstalledPackage::mark_uninstalled(&conn, "author:shoutbox", second, "admin").unwrap();
        assert!(
            InstalledPackage::dependency_version(&conn, "author:shoutbox")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_list_installed_one_per_package() {
        let (_temp, conn) = create_test_db();
        InstalledPackage::record_install(&conn, &info("1.0"), &[], &[], &[], false).unwrap();
        InstalledPackage::record_install(&conn, &info("1.1"), &[], &[], &[], true).unwrap();

        let mut other = info("2.0");
        other.package_id = "author:arcade".to_string();
        other.name = "Arcade".to_string();
        let arcade =
            InstalledPackage::record_install(&conn, &other, &[], &[], &[], false).unwrap();

        let installed = InstalledPackage::list_installed(&conn).unwrap();
        let summary: Vec<_> = installed
            .iter()
            .map(|p| (p.name.as_str(), p.version.as_str()))
            .collect();
        assert_eq!(summary, vec![("Arcade", "2.0"), ("Shoutbox", "1.1")]);

        InstalledPackage::mark_uninstalled(&conn, "author:arcade", arcade, "admin").unwrap();
        assert_eq!(InstalledPackage::list_installed(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_change_json_shape() {
        let change = PersistenceChange::RemoveColumn {
            table: "members".to_string(),
            column: "shout_count".to_string(),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(
            json,
            r#"{"type":"remove_column","table":"members","column":"shout_count"}"#
        );
    }
}
