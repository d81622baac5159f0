//! Persistent icon store implementation
//!
//! A single-table SQLite store keyed by (component identity, profile
//! serial). The schema version folds the requested icon pixel size into
//! `PRAGMA user_version`, so a density or size change opens a logically
//! different store and implicitly invalidates old rows without any
//! migration logic.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::types::{ComponentKey, ComponentName, UserHandle};

/// Bumped whenever the row layout changes; folded into the schema version
/// together with the icon pixel size.
const RELEASE_VERSION: i32 = 2;

/// Wait this long on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Columns fetched when only label, color and flags are needed.
const COLUMNS_LOW_RES: &str = "componentName, profileId, label, icon_color, flags";

/// Full column set: adds the blobs and the freshness fingerprint.
const COLUMNS_HIGH_RES: &str =
    "componentName, profileId, label, icon_color, flags, icon, mono_icon, freshness_id";

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS icons (
    componentName TEXT NOT NULL,
    profileId INTEGER NOT NULL,
    freshness_id TEXT,
    icon BLOB,
    mono_icon BLOB,
    icon_color INTEGER NOT NULL DEFAULT 0,
    flags INTEGER NOT NULL DEFAULT 0,
    label TEXT,
    PRIMARY KEY (componentName, profileId)
);
";

/// One persisted row, as read back from the store.
///
/// The blob fields and the fingerprint are `None` when the row was read
/// through the low-resolution column set.
#[derive(Debug, Clone)]
pub struct StoreRow {
    pub component: ComponentName,
    pub user: UserHandle,
    pub label: Option<String>,
    pub color: u32,
    pub flags: u32,
    pub icon: Option<Vec<u8>>,
    pub mono: Option<Vec<u8>>,
    pub freshness_id: Option<String>,
}

/// Reconciliation snapshot of a row. The component identity is kept in
/// its raw serialized form so malformed legacy rows can be detected and
/// pruned instead of erroring.
#[derive(Debug, Clone)]
pub struct UpdateRow {
    pub rowid: i64,
    pub component: String,
    pub user: UserHandle,
    pub freshness_id: Option<String>,
}

/// Durable key/value store for rendered icons
pub struct IconStore {
    conn: Connection,
}

impl IconStore {
    /// Open (or create) the store described by `config`.
    ///
    /// An unopenable database file degrades to an in-memory store so that
    /// lookups keep working; the failure is logged, not propagated.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let conn = match &config.db_path {
            Some(path) => match open_file(path) {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!(
                        "icon store at {:?} failed to open: {}, using an in-memory store",
                        path,
                        e
                    );
                    Connection::open_in_memory()?
                }
            },
            None => Connection::open_in_memory()?,
        };

        let store = Self { conn };
        store.init_schema(schema_version(config.icon_pixel_size))?;
        Ok(store)
    }

    fn init_schema(&self, version: i32) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;

        let current: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current != version {
            if current != 0 {
                log::info!(
                    "icon store version changed ({} -> {}), dropping cached rows",
                    current,
                    version
                );
            }
            self.conn.execute_batch("DROP TABLE IF EXISTS icons;")?;
            self.conn.pragma_update(None, "user_version", version)?;
        }
        self.conn.execute_batch(CREATE_TABLE)?;
        Ok(())
    }

    /// Fetch the row for a key, selecting the low- or high-resolution
    /// column set.
    pub fn get(&self, key: &ComponentKey, low_res: bool) -> Result<Option<StoreRow>> {
        let columns = if low_res {
            COLUMNS_LOW_RES
        } else {
            COLUMNS_HIGH_RES
        };
        let sql =
            format!("SELECT {columns} FROM icons WHERE componentName = ?1 AND profileId = ?2");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let row = stmt
            .query_row(
                params![key.component.flatten(), key.user.serial()],
                |row| {
                    Ok(StoreRow {
                        component: key.component.clone(),
                        user: key.user,
                        label: row.get(2)?,
                        color: row.get::<_, i64>(3)? as u32,
                        flags: row.get::<_, i64>(4)? as u32,
                        icon: if low_res { None } else { row.get(5)? },
                        mono: if low_res { None } else { row.get(6)? },
                        freshness_id: if low_res { None } else { row.get(7)? },
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the row for `(row.component, row.user)`.
    pub fn insert_or_replace(&self, row: &StoreRow) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO icons \
             (componentName, profileId, freshness_id, icon, mono_icon, icon_color, flags, label) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(params![
            row.component.flatten(),
            row.user.serial(),
            row.freshness_id,
            row.icon,
            row.mono,
            row.color as i64,
            row.flags as i64,
            row.label,
        ])?;
        Ok(())
    }

    /// Stream a reconciliation snapshot of every row for one user.
    pub fn update_rows_for_user(&self, user: UserHandle) -> Result<Vec<UpdateRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT rowid, componentName, freshness_id FROM icons WHERE profileId = ?1",
        )?;
        let rows = stmt
            .query_map(params![user.serial()], |row| {
                Ok(UpdateRow {
                    rowid: row.get(0)?,
                    component: row.get(1)?,
                    user,
                    freshness_id: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a batch of rows in a single statement.
    pub fn delete_rowids(&self, rowids: &[i64]) -> Result<usize> {
        if rowids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; rowids.len()].join(", ");
        let sql = format!("DELETE FROM icons WHERE rowid IN ({placeholders})");
        let deleted = self
            .conn
            .execute(&sql, params_from_iter(rowids.iter()))?;
        Ok(deleted)
    }

    /// Delete every row of a package for one user, including the
    /// synthetic package-level row.
    pub fn delete_package(&self, package: &str, user: UserHandle) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(
            "DELETE FROM icons WHERE componentName GLOB ?1 AND profileId = ?2",
        )?;
        let deleted = stmt.execute(params![format!("{package}/*"), user.serial()])?;
        Ok(deleted)
    }

    /// Drop every row.
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM icons", [])?;
        Ok(())
    }
}

fn open_file(path: &PathBuf) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        // Ignored: a failed mkdir surfaces as the open error below.
        let _ = std::fs::create_dir_all(parent);
    }
    Connection::open(path)
}

fn schema_version(icon_pixel_size: u32) -> i32 {
    (RELEASE_VERSION << 16) + icon_pixel_size as i32
}
