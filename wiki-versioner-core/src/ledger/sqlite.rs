use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::{sanitize_filename, Ledger, LedgerError};

/// Schema migrations, applied in order and recorded in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_export_tracking",
        r#"
        CREATE TABLE exported_page_versions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          page_id TEXT NOT NULL,
          version_number INTEGER NOT NULL,
          page_title TEXT,
          export_format TEXT,
          exported_at TEXT,
          CONSTRAINT uq_page_version_format UNIQUE (page_id, version_number, export_format)
        );

        CREATE TABLE exported_attachments (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          page_id TEXT NOT NULL,
          attachment_id TEXT NOT NULL,
          attachment_title TEXT,
          attachment_version INTEGER,
          exported_at TEXT,
          CONSTRAINT uq_page_attachment UNIQUE (page_id, attachment_id)
        );
        "#,
    ),
    (
        "002_add_committed_flags",
        r#"
        ALTER TABLE exported_page_versions ADD COLUMN committed_to_git BOOLEAN DEFAULT 0;
        ALTER TABLE exported_page_versions ADD COLUMN committed_at TEXT;
        ALTER TABLE exported_attachments ADD COLUMN committed_to_git BOOLEAN DEFAULT 0;
        ALTER TABLE exported_attachments ADD COLUMN committed_at TEXT;

        CREATE TABLE committed_files (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          source_path TEXT NOT NULL UNIQUE,
          committed_at TEXT
        );
        "#,
    ),
];

enum Location {
    Memory,
    File(PathBuf),
}

fn parse_database_url(database_url: &str) -> Result<Location, LedgerError> {
    let url = database_url.trim();
    if url == "sqlite::memory:" || url == ":memory:" {
        return Ok(Location::Memory);
    }
    let path = if let Some(rest) = url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite:") {
        rest
    } else if url.contains("://") || url.is_empty() {
        return Err(LedgerError::UnsupportedUrl(database_url.to_string()));
    } else {
        url
    };
    Ok(Location::File(PathBuf::from(path)))
}

/// Open the ledger named by a connection string.
///
/// Accepts `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:` and bare
/// file paths. Other schemes are rejected.
pub fn open_ledger(database_url: &str) -> Result<SqliteLedger, LedgerError> {
    match parse_database_url(database_url)? {
        Location::Memory => SqliteLedger::open_in_memory(),
        Location::File(path) => SqliteLedger::open(&path),
    }
}

/// Like [`open_ledger`], but never touches the filesystem: see
/// [`SqliteLedger::open_read_only`].
pub fn open_ledger_read_only(database_url: &str) -> Result<SqliteLedger, LedgerError> {
    match parse_database_url(database_url)? {
        Location::Memory => SqliteLedger::open_in_memory(),
        Location::File(path) => SqliteLedger::open_read_only(&path),
    }
}

/// Ledger backed by a SQLite database file.
#[derive(Debug)]
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(db_path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        info!(path = %db_path.display(), "Opened ledger database");
        Self::from_connection(conn)
    }

    /// Opens an existing database without creating or migrating it.
    ///
    /// A missing file, or one whose schema is behind the current migrations,
    /// holds no commit records and is served as an empty in-memory ledger.
    /// Any write through a read-only connection fails.
    pub fn open_read_only(db_path: &Path) -> Result<Self, LedgerError> {
        if !db_path.is_file() {
            info!(
                path = %db_path.display(),
                "Ledger database not found, using an empty ledger"
            );
            return Self::open_in_memory();
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        if has_pending_migrations(&conn)? {
            info!(
                path = %db_path.display(),
                "Ledger schema is not current, using an empty ledger"
            );
            return Self::open_in_memory();
        }
        info!(path = %db_path.display(), "Opened ledger database read-only");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, LedgerError> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    pub fn is_version_committed(
        &self,
        page_id: &str,
        version_number: i64,
        format: &str,
    ) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let flag: Option<bool> = conn
            .query_row(
                r#"
                SELECT COALESCE(committed_to_git, 0) FROM exported_page_versions
                WHERE page_id = ?1 AND version_number = ?2 AND export_format = ?3
                "#,
                params![page_id, version_number, format],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    pub fn is_attachment_committed(
        &self,
        page_id: &str,
        attachment_id: &str,
    ) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let flag: Option<bool> = conn
            .query_row(
                r#"
                SELECT COALESCE(committed_to_git, 0) FROM exported_attachments
                WHERE page_id = ?1 AND attachment_id = ?2
                "#,
                params![page_id, attachment_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }
}

fn has_pending_migrations(conn: &Connection) -> Result<bool, LedgerError> {
    let tracked = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !tracked {
        return Ok(true);
    }
    for (version, _) in MIGRATIONS {
        let applied = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1",
                params![version],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !applied {
            return Ok(true);
        }
    }
    Ok(false)
}

fn migrate(conn: &mut Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
          version TEXT PRIMARY KEY,
          applied_at TEXT NOT NULL
        );
        "#,
    )?;
    for (version, sql) in MIGRATIONS {
        let tx = conn.transaction()?;
        let applied = tx
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1",
                params![version],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if applied {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!(migration = version, "Applied ledger migration");
    }
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl Ledger for SqliteLedger {
    fn is_file_committed(&self, source_path: &str) -> Result<bool, LedgerError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM committed_files WHERE source_path = ?1",
                params![source_path],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_file_committed(&self, source_path: &str) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO committed_files(source_path, committed_at) VALUES (?1, ?2)",
            params![source_path, now()],
        )?;
        Ok(())
    }

    fn mark_version_committed(
        &self,
        page_id: &str,
        version_number: i64,
        format: &str,
    ) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE exported_page_versions
            SET committed_to_git = 1, committed_at = ?4
            WHERE page_id = ?1 AND version_number = ?2 AND export_format = ?3
              AND COALESCE(committed_to_git, 0) = 0
            "#,
            params![page_id, version_number, format, now()],
        )?;
        debug!(page_id, version_number, format, updated, "mark_version_committed");
        Ok(())
    }

    fn mark_attachment_committed_by_filename(
        &self,
        page_id: &str,
        filename: &str,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let candidates: Vec<(i64, Option<String>)> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, attachment_title FROM exported_attachments
                WHERE page_id = ?1 AND COALESCE(committed_to_git, 0) = 0
                ORDER BY id
                "#,
            )?;
            let rows = stmt.query_map(params![page_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let collected = rows.collect::<Result<Vec<_>, _>>()?;
            collected
        };
        let matched = candidates
            .into_iter()
            .find(|(_, title)| sanitize_filename(title.as_deref().unwrap_or("")) == filename);
        if let Some((id, _)) = matched {
            tx.execute(
                "UPDATE exported_attachments SET committed_to_git = 1, committed_at = ?2 WHERE id = ?1",
                params![id, now()],
            )?;
            debug!(page_id, filename, id, "Attachment marked committed");
        }
        tx.commit()?;
        Ok(())
    }

    fn exported_versions(&self, page_id: &str, format: &str) -> Result<BTreeSet<i64>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT version_number FROM exported_page_versions WHERE page_id = ?1 AND export_format = ?2",
        )?;
        let rows = stmt.query_map(params![page_id, format], |row| row.get::<_, i64>(0))?;
        let versions = rows.collect::<Result<BTreeSet<i64>, _>>()?;
        Ok(versions)
    }

    fn mark_version_exported(
        &self,
        page_id: &str,
        version_number: i64,
        title: &str,
        format: &str,
    ) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO exported_page_versions
              (page_id, version_number, page_title, export_format, exported_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![page_id, version_number, title, format, now()],
        )?;
        Ok(())
    }

    fn exported_attachments(
        &self,
        page_id: &str,
    ) -> Result<BTreeMap<String, Option<i64>>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT attachment_id, attachment_version FROM exported_attachments WHERE page_id = ?1",
        )?;
        let rows = stmt.query_map(params![page_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
        })?;
        let attachments = rows.collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(attachments)
    }

    fn mark_attachment_exported(
        &self,
        page_id: &str,
        attachment_id: &str,
        title: &str,
        version: Option<i64>,
    ) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO exported_attachments
              (page_id, attachment_id, attachment_title, attachment_version, exported_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(page_id, attachment_id) DO UPDATE SET
              attachment_title = excluded.attachment_title,
              attachment_version = excluded.attachment_version,
              exported_at = excluded.exported_at
            "#,
            params![page_id, attachment_id, title, version, now()],
        )?;
        Ok(())
    }
}
