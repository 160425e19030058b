//! Owns the single SQLite connection and the write-serialization contract
//! the rest of the database layer builds on.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

use super::migrations;

pub struct DatabaseManager {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    /// Set while a backup restore is in progress; checked by the Job Tracker
    /// and the notebook upload flow to refuse new writes.
    restoring: AtomicBool,
}

impl DatabaseManager {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }

        let conn = Connection::open(&db_path).context("failed to open database")?;

        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("failed to enable foreign keys")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("failed to enable WAL mode")?;

        migrations::run_migrations(&conn).context("failed to run database migrations")?;

        if let Err(err) = run_integrity_check(&conn) {
            tracing::warn!(error = %err, "database integrity check failed at startup");
        }

        tracing::info!(path = %db_path.display(), "database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            restoring: AtomicBool::new(false),
        })
    }

    /// Execute a function with access to the database connection. All
    /// repository functions go through this, matching the single-writer
    /// contract from the concurrency model.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("failed to lock database connection: {e}"))?;
        f(&conn)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring.load(Ordering::SeqCst)
    }

    pub fn begin_restore(&self) -> bool {
        self.restoring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_restore(&self) {
        self.restoring.store(false, Ordering::SeqCst);
    }

    /// Replace the live connection's backing file with `backup_path`. Caller
    /// must hold `begin_restore()` for the duration.
    pub fn restore_from(&self, backup_path: &std::path::Path) -> Result<()> {
        verify_backup(backup_path)?;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("failed to lock database connection: {e}"))?;

        // Drop the live connection before swapping files so SQLite releases
        // its file handles, then reopen against the restored file.
        *conn = Connection::open(":memory:").context("failed to open placeholder connection")?;
        std::fs::copy(backup_path, &self.db_path).context("failed to copy backup into place")?;
        *conn = Connection::open(&self.db_path).context("failed to reopen restored database")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        Ok(())
    }
}

pub fn run_integrity_check(conn: &Connection) -> Result<()> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result != "ok" {
        anyhow::bail!("integrity check failed: {result}");
    }
    Ok(())
}

pub fn verify_backup(path: &std::path::Path) -> Result<()> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open backup {}", path.display()))?;
    run_integrity_check(&conn).with_context(|| format!("backup {} failed integrity check", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_database_and_runs_migrations() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let manager = DatabaseManager::new(db_path.clone()).unwrap();
        assert!(db_path.exists());

        manager
            .with_connection(|conn| {
                let version: i32 =
                    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
                assert_eq!(version, migrations::schema_version());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn restore_flag_is_exclusive() {
        let dir = tempdir().unwrap();
        let manager = DatabaseManager::new(dir.path().join("test.db")).unwrap();

        assert!(manager.begin_restore());
        assert!(!manager.begin_restore());
        manager.end_restore();
        assert!(manager.begin_restore());
    }
}
