//! Backup rotation: copy the live DB file into a dated backup directory,
//! verify it, and retain at most `max_backups` entries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use super::manager::{verify_backup, DatabaseManager};
use super::models::BackupInfo;
use crate::config::BackupConfig;

impl DatabaseManager {
    pub fn list_backups(&self, backups_dir: &Path) -> Result<Vec<BackupInfo>> {
        if !backups_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(backups_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            backups.push(BackupInfo {
                filename: entry.file_name().to_string_lossy().to_string(),
                created_at: chrono::DateTime::<Utc>::from(modified),
                size_bytes: metadata.len(),
            });
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Runs the backup policy: creates a new backup if the newest one is
    /// older than `max_age_hours`, then trims to `max_backups`.
    pub fn maybe_backup(&self, backups_dir: &Path, config: &BackupConfig) -> Result<Option<PathBuf>> {
        if !config.enabled {
            return Ok(None);
        }

        let existing = self.list_backups(backups_dir)?;
        let needs_backup = existing
            .first()
            .map(|newest| Utc::now() - newest.created_at > chrono::Duration::hours(config.max_age_hours as i64))
            .unwrap_or(true);

        if !needs_backup {
            return Ok(None);
        }

        let path = self.create_backup(backups_dir)?;
        self.trim_backups(backups_dir, config.max_backups)?;
        Ok(Some(path))
    }

    pub fn create_backup(&self, backups_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(backups_dir).context("failed to create backups directory")?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let backup_path = backups_dir.join(format!("notebook-{timestamp}.db"));

        std::fs::copy(self.db_path(), &backup_path).context("failed to copy database for backup")?;
        let integrity_ok = verify_backup(&backup_path).is_ok();

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO backup_log (filename, integrity_ok) VALUES (?1, ?2)",
                rusqlite::params![backup_path.file_name().unwrap().to_string_lossy(), integrity_ok],
            )?;
            Ok(())
        })?;

        if !integrity_ok {
            anyhow::bail!("backup {} failed integrity check", backup_path.display());
        }

        Ok(backup_path)
    }

    fn trim_backups(&self, backups_dir: &Path, max_backups: usize) -> Result<()> {
        let backups = self.list_backups(backups_dir)?;
        for stale in backups.into_iter().skip(max_backups) {
            let path = backups_dir.join(&stale.filename);
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(error = %err, path = %path.display(), "failed to remove stale backup");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_list_backup() {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("db").join("notebook.db")).unwrap();
        let backups_dir = dir.path().join("backups");

        db.create_backup(&backups_dir).unwrap();
        let backups = db.list_backups(&backups_dir).unwrap();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn trims_to_max_backups() {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("db").join("notebook.db")).unwrap();
        let backups_dir = dir.path().join("backups");

        for _ in 0..3 {
            db.create_backup(&backups_dir).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        db.trim_backups(&backups_dir, 2).unwrap();

        assert_eq!(db.list_backups(&backups_dir).unwrap().len(), 2);
    }
}
