//! Numbered schema migrations, run once at startup in order.

use anyhow::{Context, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 4;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }
    if current_version < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

pub fn schema_version() -> i32 {
    SCHEMA_VERSION
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

/// Core schema: recordings, segments, words and their indexes.
fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("running database migration v1");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY NOT NULL,
            filename TEXT NOT NULL,
            filepath TEXT NOT NULL,
            title TEXT,
            duration_seconds REAL NOT NULL,
            recorded_at TEXT NOT NULL,
            imported_at TEXT NOT NULL DEFAULT (datetime('now')),
            word_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_recordings_recorded_at
        ON recordings(recorded_at);

        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            text TEXT NOT NULL,
            FOREIGN KEY (recording_id) REFERENCES recordings(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_segments_recording
        ON segments(recording_id, start_time);

        CREATE TABLE IF NOT EXISTS words (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id TEXT NOT NULL,
            segment_id INTEGER,
            word TEXT NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            confidence REAL,
            FOREIGN KEY (recording_id) REFERENCES recordings(id) ON DELETE CASCADE,
            FOREIGN KEY (segment_id) REFERENCES segments(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_words_recording
        ON words(recording_id, start_time);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )
    .context("failed to run migration v1")?;

    tracing::info!("migration v1 completed");
    Ok(())
}

/// FTS5 indexes mirroring `words.word` and recording metadata.
fn migrate_v2(conn: &Connection) -> Result<()> {
    tracing::info!("running database migration v2 - full text search");

    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS words_fts USING fts5(
            word,
            recording_id UNINDEXED,
            segment_id UNINDEXED,
            content='words',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS words_fts_insert AFTER INSERT ON words BEGIN
            INSERT INTO words_fts(rowid, word, recording_id, segment_id)
            VALUES (new.rowid, new.word, new.recording_id, new.segment_id);
        END;

        CREATE TRIGGER IF NOT EXISTS words_fts_delete AFTER DELETE ON words BEGIN
            INSERT INTO words_fts(words_fts, rowid, word, recording_id, segment_id)
            VALUES('delete', old.rowid, old.word, old.recording_id, old.segment_id);
        END;

        CREATE TRIGGER IF NOT EXISTS words_fts_update AFTER UPDATE ON words BEGIN
            INSERT INTO words_fts(words_fts, rowid, word, recording_id, segment_id)
            VALUES('delete', old.rowid, old.word, old.recording_id, old.segment_id);
            INSERT INTO words_fts(rowid, word, recording_id, segment_id)
            VALUES (new.rowid, new.word, new.recording_id, new.segment_id);
        END;

        ALTER TABLE recordings ADD COLUMN summary TEXT;
        ALTER TABLE recordings ADD COLUMN summary_model TEXT;

        CREATE VIRTUAL TABLE IF NOT EXISTS recordings_fts USING fts5(
            title,
            summary,
            filename,
            content='recordings',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS recordings_fts_insert AFTER INSERT ON recordings BEGIN
            INSERT INTO recordings_fts(rowid, title, summary, filename)
            VALUES (new.rowid, new.title, new.summary, new.filename);
        END;

        CREATE TRIGGER IF NOT EXISTS recordings_fts_delete AFTER DELETE ON recordings BEGIN
            INSERT INTO recordings_fts(recordings_fts, rowid, title, summary, filename)
            VALUES('delete', old.rowid, old.title, old.summary, old.filename);
        END;

        CREATE TRIGGER IF NOT EXISTS recordings_fts_update AFTER UPDATE ON recordings BEGIN
            INSERT INTO recordings_fts(recordings_fts, rowid, title, summary, filename)
            VALUES('delete', old.rowid, old.title, old.summary, old.filename);
            INSERT INTO recordings_fts(rowid, title, summary, filename)
            VALUES (new.rowid, new.title, new.summary, new.filename);
        END;

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )
    .context("failed to run migration v2")?;

    tracing::info!("migration v2 completed");
    Ok(())
}

/// Speaker labels from diarization.
fn migrate_v3(conn: &Connection) -> Result<()> {
    tracing::info!("running database migration v3 - diarization columns");

    conn.execute_batch(
        r#"
        ALTER TABLE segments ADD COLUMN speaker TEXT;
        ALTER TABLE words ADD COLUMN speaker TEXT;
        ALTER TABLE recordings ADD COLUMN has_diarization INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_version (version) VALUES (3);
        "#,
    )
    .context("failed to run migration v3")?;

    tracing::info!("migration v3 completed");
    Ok(())
}

/// Backup bookkeeping.
fn migrate_v4(conn: &Connection) -> Result<()> {
    tracing::info!("running database migration v4 - backup log");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS backup_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            integrity_ok INTEGER NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (4);
        "#,
    )
    .context("failed to run migration v4")?;

    tracing::info!("migration v4 completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn migrations_bring_fresh_db_to_latest_version() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), schema_version());
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), schema_version());
    }

    #[test]
    fn fts_tables_exist_after_migration() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();
        run_migrations(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('words_fts', 'recordings_fts')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
