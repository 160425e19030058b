//! CRUD for recordings, plus the time-slot overlap check and the batch
//! segment/word inserts that back the notebook ingestion pipeline.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::manager::DatabaseManager;
use super::models::{Recording, RecordingUpdate, Segment, SegmentWithWords, Word};

impl DatabaseManager {
    pub fn insert_recording(&self, recording: &Recording) -> Result<()> {
        self.with_connection(|conn| insert_recording_impl(conn, recording))
    }

    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>> {
        self.with_connection(|conn| get_recording_impl(conn, id))
    }

    pub fn list_recordings(
        &self,
        date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Recording>> {
        self.with_connection(|conn| list_recordings_impl(conn, date_range))
    }

    pub fn delete_recording(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| delete_recording_impl(conn, id))
    }

    pub fn update_recording(&self, id: &str, updates: &RecordingUpdate) -> Result<bool> {
        self.with_connection(|conn| update_recording_impl(conn, id, updates))
    }

    /// Returns the colliding recording, if any, for `[start, start+duration)`.
    pub fn check_time_slot_overlap(
        &self,
        start: DateTime<Utc>,
        duration_seconds: f64,
    ) -> Result<Option<Recording>> {
        self.with_connection(|conn| check_time_slot_overlap_impl(conn, start, duration_seconds))
    }

    pub fn insert_segments_batch(
        &self,
        recording_id: &str,
        segments: &[(Segment, Vec<Word>)],
    ) -> Result<()> {
        self.with_connection(|conn| insert_segments_batch_impl(conn, recording_id, segments))
    }

    pub fn get_segments_with_words(&self, recording_id: &str) -> Result<Vec<SegmentWithWords>> {
        self.with_connection(|conn| get_segments_with_words_impl(conn, recording_id))
    }
}

fn insert_recording_impl(conn: &Connection, recording: &Recording) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO recordings (
            id, filename, filepath, title, duration_seconds, recorded_at,
            imported_at, word_count, has_diarization, summary, summary_model
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            recording.id,
            recording.filename,
            recording.filepath,
            recording.title,
            recording.duration_seconds,
            recording.recorded_at.to_rfc3339(),
            recording.imported_at.to_rfc3339(),
            recording.word_count,
            recording.has_diarization,
            recording.summary,
            recording.summary_model,
        ],
    )
    .context("failed to insert recording")?;

    Ok(())
}

fn row_to_recording(row: &rusqlite::Row) -> rusqlite::Result<Recording> {
    let recorded_at: String = row.get("recorded_at")?;
    let imported_at: String = row.get("imported_at")?;

    Ok(Recording {
        id: row.get("id")?,
        filename: row.get("filename")?,
        filepath: row.get("filepath")?,
        title: row.get("title")?,
        duration_seconds: row.get("duration_seconds")?,
        recorded_at: parse_timestamp(&recorded_at),
        imported_at: parse_timestamp(&imported_at),
        word_count: row.get("word_count")?,
        has_diarization: row.get("has_diarization")?,
        summary: row.get("summary")?,
        summary_model: row.get("summary_model")?,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap())
}

fn get_recording_impl(conn: &Connection, id: &str) -> Result<Option<Recording>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, filename, filepath, title, duration_seconds, recorded_at,
               imported_at, word_count, has_diarization, summary, summary_model
        FROM recordings WHERE id = ?1
        "#,
    )?;

    stmt.query_row(params![id], row_to_recording)
        .optional()
        .context("failed to query recording")
}

fn list_recordings_impl(
    conn: &Connection,
    date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<Recording>> {
    let mut stmt;
    let rows;

    if let Some((start, end)) = date_range {
        stmt = conn.prepare(
            r#"
            SELECT id, filename, filepath, title, duration_seconds, recorded_at,
                   imported_at, word_count, has_diarization, summary, summary_model
            FROM recordings
            WHERE recorded_at >= ?1 AND recorded_at < ?2
            ORDER BY recorded_at DESC
            "#,
        )?;
        rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], row_to_recording)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    } else {
        stmt = conn.prepare(
            r#"
            SELECT id, filename, filepath, title, duration_seconds, recorded_at,
                   imported_at, word_count, has_diarization, summary, summary_model
            FROM recordings
            ORDER BY recorded_at DESC
            "#,
        )?;
        rows = stmt
            .query_map([], row_to_recording)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
    }

    Ok(rows)
}

fn delete_recording_impl(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM recordings WHERE id = ?1", params![id])
        .context("failed to delete recording")?;
    Ok(affected > 0)
}

fn update_recording_impl(conn: &Connection, id: &str, updates: &RecordingUpdate) -> Result<bool> {
    let mut set_clauses: Vec<String> = Vec::new();
    let mut params_refs: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(title) = &updates.title {
        set_clauses.push("title = ?".to_string());
        params_refs.push(Box::new(title.clone()));
    }
    if let Some(summary) = &updates.summary {
        set_clauses.push("summary = ?".to_string());
        params_refs.push(Box::new(summary.clone()));
    }
    if let Some(summary_model) = &updates.summary_model {
        set_clauses.push("summary_model = ?".to_string());
        params_refs.push(Box::new(summary_model.clone()));
    }
    if let Some(word_count) = updates.word_count {
        set_clauses.push("word_count = ?".to_string());
        params_refs.push(Box::new(word_count));
    }
    if let Some(has_diarization) = updates.has_diarization {
        set_clauses.push("has_diarization = ?".to_string());
        params_refs.push(Box::new(has_diarization));
    }

    if set_clauses.is_empty() {
        return Ok(true);
    }

    let sql = format!(
        "UPDATE recordings SET {} WHERE id = ?",
        set_clauses.join(", ")
    );
    params_refs.push(Box::new(id.to_string()));

    let refs: Vec<&dyn rusqlite::ToSql> = params_refs.iter().map(|p| p.as_ref()).collect();
    let affected = conn
        .execute(&sql, refs.as_slice())
        .context("failed to update recording")?;

    Ok(affected > 0)
}

fn check_time_slot_overlap_impl(
    conn: &Connection,
    start: DateTime<Utc>,
    duration_seconds: f64,
) -> Result<Option<Recording>> {
    // Intervals are closed-open: [recorded_at, recorded_at + duration). Two
    // intervals overlap iff each starts strictly before the other ends.
    let end = start + chrono::Duration::milliseconds((duration_seconds * 1000.0) as i64);

    let mut stmt = conn.prepare(
        r#"
        SELECT id, filename, filepath, title, duration_seconds, recorded_at,
               imported_at, word_count, has_diarization, summary, summary_model
        FROM recordings
        WHERE recorded_at < ?2
          AND datetime(recorded_at, '+' || duration_seconds || ' seconds') > ?1
        LIMIT 1
        "#,
    )?;

    stmt.query_row(params![start.to_rfc3339(), end.to_rfc3339()], row_to_recording)
        .optional()
        .context("failed to check time-slot overlap")
}

fn insert_segments_batch_impl(
    conn: &Connection,
    recording_id: &str,
    segments: &[(Segment, Vec<Word>)],
) -> Result<()> {
    conn.execute("BEGIN", [])?;

    let result: Result<()> = (|| {
        for (segment, words) in segments {
            conn.execute(
                r#"
                INSERT INTO segments (recording_id, start_time, end_time, text, speaker)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    recording_id,
                    segment.start_time,
                    segment.end_time,
                    segment.text,
                    segment.speaker,
                ],
            )?;
            let segment_id = conn.last_insert_rowid();

            for word in words {
                conn.execute(
                    r#"
                    INSERT INTO words (recording_id, segment_id, word, start_time, end_time, confidence, speaker)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        recording_id,
                        segment_id,
                        word.word,
                        word.start_time,
                        word.end_time,
                        word.confidence,
                        segment.speaker,
                    ],
                )?;
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(err) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(err).context("failed to insert segments batch")
        }
    }
}

fn get_segments_with_words_impl(conn: &Connection, recording_id: &str) -> Result<Vec<SegmentWithWords>> {
    let mut segment_stmt = conn.prepare(
        r#"
        SELECT id, recording_id, start_time, end_time, text, speaker
        FROM segments WHERE recording_id = ?1 ORDER BY start_time
        "#,
    )?;

    let segments = segment_stmt
        .query_map(params![recording_id], |row| {
            Ok(Segment {
                id: row.get(0)?,
                recording_id: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                text: row.get(4)?,
                speaker: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut word_stmt = conn.prepare(
        r#"
        SELECT id, recording_id, segment_id, word, start_time, end_time, confidence
        FROM words WHERE segment_id = ?1 ORDER BY start_time
        "#,
    )?;

    let mut result = Vec::with_capacity(segments.len());
    for segment in segments {
        let words = word_stmt
            .query_map(params![segment.id], |row| {
                Ok(Word {
                    id: row.get(0)?,
                    recording_id: row.get(1)?,
                    segment_id: row.get(2)?,
                    word: row.get(3)?,
                    start_time: row.get(4)?,
                    end_time: row.get(5)?,
                    confidence: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        result.push(SegmentWithWords { segment, words });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::DatabaseManager;
    use tempfile::tempdir;

    fn test_db() -> DatabaseManager {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        // Leak the tempdir so the file survives for the duration of the test.
        std::mem::forget(dir);
        DatabaseManager::new(path).unwrap()
    }

    fn sample_recording(id: &str, recorded_at: DateTime<Utc>) -> Recording {
        Recording {
            id: id.to_string(),
            filename: format!("{id}.mp3"),
            filepath: format!("/audio/{id}.mp3"),
            title: None,
            duration_seconds: 10.0,
            recorded_at,
            imported_at: Utc::now(),
            word_count: 0,
            has_diarization: false,
            summary: None,
            summary_model: None,
        }
    }

    #[test]
    fn insert_and_fetch_round_trips() {
        let db = test_db();
        let recording = sample_recording("rec-1", Utc::now());
        db.insert_recording(&recording).unwrap();

        let fetched = db.get_recording("rec-1").unwrap().unwrap();
        assert_eq!(fetched.filename, recording.filename);
    }

    #[test]
    fn overlapping_time_slot_is_detected() {
        let db = test_db();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        db.insert_recording(&sample_recording("rec-1", start)).unwrap();

        let colliding = db
            .check_time_slot_overlap(start + chrono::Duration::seconds(5), 10.0)
            .unwrap();
        assert!(colliding.is_some());

        let touching = db
            .check_time_slot_overlap(start + chrono::Duration::seconds(10), 10.0)
            .unwrap();
        assert!(touching.is_none(), "touching intervals must not collide");
    }

    #[test]
    fn delete_removes_row() {
        let db = test_db();
        db.insert_recording(&sample_recording("rec-1", Utc::now())).unwrap();
        assert!(db.delete_recording("rec-1").unwrap());
        assert!(db.get_recording("rec-1").unwrap().is_none());
    }

    #[test]
    fn segments_batch_insert_and_fetch() {
        let db = test_db();
        db.insert_recording(&sample_recording("rec-1", Utc::now())).unwrap();

        let segment = Segment {
            id: 0,
            recording_id: "rec-1".to_string(),
            start_time: 0.0,
            end_time: 1.0,
            text: "hello world".to_string(),
            speaker: Some("SPEAKER_00".to_string()),
        };
        let words = vec![
            Word {
                id: 0,
                recording_id: "rec-1".to_string(),
                segment_id: None,
                word: "hello".to_string(),
                start_time: 0.0,
                end_time: 0.4,
                confidence: Some(0.9),
            },
            Word {
                id: 0,
                recording_id: "rec-1".to_string(),
                segment_id: None,
                word: "world".to_string(),
                start_time: 0.4,
                end_time: 1.0,
                confidence: Some(0.95),
            },
        ];

        db.insert_segments_batch("rec-1", &[(segment, words)]).unwrap();

        let fetched = db.get_segments_with_words("rec-1").unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].words.len(), 2);
    }
}
