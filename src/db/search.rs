//! Unified search across word-level FTS and recording metadata FTS.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::manager::DatabaseManager;
use super::models::{MatchedIn, SearchFilters, SearchResult};

impl DatabaseManager {
    pub fn search_words(&self, query: &str, filters: &SearchFilters) -> Result<Vec<SearchResult>> {
        self.with_connection(|conn| search_words_impl(conn, query, filters))
    }

    pub fn search_recording_metadata(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        self.with_connection(|conn| search_recording_metadata_impl(conn, query, filters))
    }

    /// Merges word and metadata matches, deduping by recording id.
    pub fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<SearchResult>> {
        self.with_connection(|conn| {
            let mut results = search_words_impl(conn, query, filters)?;
            let metadata_results = search_recording_metadata_impl(conn, query, filters)?;

            let mut seen: std::collections::HashSet<String> =
                results.iter().map(|r| r.recording_id.clone()).collect();
            for result in metadata_results {
                if seen.insert(result.recording_id.clone()) {
                    results.push(result);
                }
            }

            if filters.limit > 0 {
                results.truncate(filters.limit as usize);
            }

            Ok(results)
        })
    }
}

fn search_words_impl(conn: &Connection, query: &str, filters: &SearchFilters) -> Result<Vec<SearchResult>> {
    let mut sql = String::from(
        r#"
        SELECT r.id, r.title, snippet(words_fts, 0, '[', ']', '...', 8)
        FROM words_fts
        JOIN words w ON w.rowid = words_fts.rowid
        JOIN recordings r ON r.id = w.recording_id
        WHERE words_fts MATCH ?1
        "#,
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.to_string())];

    append_date_range(&mut sql, &mut params_vec, filters, "r.recorded_at");
    sql.push_str(" LIMIT ?");
    let limit = if filters.limit > 0 { filters.limit } else { 50 };
    params_vec.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql).context("failed to prepare word search")?;
    let refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(refs.as_slice(), |row| {
            Ok(SearchResult {
                recording_id: row.get(0)?,
                title: row.get(1)?,
                snippet: row.get(2)?,
                matched_in: MatchedIn::Words,
            })
        })
        .context("failed to run word search")?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

fn search_recording_metadata_impl(
    conn: &Connection,
    query: &str,
    filters: &SearchFilters,
) -> Result<Vec<SearchResult>> {
    let mut sql = String::from(
        r#"
        SELECT r.id, r.title, snippet(recordings_fts, 0, '[', ']', '...', 8)
        FROM recordings_fts
        JOIN recordings r ON r.rowid = recordings_fts.rowid
        WHERE recordings_fts MATCH ?1
        "#,
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.to_string())];

    append_date_range(&mut sql, &mut params_vec, filters, "r.recorded_at");
    sql.push_str(" LIMIT ?");
    let limit = if filters.limit > 0 { filters.limit } else { 50 };
    params_vec.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql).context("failed to prepare metadata search")?;
    let refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(refs.as_slice(), |row| {
            Ok(SearchResult {
                recording_id: row.get(0)?,
                title: row.get(1)?,
                snippet: row.get(2)?,
                matched_in: MatchedIn::Metadata,
            })
        })
        .context("failed to run metadata search")?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

fn append_date_range(
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
    filters: &SearchFilters,
    column: &str,
) {
    if let Some(start) = filters.start_date {
        sql.push_str(&format!(" AND {column} >= ?"));
        params_vec.push(Box::new(start.to_rfc3339()));
    }
    if let Some(end) = filters.end_date {
        sql.push_str(&format!(" AND {column} < ?"));
        params_vec.push(Box::new(end.to_rfc3339()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manager::DatabaseManager;
    use crate::db::models::{Recording, Segment, Word};
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_db() -> DatabaseManager {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        DatabaseManager::new(path).unwrap()
    }

    #[test]
    fn finds_matches_in_words_and_metadata() {
        let db = test_db();
        let recording = Recording {
            id: "rec-1".to_string(),
            filename: "rec-1.mp3".to_string(),
            filepath: "/audio/rec-1.mp3".to_string(),
            title: Some("Quarterly Planning".to_string()),
            duration_seconds: 5.0,
            recorded_at: Utc::now(),
            imported_at: Utc::now(),
            word_count: 2,
            has_diarization: false,
            summary: None,
            summary_model: None,
        };
        db.insert_recording(&recording).unwrap();

        let segment = Segment {
            id: 0,
            recording_id: "rec-1".to_string(),
            start_time: 0.0,
            end_time: 1.0,
            text: "roadmap review".to_string(),
            speaker: None,
        };
        let words = vec![Word {
            id: 0,
            recording_id: "rec-1".to_string(),
            segment_id: None,
            word: "roadmap".to_string(),
            start_time: 0.0,
            end_time: 0.5,
            confidence: None,
        }];
        db.insert_segments_batch("rec-1", &[(segment, words)]).unwrap();

        let filters = SearchFilters::default();
        let word_hits = db.search_words("roadmap", &filters).unwrap();
        assert_eq!(word_hits.len(), 1);

        let metadata_hits = db.search_recording_metadata("Quarterly", &filters).unwrap();
        assert_eq!(metadata_hits.len(), 1);
    }
}
