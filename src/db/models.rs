//! Row types shared between the repositories and the HTTP JSON layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub title: Option<String>,
    pub duration_seconds: f64,
    pub recorded_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub word_count: i64,
    pub has_diarization: bool,
    pub summary: Option<String>,
    pub summary_model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingUpdate {
    pub title: Option<Option<String>>,
    pub summary: Option<Option<String>>,
    pub summary_model: Option<Option<String>>,
    pub word_count: Option<i64>,
    pub has_diarization: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub recording_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub id: i64,
    pub recording_id: String,
    pub segment_id: Option<i64>,
    pub word: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentWithWords {
    #[serde(flatten)]
    pub segment: Segment,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDetail {
    #[serde(flatten)]
    pub recording: Recording,
    pub segments: Vec<SegmentWithWords>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub recording_id: String,
    pub title: Option<String>,
    pub snippet: String,
    pub matched_in: MatchedIn,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedIn {
    Words,
    Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSlotInfo {
    pub date: String,
    pub hour: u32,
    pub occupied: bool,
    pub recording_id: Option<String>,
}
