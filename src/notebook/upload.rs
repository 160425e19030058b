//! Upload → transcribe → (optionally) diarize → persist pipeline backing
//! `POST /api/notebook/transcribe/upload`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{Recording, Segment, Word};
use crate::db::DatabaseManager;
use crate::diarization::{align_words_to_speakers, DiarizationConfig};
use crate::error::{AppError, AppResult};
use crate::model_manager::{JobGuard, ModelManager, SharedJobTracker};
use crate::transcription::engine::TranscribedSegment;
use crate::transcription::options::TranscribeOptions;

pub struct UploadRequest {
    pub client_name: String,
    pub original_filename: String,
    pub temp_audio_path: PathBuf,
    pub file_created_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub options: TranscribeOptions,
    pub max_segment_chars: usize,
    pub mp3_bitrate_kbps: u32,
}

/// Restricts a user-supplied filename stem to `[A-Za-z0-9._- ]`, truncated to
/// 100 characters. Anything outside that set (including path separators) is
/// dropped rather than replaced, so `"../../etc/passwd"` collapses to
/// `"....etcpasswd"` with no surviving separator to escape the audio directory.
pub fn sanitize_filename_stem(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let trimmed = filtered.trim();
    let truncated: String = trimmed.chars().take(100).collect();
    if truncated.is_empty() {
        "recording".to_string()
    } else {
        truncated
    }
}

/// Picks a non-colliding destination path by appending `-2`, `-3`, ... before
/// the extension until `audio_dir` has no file at that path.
fn pick_destination_path(audio_dir: &Path, stem: &str) -> PathBuf {
    let mut candidate = audio_dir.join(format!("{stem}.mp3"));
    let mut suffix = 2;
    while candidate.exists() {
        candidate = audio_dir.join(format!("{stem}-{suffix}.mp3"));
        suffix += 1;
    }
    candidate
}

pub struct UploadOutcome {
    pub recording: Recording,
}

/// Runs the full pipeline described for `/api/notebook/transcribe/upload`:
/// reserve the job slot, transcribe (forcing word timestamps when diarization
/// is requested), diarize best-effort, resolve the recording's time slot,
/// transcode to MP3, and persist everything in one transaction.
pub async fn run_upload_pipeline(
    request: UploadRequest,
    db: &DatabaseManager,
    models: &ModelManager,
    job_tracker: &SharedJobTracker,
    audio_dir: &Path,
    diarization_config: Option<DiarizationConfig>,
) -> AppResult<UploadOutcome> {
    let (started, job_id, active_user) = job_tracker.try_start_job(&request.client_name).await;
    if !started {
        return Err(AppError::Conflict(format!(
            "a transcription job is already running for {}",
            active_user.unwrap_or_else(|| "another client".to_string())
        )));
    }
    let _guard = JobGuard::new(job_tracker.clone(), job_id);

    let result = run_upload_pipeline_inner(&request, db, models, audio_dir, diarization_config).await;

    let _ = tokio::fs::remove_file(&request.temp_audio_path).await;

    result
}

async fn run_upload_pipeline_inner(
    request: &UploadRequest,
    db: &DatabaseManager,
    models: &ModelManager,
    audio_dir: &Path,
    diarization_config: Option<DiarizationConfig>,
) -> AppResult<UploadOutcome> {
    let options = request.options.clone().with_diarization_requirements();

    let (mut samples, sample_rate) = crate::audio::io::load_audio(&request.temp_audio_path, crate::audio::io::TARGET_SAMPLE_RATE)
        .map_err(AppError::Internal)?;

    if options.normalize_audio {
        crate::audio::io::normalize_peak(&mut samples, -3.0);
    }

    let mut segments: Vec<TranscribedSegment> = models
        .main_engine()
        .transcribe(&samples, &options, || false)
        .await
        .map_err(|err| match err.downcast::<crate::error::TranscriptionCancelledError>() {
            Ok(cancelled) => cancelled.into(),
            Err(err) => AppError::EngineFailure(err.to_string()),
        })?;

    let mut has_diarization = false;
    if options.diarization {
        match diarization_config {
            Some(config) => match models.load_diarization_model(config).await {
                Ok(()) => {
                    let diarize_result = models
                        .with_diarization_engine(|engine| engine.diarize(&samples, sample_rate))
                        .await;
                    match diarize_result {
                        Ok(speaker_segments) => {
                            segments = align_words_to_speakers(&segments, &speaker_segments, request.max_segment_chars);
                            has_diarization = true;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "diarization failed, continuing without speakers");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to load diarization model, continuing without speakers");
                }
            },
            None => {
                tracing::warn!("diarization requested but no diarization model is configured");
            }
        }
    }

    let duration_seconds = samples.len() as f64 / sample_rate as f64;
    let recorded_at = request.file_created_at.unwrap_or_else(Utc::now);

    if let Some(colliding) = db
        .check_time_slot_overlap(recorded_at, duration_seconds)
        .map_err(AppError::Internal)?
    {
        return Err(AppError::Conflict(format!(
            "recording {} already occupies that time slot",
            colliding.id
        )));
    }

    let stem = sanitize_filename_stem(
        Path::new(&request.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recording"),
    );
    let destination = pick_destination_path(audio_dir, &stem);
    crate::audio::io::convert_to_mp3(&request.temp_audio_path, &destination, request.mp3_bitrate_kbps)
        .map_err(AppError::Internal)?;

    let word_count: usize = segments.iter().map(|s| s.words.len()).sum();
    let recording_id = Uuid::new_v4().to_string();
    let recording = Recording {
        id: recording_id.clone(),
        filename: destination
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default(),
        filepath: destination.to_string_lossy().to_string(),
        title: request.title.clone(),
        duration_seconds,
        recorded_at,
        imported_at: Utc::now(),
        word_count: word_count as i64,
        has_diarization,
        summary: None,
        summary_model: None,
    };

    let segment_rows: Vec<(Segment, Vec<Word>)> = segments
        .into_iter()
        .map(|segment| {
            let words = segment
                .words
                .iter()
                .map(|w| Word {
                    id: 0,
                    recording_id: recording_id.clone(),
                    segment_id: None,
                    word: w.word.clone(),
                    start_time: w.start_time,
                    end_time: w.end_time,
                    confidence: w.confidence,
                })
                .collect();
            let speaker = segment.speaker.clone();
            (
                Segment {
                    id: 0,
                    recording_id: recording_id.clone(),
                    start_time: segment.start_time,
                    end_time: segment.end_time,
                    text: segment.text,
                    speaker,
                },
                words,
            )
        })
        .collect();

    db.insert_recording(&recording).map_err(AppError::Internal)?;
    db.insert_segments_batch(&recording_id, &segment_rows)
        .map_err(AppError::Internal)?;

    Ok(UploadOutcome { recording })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_traversal_attempts() {
        let sanitized = sanitize_filename_stem("../../etc/passwd");
        assert!(!sanitized.contains('/'));
        assert!(!sanitized.contains('\\'));
        // No surviving separator means joining this under the audio
        // directory can never escape it, even though dots remain.
        let joined = Path::new("/data/audio").join(format!("{sanitized}.mp3"));
        assert_eq!(joined.parent().unwrap(), Path::new("/data/audio"));
    }

    #[test]
    fn strips_control_and_special_characters() {
        let sanitized = sanitize_filename_stem("weird:name*with?chars");
        assert_eq!(sanitized, "weirdnamewithchars");
    }

    #[test]
    fn falls_back_to_a_default_name_when_nothing_survives() {
        let sanitized = sanitize_filename_stem("???***");
        assert_eq!(sanitized, "recording");
    }

    #[test]
    fn truncates_long_filenames() {
        let long_name = "a".repeat(500);
        let sanitized = sanitize_filename_stem(&long_name);
        assert_eq!(sanitized.len(), 100);
    }
}
