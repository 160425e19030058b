//! `/api/notebook/*`: the persisted recordings surface — CRUD, audio
//! streaming with Range support, export rendering, calendar/time-slot
//! lookups, and DB backup/restore.

use axum::body::Body;
use axum::extract::{Extension, Multipart, Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Recording, RecordingDetail, RecordingUpdate};
use crate::diarization::DiarizationConfig as EngineDiarizationConfig;
use crate::error::{AppError, AppResult};
use crate::notebook::{render_export, sanitize_filename_stem, ExportFormat, UploadRequest};
use crate::state::AppState;
use crate::token_store::TokenIdentity;
use crate::transcription::options::TranscribeOptions;

fn caller_name(identity: &Option<Extension<TokenIdentity>>) -> String {
    identity
        .as_ref()
        .map(|Extension(identity)| identity.client_name.clone())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn list_recordings(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<Vec<Recording>>> {
    let range = match (query.start_date, query.end_date) {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    };
    let recordings = state.db.list_recordings(range).map_err(AppError::Internal)?;
    Ok(Json(recordings))
}

pub async fn get_recording(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<RecordingDetail>> {
    let recording = state
        .db
        .get_recording(&id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {id} not found")))?;
    let segments = state.db.get_segments_with_words(&id).map_err(AppError::Internal)?;
    Ok(Json(RecordingDetail { recording, segments }))
}

pub async fn get_transcription(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Vec<crate::db::models::SegmentWithWords>>> {
    state
        .db
        .get_recording(&id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {id} not found")))?;
    let segments = state.db.get_segments_with_words(&id).map_err(AppError::Internal)?;
    Ok(Json(segments))
}

pub async fn delete_recording(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<StatusCode> {
    let recording = state
        .db
        .get_recording(&id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {id} not found")))?;

    let deleted = state.db.delete_recording(&id).map_err(AppError::Internal)?;
    if !deleted {
        return Err(AppError::NotFound(format!("recording {id} not found")));
    }

    if let Err(err) = tokio::fs::remove_file(&recording.filepath).await {
        tracing::warn!(error = %err, path = %recording.filepath, "failed to remove audio file after deleting recording");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TitleUpdate {
    pub title: String,
}

pub async fn update_title(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<TitleUpdate>,
) -> AppResult<StatusCode> {
    if body.title.trim().is_empty() {
        return Err(AppError::BadInput("title must not be empty".to_string()));
    }

    let updates = RecordingUpdate {
        title: Some(Some(body.title)),
        ..Default::default()
    };
    let updated = state.db.update_recording(&id, &updates).map_err(AppError::Internal)?;
    if !updated {
        return Err(AppError::NotFound(format!("recording {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SummaryUpdate {
    pub summary: Option<String>,
    pub summary_model: Option<String>,
}

pub async fn update_summary(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<SummaryUpdate>,
) -> AppResult<StatusCode> {
    let updates = RecordingUpdate {
        summary: Some(body.summary),
        summary_model: Some(body.summary_model),
        ..Default::default()
    };
    let updated = state.db.update_recording(&id, &updates).map_err(AppError::Internal)?;
    if !updated {
        return Err(AppError::NotFound(format!("recording {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stream_audio(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let recording = state
        .db
        .get_recording(&id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {id} not found")))?;

    let metadata = tokio::fs::metadata(&recording.filepath)
        .await
        .map_err(|err| AppError::Internal(err.into()))?;
    let file_size = metadata.len();

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let (start, end) = match range.and_then(parse_range) {
        Some((start, end)) => (start, end.min(file_size.saturating_sub(1))),
        None if range.is_some() => {
            return Err(AppError::RangeNotSatisfiable);
        }
        None => (0, file_size.saturating_sub(1)),
    };

    if start > end || start >= file_size {
        let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_RANGE, format!("bytes */{file_size}").parse().unwrap());
        return Ok(response);
    }

    let mut file = tokio::fs::File::open(&recording.filepath)
        .await
        .map_err(|err| AppError::Internal(err.into()))?;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};
    file.seek(std::io::SeekFrom::Start(start))
        .await
        .map_err(|err| AppError::Internal(err.into()))?;

    let content_length = end - start + 1;
    let mut buffer = vec![0u8; content_length as usize];
    file.read_exact(&mut buffer)
        .await
        .map_err(|err| AppError::Internal(err.into()))?;

    let is_partial = range.is_some();
    let status = if is_partial { StatusCode::PARTIAL_CONTENT } else { StatusCode::OK };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length.to_string())
        .body(Body::from(buffer))
        .map_err(|err| AppError::Internal(err.into()))?;

    if is_partial {
        response.headers_mut().insert(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{file_size}").parse().unwrap(),
        );
    }

    Ok(response)
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start: u64 = start_str.parse().ok()?;
    let end: u64 = if end_str.is_empty() {
        u64::MAX
    } else {
        end_str.parse().ok()?
    };
    Some((start, end))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: String,
}

pub async fn export_recording(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let recording = state
        .db
        .get_recording(&id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {id} not found")))?;
    let segments = state.db.get_segments_with_words(&id).map_err(AppError::Internal)?;

    let format = ExportFormat::parse(&query.format)?;
    let has_words = segments.iter().any(|s| !s.words.is_empty());
    let rendered = render_export(format, &segments, has_words, recording.has_diarization)?;

    let (content_type, extension) = match format {
        ExportFormat::Txt => ("text/plain; charset=utf-8", "txt"),
        ExportFormat::Srt => ("application/x-subrip", "srt"),
        ExportFormat::Ass => ("text/plain; charset=utf-8", "ass"),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.{extension}\""),
        )
        .body(Body::from(rendered))
        .map_err(|err| AppError::Internal(err.into()))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub day: u32,
    pub recording_ids: Vec<String>,
}

pub async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
) -> AppResult<Json<Vec<CalendarDay>>> {
    let start = Utc
        .with_ymd_and_hms(query.year, query.month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| AppError::BadInput("invalid year/month".to_string()))?;
    let end = if query.month == 12 {
        Utc.with_ymd_and_hms(query.year + 1, 1, 1, 0, 0, 0)
    } else {
        Utc.with_ymd_and_hms(query.year, query.month + 1, 1, 0, 0, 0)
    }
    .single()
    .ok_or_else(|| AppError::BadInput("invalid year/month".to_string()))?;

    let recordings = state
        .db
        .list_recordings(Some((start, end)))
        .map_err(AppError::Internal)?;

    let mut by_day: std::collections::BTreeMap<u32, Vec<String>> = std::collections::BTreeMap::new();
    for recording in recordings {
        by_day.entry(recording.recorded_at.day()).or_default().push(recording.id);
    }

    Ok(Json(
        by_day
            .into_iter()
            .map(|(day, recording_ids)| CalendarDay { day, recording_ids })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TimeSlotQuery {
    pub date: String,
    pub hour: u32,
}

pub async fn timeslot(
    State(state): State<AppState>,
    Query(query): Query<TimeSlotQuery>,
) -> AppResult<Json<crate::db::models::TimeSlotInfo>> {
    let naive_date = chrono::NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| AppError::BadInput("date must be YYYY-MM-DD".to_string()))?;
    let start = naive_date
        .and_hms_opt(query.hour, 0, 0)
        .and_then(|dt| dt.and_local_timezone(Utc).single())
        .ok_or_else(|| AppError::BadInput("hour must be 0-23".to_string()))?;

    let colliding = state.db.check_time_slot_overlap(start, 3600.0).map_err(AppError::Internal)?;

    Ok(Json(crate::db::models::TimeSlotInfo {
        date: query.date,
        hour: query.hour,
        occupied: colliding.is_some(),
        recording_id: colliding.map(|r| r.id),
    }))
}

pub async fn list_backups(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<crate::db::models::BackupInfo>>> {
    let backups = state
        .db
        .list_backups(&state.config.backups_dir())
        .map_err(AppError::Internal)?;
    Ok(Json(backups))
}

pub async fn create_backup(State(state): State<AppState>) -> AppResult<StatusCode> {
    state
        .db
        .create_backup(&state.config.backups_dir())
        .map_err(AppError::Internal)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub filename: String,
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Json(body): Json<RestoreRequest>,
) -> AppResult<StatusCode> {
    let backup_path = state.config.backups_dir().join(&body.filename);
    if !backup_path.exists() {
        return Err(AppError::NotFound(format!("backup {} not found", body.filename)));
    }

    if !state.db.begin_restore() {
        return Err(AppError::Conflict("a restore is already in progress".to_string()));
    }

    let result = state.db.restore_from(&backup_path);
    state.db.end_restore();

    result.map_err(|err| AppError::BadInput(format!("backup is corrupted: {err}")))?;
    Ok(StatusCode::OK)
}

pub async fn upload_and_transcribe(
    State(state): State<AppState>,
    identity: Option<Extension<TokenIdentity>>,
    mut multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let caller = caller_name(&identity);

    let mut temp_path: Option<std::path::PathBuf> = None;
    let mut original_filename = "recording.wav".to_string();
    let mut title: Option<String> = None;
    let mut file_created_at: Option<DateTime<Utc>> = None;
    let mut diarization = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadInput(err.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "audio" => {
                original_filename = field.file_name().unwrap_or("recording.wav").to_string();
                let bytes = field.bytes().await.map_err(|err| AppError::BadInput(err.to_string()))?;
                let path = std::env::temp_dir().join(format!(
                    "notebook-upload-{}.bin",
                    uuid::Uuid::new_v4()
                ));
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|err| AppError::Internal(err.into()))?;
                temp_path = Some(path);
            }
            "title" => {
                title = field.text().await.ok().filter(|t| !t.trim().is_empty());
            }
            "file_created_at" => {
                if let Ok(text) = field.text().await {
                    file_created_at = DateTime::parse_from_rfc3339(&text).ok().map(|dt| dt.with_timezone(&Utc));
                }
            }
            "diarization" => {
                if let Ok(text) = field.text().await {
                    diarization = text == "true" || text == "1";
                }
            }
            _ => {}
        }
    }

    let temp_path = temp_path.ok_or_else(|| AppError::BadInput("missing \"audio\" form field".to_string()))?;

    let mut options = TranscribeOptions::default();
    options.diarization = diarization;

    let diarization_config = if diarization {
        let config = &state.config.diarization;
        Some(EngineDiarizationConfig {
            segmentation_model_path: state.models.models_dir().join(format!("{}.onnx", sanitize_filename_stem(&config.model))),
            embedding_model_path: state.models.models_dir().join("embedding.onnx"),
            max_speakers: config.max_speakers.unwrap_or(10) as usize,
            similarity_threshold: 0.85,
        })
    } else {
        None
    };

    let request = UploadRequest {
        client_name: caller,
        original_filename,
        temp_audio_path: temp_path,
        file_created_at,
        title,
        options,
        max_segment_chars: 400,
        mp3_bitrate_kbps: 128,
    };

    let outcome = crate::notebook::run_upload_pipeline(
        request,
        &state.db,
        &state.models,
        &state.jobs,
        &state.config.audio_dir(),
        diarization_config,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "recording_id": outcome.recording.id,
        "message": "recording transcribed and persisted",
    })))
}
