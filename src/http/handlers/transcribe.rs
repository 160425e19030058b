//! Non-persisted transcription: `/api/transcribe/audio`, `/quick`, `/cancel`,
//! `/languages`. Upload buffers to a scratch temp file, transcribes, and the
//! file is removed again — nothing is written to the notebook database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Extension, Multipart, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::model_manager::JobGuard;
use crate::state::AppState;
use crate::token_store::TokenIdentity;
use crate::transcription::engine::TranscribedSegment;
use crate::transcription::options::TranscribeOptions;

fn caller_name(identity: &Option<Extension<TokenIdentity>>) -> String {
    identity
        .as_ref()
        .map(|Extension(identity)| identity.client_name.clone())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub segments: Vec<SegmentJson>,
}

#[derive(Debug, Serialize)]
pub struct SegmentJson {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub speaker: Option<String>,
}

impl From<TranscribedSegment> for SegmentJson {
    fn from(segment: TranscribedSegment) -> Self {
        Self {
            start_time: segment.start_time,
            end_time: segment.end_time,
            text: segment.text,
            speaker: segment.speaker,
        }
    }
}

async fn buffer_upload_to_temp(mut multipart: Multipart) -> AppResult<std::path::PathBuf> {
    let temp_path = std::env::temp_dir().join(format!("transcribe-{}.upload", Uuid::new_v4()));

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadInput(err.to_string()))?
    {
        if field.name() == Some("audio") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadInput(err.to_string()))?;
            tokio::fs::write(&temp_path, &bytes)
                .await
                .map_err(|err| AppError::Internal(err.into()))?;
            return Ok(temp_path);
        }
    }

    Err(AppError::BadInput("missing \"audio\" form field".to_string()))
}

async fn run_transcription(
    state: &AppState,
    caller: String,
    options: TranscribeOptions,
    multipart: Multipart,
) -> AppResult<TranscribeResponse> {
    let (started, job_id, active_user) = state.jobs.try_start_job(&caller).await;
    if !started {
        return Err(AppError::Conflict(format!(
            "a transcription job is already running for {}",
            active_user.unwrap_or_else(|| "another client".to_string())
        )));
    }
    let _guard = JobGuard::new(state.jobs.clone(), job_id);

    let temp_path = buffer_upload_to_temp(multipart).await?;
    let result = transcribe_file(state, &temp_path, &options).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    result
}

async fn transcribe_file(
    state: &AppState,
    temp_path: &std::path::Path,
    options: &TranscribeOptions,
) -> AppResult<TranscribeResponse> {
    let (mut samples, _rate) = crate::audio::io::load_audio(temp_path, crate::audio::io::TARGET_SAMPLE_RATE)
        .map_err(AppError::Internal)?;

    if options.normalize_audio {
        crate::audio::io::normalize_peak(&mut samples, -3.0);
    }

    // The engine's cancellation check is synchronous (polled between
    // decoded segments), but the job tracker's flag lives behind a tokio
    // mutex; a background watcher bridges the two via a plain atomic.
    let cancelled = Arc::new(AtomicBool::new(false));
    let watcher_flag = cancelled.clone();
    let watcher_jobs = state.jobs.clone();
    let watcher = tokio::spawn(async move {
        loop {
            if watcher_jobs.is_cancelled().await {
                watcher_flag.store(true, Ordering::SeqCst);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });

    let segments = state
        .models
        .main_engine()
        .transcribe(&samples, options, || cancelled.load(Ordering::SeqCst))
        .await;
    watcher.abort();

    let segments = segments.map_err(|err| match err.downcast::<crate::error::TranscriptionCancelledError>() {
        Ok(cancelled) => cancelled.into(),
        Err(err) => AppError::EngineFailure(err.to_string()),
    })?;

    Ok(TranscribeResponse {
        segments: segments.into_iter().map(SegmentJson::from).collect(),
    })
}

pub async fn transcribe_audio(
    State(state): State<AppState>,
    identity: Option<Extension<TokenIdentity>>,
    multipart: Multipart,
) -> AppResult<Json<TranscribeResponse>> {
    let caller = caller_name(&identity);
    let options = TranscribeOptions::default().with_diarization_requirements();
    run_transcription(&state, caller, options, multipart).await.map(Json)
}

pub async fn transcribe_quick(
    State(state): State<AppState>,
    identity: Option<Extension<TokenIdentity>>,
    multipart: Multipart,
) -> AppResult<Json<TranscribeResponse>> {
    let caller = caller_name(&identity);
    run_transcription(&state, caller, TranscribeOptions::quick(), multipart)
        .await
        .map(Json)
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub cancelled_user: Option<String>,
}

pub async fn cancel_transcription(State(state): State<AppState>) -> Json<CancelResponse> {
    let (success, cancelled_user) = state.jobs.cancel_job().await;
    Json(CancelResponse { success, cancelled_user })
}

pub async fn languages() -> Json<Vec<&'static str>> {
    Json(vec![
        "en", "es", "fr", "de", "it", "pt", "nl", "ru", "zh", "ja", "ko", "ar", "hi",
    ])
}
