pub mod handlers;
pub mod middleware;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/transcribe/audio", post(handlers::transcribe::transcribe_audio))
        .route("/api/transcribe/quick", post(handlers::transcribe::transcribe_quick))
        .route("/api/transcribe/cancel", post(handlers::transcribe::cancel_transcription))
        .route("/api/transcribe/languages", get(handlers::transcribe::languages))
        .route(
            "/api/notebook/transcribe/upload",
            post(handlers::notebook::upload_and_transcribe),
        )
        .route(
            "/api/notebook/recordings",
            get(handlers::notebook::list_recordings),
        )
        .route(
            "/api/notebook/recordings/:id",
            get(handlers::notebook::get_recording).delete(handlers::notebook::delete_recording),
        )
        .route(
            "/api/notebook/recordings/:id/title",
            patch(handlers::notebook::update_title),
        )
        .route(
            "/api/notebook/recordings/:id/summary",
            patch(handlers::notebook::update_summary),
        )
        .route(
            "/api/notebook/recordings/:id/audio",
            get(handlers::notebook::stream_audio),
        )
        .route(
            "/api/notebook/recordings/:id/transcription",
            get(handlers::notebook::get_transcription),
        )
        .route(
            "/api/notebook/recordings/:id/export",
            get(handlers::notebook::export_recording),
        )
        .route("/api/notebook/calendar", get(handlers::notebook::calendar))
        .route("/api/notebook/timeslot", get(handlers::notebook::timeslot))
        .route("/api/notebook/backups", get(handlers::notebook::list_backups))
        .route("/api/notebook/backup", post(handlers::notebook::create_backup))
        .route("/api/notebook/restore", post(handlers::notebook::restore_backup))
        .route("/api/search/", get(handlers::search::search))
        .route("/api/llm/process", post(handlers::llm::process))
        .route("/api/llm/process/stream", post(handlers::llm::process_stream))
        .route(
            "/api/llm/summarize/:recording_id",
            post(handlers::llm::summarize_recording),
        )
        .route("/api/admin/status", get(handlers::admin::status))
        .route("/api/admin/models/load", post(handlers::admin::load_model))
        .route("/api/admin/models/unload", post(handlers::admin::unload_model))
        .route("/ws", get(handlers::ws::plain_ws))
        .route("/ws/live", get(handlers::ws::live_ws))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .layer(from_fn_with_state(state.clone(), middleware::validate_origin))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
