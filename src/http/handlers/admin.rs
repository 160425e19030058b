//! `/api/admin/*`: status and manual model lifecycle control, gated to
//! identities with `is_admin` (or to any caller in the non-TLS local mode,
//! where every caller is treated as a trusted operator).

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::http::middleware::is_admin;
use crate::model_manager::ModelStatus;
use crate::state::AppState;

fn require_admin(request: &Request) -> AppResult<()> {
    if is_admin(request) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn status(State(state): State<AppState>, request: Request) -> AppResult<Json<ModelStatus>> {
    require_admin(&request)?;
    Ok(Json(state.models.get_status().await))
}

#[derive(Debug, Deserialize)]
pub struct ModelAction {
    pub target: ModelTarget,
    pub model_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTarget {
    Main,
    Live,
    Diarization,
}

pub async fn load_model(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<Response> {
    require_admin(&request)?;
    let Json(body): Json<ModelAction> = extract_json(request).await?;

    let model_name = body
        .model_name
        .ok_or_else(|| AppError::BadInput("model_name is required to load a model".to_string()))?;

    match body.target {
        ModelTarget::Main => state.models.load_transcription_model(&model_name).await,
        ModelTarget::Live => state.models.load_live_model(&model_name).await,
        ModelTarget::Diarization => {
            return Err(AppError::BadInput(
                "diarization models are loaded per-request, not via the admin endpoint".to_string(),
            ))
        }
    }
    .map_err(AppError::Internal)?;

    Ok(axum::http::StatusCode::OK.into_response())
}

pub async fn unload_model(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<Response> {
    require_admin(&request)?;
    let Json(body): Json<ModelAction> = extract_json(request).await?;

    match body.target {
        ModelTarget::Main => state.models.unload_transcription_model().await,
        ModelTarget::Live => state.models.unload_live_model().await,
        ModelTarget::Diarization => state.models.unload_diarization_model().await,
    }

    Ok(axum::http::StatusCode::OK.into_response())
}

async fn extract_json<T: serde::de::DeserializeOwned>(request: Request) -> AppResult<Json<T>> {
    use axum::extract::FromRequest;
    Json::<T>::from_request(request, &())
        .await
        .map_err(|err| AppError::BadInput(err.to_string()))
}
