//! `POST /api/auth/login`: exchanges a bearer token for a session cookie so
//! browser clients don't have to hold the raw token in JS-accessible storage.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> AppResult<Response> {
    let identity = state
        .tokens
        .validate(&payload.token)
        .await
        .ok_or(AppError::AuthFailed)?;

    let cookie_flag = if state.config.server.tls.enabled { "; Secure" } else { "" };
    let cookie = format!(
        "auth_token={}; Path=/; HttpOnly; SameSite=Strict{cookie_flag}",
        payload.token
    );

    let mut response = Json(serde_json::json!({
        "client_name": identity.client_name,
        "is_admin": identity.is_admin,
    }))
    .into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookie.parse().expect("cookie header is always valid ascii"));

    Ok(response)
}
