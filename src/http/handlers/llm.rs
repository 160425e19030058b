//! `/api/llm/*`: proxies summarization requests to the configured
//! OpenAI-compatible endpoint. Never touches model weights directly — this
//! is a thin HTTP relay with our own status-code mapping layered on top.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub content: String,
    pub model: String,
}

fn chat_payload(state: &AppState, prompt: &str, system_prompt: Option<&str>, stream: bool) -> serde_json::Value {
    let config = &state.config.local_llm;
    let system = system_prompt.or(config.default_system_prompt.as_deref());

    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    json!({
        "model": config.model,
        "messages": messages,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": stream,
    })
}

fn llm_client(state: &AppState) -> AppResult<reqwest::Client> {
    if !state.config.local_llm.enabled {
        return Err(AppError::ServiceDisabled);
    }
    reqwest::Client::builder()
        .timeout(LLM_TIMEOUT)
        .build()
        .map_err(|err| AppError::Internal(err.into()))
}

async fn map_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::UpstreamTimeout
    } else {
        AppError::UpstreamUnavailable
    }
}

pub async fn process(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequest>,
) -> AppResult<Json<ProcessResponse>> {
    let client = llm_client(&state)?;
    let payload = chat_payload(&state, &body.prompt, body.system_prompt.as_deref(), false);

    let response = client
        .post(format!("{}/chat/completions", state.config.local_llm.base_url))
        .json(&payload)
        .send()
        .await
        .map_err(map_transport_error)
        .await?;

    if !response.status().is_success() {
        return Err(AppError::UpstreamUnavailable);
    }

    let body: serde_json::Value = response.json().await.map_err(|err| AppError::Internal(err.into()))?;
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    Ok(Json(ProcessResponse {
        content,
        model: state.config.local_llm.model.clone(),
    }))
}

pub async fn process_stream(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let client = llm_client(&state)?;
    let payload = chat_payload(&state, &body.prompt, body.system_prompt.as_deref(), true);
    let url = format!("{}/chat/completions", state.config.local_llm.base_url);

    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(map_transport_error)
        .await?;

    if !response.status().is_success() {
        return Err(AppError::UpstreamUnavailable);
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);

    tokio::spawn(async move {
        let mut bytes_stream = response.bytes_stream();
        while let Some(chunk) = bytes_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx
                        .send(Event::default().data(json!({"error": err.to_string()}).to_string()))
                        .await;
                    return;
                }
            };

            for line in chunk.split(|byte| *byte == b'\n') {
                let Ok(line) = std::str::from_utf8(line) else { continue };
                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    let _ = tx.send(Event::default().data(json!({"done": true}).to_string())).await;
                    return;
                }
                if let Ok(frame) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(delta) = frame["choices"][0]["delta"]["content"].as_str() {
                        let _ = tx
                            .send(Event::default().data(json!({"content": delta}).to_string()))
                            .await;
                    }
                }
            }
        }
        let _ = tx.send(Event::default().data(json!({"done": true}).to_string())).await;
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (Ok(event), rx)) });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn summarize_recording(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> AppResult<Json<ProcessResponse>> {
    let recording = state
        .db
        .get_recording(&recording_id)
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("recording {recording_id} not found")))?;

    let segments = state.db.get_segments_with_words(&recording_id).map_err(AppError::Internal)?;
    if segments.is_empty() {
        return Err(AppError::NotFound(format!("recording {recording_id} has no transcript")));
    }

    let transcript: String = segments
        .iter()
        .map(|s| s.segment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let prompt = format!(
        "Summarize the following transcript of a recording titled \"{}\":\n\n{}",
        recording.title.as_deref().unwrap_or("Untitled"),
        transcript
    );

    let client = llm_client(&state)?;
    let payload = chat_payload(&state, &prompt, None, false);

    let response = client
        .post(format!("{}/chat/completions", state.config.local_llm.base_url))
        .json(&payload)
        .send()
        .await
        .map_err(map_transport_error)
        .await?;

    if !response.status().is_success() {
        return Err(AppError::UpstreamUnavailable);
    }

    let body: serde_json::Value = response.json().await.map_err(|err| AppError::Internal(err.into()))?;
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let updates = crate::db::models::RecordingUpdate {
        summary: Some(Some(content.clone())),
        summary_model: Some(Some(state.config.local_llm.model.clone())),
        ..Default::default()
    };
    state.db.update_recording(&recording_id, &updates).map_err(AppError::Internal)?;

    Ok(Json(ProcessResponse {
        content,
        model: state.config.local_llm.model.clone(),
    }))
}
