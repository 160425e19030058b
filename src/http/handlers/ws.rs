//! `/ws` (plain streaming transcription) and `/ws/live` (Live Mode).
//!
//! Both sockets are split into an ingest task (binary PCM16 LE frames in)
//! and the handler's own send loop (JSON/binary frames out), joined with
//! `tokio::select!` so either side closing tears the whole session down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::live_mode::protocol::{decode_audio_frame, ClientMessage, ErrorData, ServerMessage};
use crate::live_mode::session::{reload_main_model_in_background, swap_in_live_model};
use crate::state::AppState;
use crate::transcription::engine::TranscribedSegment;
use crate::transcription::options::TranscribeOptions;
use crate::transcription::recorder::{Recorder, RecorderConfig, RecorderEvent, RecorderState};
use crate::vad::{Sensitivity, TwoStageVad};

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

fn webrtc_sensitivity(level: i32) -> Sensitivity {
    match level {
        0 => Sensitivity::Quality,
        1 => Sensitivity::LowBitrate,
        3 => Sensitivity::VeryAggressive,
        _ => Sensitivity::Aggressive,
    }
}

/// Waits for the client's `{"type":"auth","token":"…"}` frame. Returns
/// `true` on success; on timeout, absence, or bad token, sends the
/// protocol's failure frame and the caller should close.
async fn authenticate_socket(socket: &mut WebSocket, state: &AppState) -> bool {
    if !state.config.server.tls.enabled {
        return true;
    }

    let frame = timeout(AUTH_TIMEOUT, socket.recv()).await;
    let Ok(Some(Ok(Message::Text(text)))) = frame else {
        return false;
    };

    #[derive(serde::Deserialize)]
    struct AuthFrame {
        #[serde(rename = "type")]
        kind: String,
        token: String,
    }

    let Ok(frame) = serde_json::from_str::<AuthFrame>(&text) else {
        return false;
    };
    if frame.kind != "auth" {
        return false;
    }

    state.tokens.validate(&frame.token).await.is_some()
}

pub async fn plain_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_plain_ws(socket, state))
}

async fn handle_plain_ws(mut socket: WebSocket, state: AppState) {
    if !authenticate_socket(&mut socket, &state).await {
        let _ = socket.send(Message::Text(r#"{"type":"auth_fail"}"#.to_string())).await;
        let _ = socket.close().await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<RecorderEvent>(64);
    let (waveform_tx, mut waveform_rx) = mpsc::channel::<Vec<f32>>(4);

    let vad_sample_rate = 16_000;
    let mut vad = match TwoStageVad::new(vad_sample_rate, Sensitivity::Aggressive, 0.4, false) {
        Ok(vad) => vad,
        Err(err) => {
            let _ = sender
                .send(Message::Text(json!({"type":"error","data":{"message":err.to_string()}}).to_string()))
                .await;
            return;
        }
    };

    let mut ingest = tokio::spawn(async move {
        let mut recorder = Recorder::new(RecorderConfig::default(), events_tx);
        recorder.listen();

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Binary(bytes)) => {
                    let Ok(frame) = decode_audio_frame(&bytes) else { continue };
                    let pcm_i16: Vec<i16> = frame
                        .samples
                        .iter()
                        .map(|s| (s * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                        .collect();
                    let is_speech = vad.is_speech(&pcm_i16, frame.samples.clone()).await.unwrap_or(false);
                    recorder.feed_chunk(frame.samples, is_speech).await;

                    if recorder.state() == RecorderState::Transcribing {
                        let waveform = recorder.take_waveform();
                        if waveform_tx.send(waveform).await.is_err() {
                            break;
                        }
                        recorder.listen();
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let mut egress = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(waveform) = waveform_rx.recv() => {
                    let options = TranscribeOptions::default();
                    let result = state
                        .models
                        .main_engine()
                        .transcribe(&waveform, &options, || false)
                        .await;

                    let payload = match result {
                        Ok(segments) => json!({
                            "type": "result",
                            "segments": segments_to_json(segments),
                        }),
                        Err(err) => json!({"type": "error", "data": {"message": err.to_string()}}),
                    };

                    if sender.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(_event) = events_rx.recv() => {}
                else => break,
            }
        }
    });

    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }
}

fn segments_to_json(segments: Vec<TranscribedSegment>) -> Vec<serde_json::Value> {
    segments
        .into_iter()
        .map(|segment| {
            json!({
                "start_time": segment.start_time,
                "end_time": segment.end_time,
                "text": segment.text,
                "speaker": segment.speaker,
            })
        })
        .collect()
}

pub async fn live_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_ws(socket, state))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn send_server_message(sender: &mut (impl futures_util::Sink<Message, Error = axum::Error> + Unpin), message: ServerMessage) {
    if let Ok(text) = serde_json::to_string(&message) {
        let _ = sender.send(Message::Text(text)).await;
    }
}

async fn handle_live_ws(mut socket: WebSocket, state: AppState) {
    if !authenticate_socket(&mut socket, &state).await {
        let _ = socket.send(Message::Text(r#"{"type":"auth_fail"}"#.to_string())).await;
        let _ = socket.close().await;
        return;
    }

    let Some(guard) = state.live_mode.try_acquire() else {
        let _ = socket
            .send(Message::Text(
                json!({"type":"error","data":{"message":"a live mode session is already active"}}).to_string(),
            ))
            .await;
        let _ = socket.close().await;
        return;
    };

    let (mut sender, mut receiver) = socket.split();
    send_server_message(&mut sender, ServerMessage::AuthOk).await;

    let mut history: Vec<String> = Vec::new();
    let mut started = false;
    let mut live_model_name = state.config.live_transcriber.model.clone();
    let mut last_partial_at: Option<Instant> = None;
    const PARTIAL_INTERVAL: Duration = Duration::from_millis(800);

    let (events_tx, mut events_rx) = mpsc::channel::<RecorderEvent>(64);
    let mut recorder = Recorder::new(RecorderConfig::default(), events_tx);
    let mut vad = match TwoStageVad::new(16_000, webrtc_sensitivity(state.config.live_transcriber.webrtc_sensitivity), state.config.live_transcriber.silero_sensitivity, false) {
        Ok(vad) => vad,
        Err(err) => {
            send_server_message(
                &mut sender,
                ServerMessage::Error { data: ErrorData { message: err.to_string() }, timestamp: now_ms() },
            )
            .await;
            drop(guard);
            return;
        }
    };

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(client_message) = serde_json::from_str::<ClientMessage>(&text) else { continue };
                        match client_message {
                            ClientMessage::Start { config } => {
                                if let Some(config) = &config {
                                    if let Some(model) = &config.model {
                                        live_model_name = model.clone();
                                    }
                                }

                                let same_model = swap_in_live_model(&state.models, &live_model_name, &mut sender).await;
                                send_server_message(&mut sender, ServerMessage::Status {
                                    data: json!({"same_model": same_model}),
                                    timestamp: now_ms(),
                                }).await;

                                recorder.listen();
                                started = true;
                                send_server_message(&mut sender, ServerMessage::State {
                                    data: "LISTENING".to_string(),
                                    timestamp: now_ms(),
                                }).await;
                            }
                            ClientMessage::Stop => {
                                started = false;
                                state.models.live_engine().unload_model().await;
                                reload_main_model_in_background(state.models.clone());
                                send_server_message(&mut sender, ServerMessage::State {
                                    data: "STOPPED".to_string(),
                                    timestamp: now_ms(),
                                }).await;
                            }
                            ClientMessage::GetHistory => {
                                send_server_message(&mut sender, ServerMessage::History {
                                    data: history.clone(),
                                    timestamp: now_ms(),
                                }).await;
                            }
                            ClientMessage::ClearHistory => {
                                history.clear();
                                send_server_message(&mut sender, ServerMessage::HistoryCleared { timestamp: now_ms() }).await;
                            }
                            ClientMessage::Ping => {
                                send_server_message(&mut sender, ServerMessage::Pong { timestamp: now_ms() }).await;
                            }
                            ClientMessage::Auth { .. } => {}
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        if !started {
                            continue;
                        }
                        let Ok(frame) = decode_audio_frame(&bytes) else { continue };
                        let pcm_i16: Vec<i16> = frame
                            .samples
                            .iter()
                            .map(|s| (s * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                            .collect();
                        let is_speech = vad.is_speech(&pcm_i16, frame.samples.clone()).await.unwrap_or(false);
                        let previous_state = recorder.state();
                        recorder.feed_chunk(frame.samples, is_speech).await;

                        if previous_state == RecorderState::Listening && recorder.state() == RecorderState::Recording {
                            send_server_message(&mut sender, ServerMessage::State {
                                data: "RECORDING".to_string(),
                                timestamp: now_ms(),
                            }).await;
                            last_partial_at = Some(Instant::now());
                        }

                        if recorder.state() == RecorderState::Recording {
                            let due = last_partial_at.map(|at| at.elapsed() >= PARTIAL_INTERVAL).unwrap_or(true);
                            if due {
                                last_partial_at = Some(Instant::now());
                                let waveform = recorder.peek_waveform().to_vec();
                                if !waveform.is_empty() {
                                    let options = TranscribeOptions::default();
                                    if let Ok(segments) = state.models.live_engine().transcribe(&waveform, &options, || false).await {
                                        let partial = segments.into_iter().map(|s| s.text).collect::<Vec<_>>().join(" ");
                                        if !partial.trim().is_empty() {
                                            send_server_message(&mut sender, ServerMessage::Partial {
                                                data: partial,
                                                timestamp: now_ms(),
                                            }).await;
                                        }
                                    }
                                }
                            }
                        }

                        if recorder.state() == RecorderState::Transcribing {
                            send_server_message(&mut sender, ServerMessage::State {
                                data: "TRANSCRIBING".to_string(),
                                timestamp: now_ms(),
                            }).await;

                            let waveform = recorder.take_waveform();
                            let options = TranscribeOptions::default();
                            match state.models.live_engine().transcribe(&waveform, &options, || false).await {
                                Ok(segments) => {
                                    let sentence = segments.into_iter().map(|s| s.text).collect::<Vec<_>>().join(" ");
                                    if !sentence.trim().is_empty() {
                                        history.push(sentence.clone());
                                        send_server_message(&mut sender, ServerMessage::Sentence {
                                            data: sentence,
                                            timestamp: now_ms(),
                                        }).await;
                                    }
                                }
                                Err(err) => {
                                    send_server_message(&mut sender, ServerMessage::Error {
                                        data: ErrorData { message: err.to_string() },
                                        timestamp: now_ms(),
                                    }).await;
                                }
                            }

                            recorder.listen();
                            send_server_message(&mut sender, ServerMessage::State {
                                data: "LISTENING".to_string(),
                                timestamp: now_ms(),
                            }).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            Some(_event) = events_rx.recv() => {}
        }
    }

    if started {
        state.models.live_engine().unload_model().await;
        reload_main_model_in_background(state.models.clone());
    }
    drop(guard);
}
