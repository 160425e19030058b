//! Live Mode session controller. At most one session may be active globally;
//! the guard is a simple compare-and-swap on an `Arc<AtomicBool>` rather than
//! a second module-level global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde_json::json;

use crate::live_mode::protocol::ServerMessage;
use crate::model_manager::manager::ModelManager;

async fn send_progress<S>(sender: &mut S, message: &str)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let payload = ServerMessage::Status {
        data: json!({"message": message}),
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    if let Ok(text) = serde_json::to_string(&payload) {
        let _ = sender.send(Message::Text(text)).await;
    }
}

pub struct LiveModeGuard {
    active: Arc<AtomicBool>,
}

impl Drop for LiveModeGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct LiveModeSlot {
    active: Arc<AtomicBool>,
}

impl Default for LiveModeSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveModeSlot {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `None` if a session is already active; otherwise a guard that
    /// releases the slot when the session ends.
    pub fn try_acquire(&self) -> Option<LiveModeGuard> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| LiveModeGuard {
                active: self.active.clone(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineFsmState {
    Listening,
    Recording,
    Transcribing,
    Stopped,
}

/// Runs the model-swap sequence on `start`: unload the main model (logging,
/// not failing, if it was already absent), then load the Live Mode model.
/// Sends a `status` progress frame before each step so a slow swap doesn't
/// leave the client waiting on silence between the `same_model` status and
/// the `LISTENING` state.
pub async fn swap_in_live_model<S>(models: &ModelManager, live_model: &str, sender: &mut S) -> bool
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let current_main_model = models.main_engine().current_model().await;
    let same_model = models
        .is_same_model(live_model, current_main_model.as_deref())
        .await;

    if models.main_engine().is_loaded().await {
        send_progress(sender, "Unloading main model...").await;
        models.unload_transcription_model().await;
    } else {
        tracing::debug!("main model was already absent during live mode swap-in");
    }

    send_progress(sender, "Loading Live Mode model...").await;
    if let Err(err) = models.load_live_model(live_model).await {
        tracing::error!(error = %err, "failed to load live mode model");
    }

    same_model
}

/// Runs on `stop` or disconnect: stop the engine (caller's responsibility)
/// then reload the main model in the background so normal transcription can
/// resume. A reload failure is observed by the next `/api/transcribe/*` call.
pub fn reload_main_model_in_background(models: Arc<ModelManager>) {
    tokio::spawn(async move {
        if let Err(err) = models.reload_transcription_model().await {
            tracing::error!(error = %err, "failed to reload main model after live mode session");
        }
    });
}

pub async fn unload_live_model(models: &ModelManager) -> Result<()> {
    models.unload_live_model().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_session_may_hold_the_slot() {
        let slot = LiveModeSlot::new();
        let guard = slot.try_acquire();
        assert!(guard.is_some());
        assert!(slot.try_acquire().is_none());

        drop(guard);
        assert!(slot.try_acquire().is_some());
    }
}
