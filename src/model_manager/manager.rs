//! Singleton lifecycle for the main, live, and diarization models. Held as
//! an explicit service inside `AppState`, constructed once at startup —
//! never as a module-level global.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::diarization::{DiarizationConfig, DiarizationEngine};
use crate::transcription::engine::WhisperEngine;

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub main_model: Option<String>,
    pub live_model: Option<String>,
    pub diarization_loaded: bool,
    pub device: &'static str,
}

pub struct ModelManager {
    models_dir: PathBuf,
    main_engine: WhisperEngine,
    live_engine: WhisperEngine,
    diarization_engine: RwLock<Option<DiarizationEngine>>,
}

impl ModelManager {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            main_engine: WhisperEngine::new(models_dir.clone()),
            live_engine: WhisperEngine::new(models_dir.clone()),
            diarization_engine: RwLock::new(None),
            models_dir,
        }
    }

    pub fn main_engine(&self) -> &WhisperEngine {
        &self.main_engine
    }

    pub fn live_engine(&self) -> &WhisperEngine {
        &self.live_engine
    }

    pub fn models_dir(&self) -> &PathBuf {
        &self.models_dir
    }

    pub async fn load_transcription_model(&self, model_name: &str) -> Result<()> {
        self.main_engine.load_model(model_name).await
    }

    pub async fn unload_transcription_model(&self) {
        self.main_engine.unload_model().await;
    }

    pub async fn reload_transcription_model(&self) -> Result<()> {
        let model_name = self.main_engine.current_model().await;
        if let Some(model_name) = model_name {
            self.main_engine.load_model(&model_name).await
        } else {
            Ok(())
        }
    }

    pub async fn load_live_model(&self, model_name: &str) -> Result<()> {
        self.live_engine.load_model(model_name).await
    }

    pub async fn unload_live_model(&self) {
        self.live_engine.unload_model().await;
    }

    pub async fn load_diarization_model(&self, config: DiarizationConfig) -> Result<()> {
        let engine = tokio::task::spawn_blocking(move || DiarizationEngine::new(config)).await??;
        *self.diarization_engine.write().await = Some(engine);
        Ok(())
    }

    pub async fn unload_diarization_model(&self) {
        *self.diarization_engine.write().await = None;
    }

    pub async fn with_diarization_engine<T>(
        &self,
        f: impl FnOnce(&mut DiarizationEngine) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.diarization_engine.write().await;
        let engine = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("diarization model not loaded"))?;
        f(engine)
    }

    /// Used by Live Mode to skip an unnecessary unload/reload when the
    /// requested model is already the one resident.
    pub async fn is_same_model(&self, a: &str, b: Option<&str>) -> bool {
        Some(a) == b
    }

    pub async fn get_status(&self) -> ModelStatus {
        ModelStatus {
            main_model: self.main_engine.current_model().await,
            live_model: self.live_engine.current_model().await,
            diarization_loaded: self.diarization_engine.read().await.is_some(),
            device: "cpu",
        }
    }
}

pub type SharedModelManager = Arc<ModelManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_reports_unloaded_models_by_default() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::new(dir.path().to_path_buf());
        let status = manager.get_status().await;

        assert!(status.main_model.is_none());
        assert!(!status.diarization_loaded);
    }

    #[tokio::test]
    async fn is_same_model_compares_by_name() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::new(dir.path().to_path_buf());

        assert!(manager.is_same_model("small", Some("small")).await);
        assert!(!manager.is_same_model("small", Some("tiny")).await);
        assert!(!manager.is_same_model("small", None).await);
    }
}
