//! Wraps the Whisper-class decoder. Model residency is owned by the Model
//! Manager; this type only knows how to run a loaded context against a
//! waveform and apply the configured sampling strategy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::RwLock;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::options::TranscribeOptions;
use super::postprocess::postprocess;
use crate::error::TranscriptionCancelledError;

#[derive(Debug, Clone)]
pub struct TranscribedWord {
    pub word: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TranscribedSegment {
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub words: Vec<TranscribedWord>,
    /// Set by diarization alignment; `None` until a speaker pass has run.
    pub speaker: Option<String>,
}

pub struct WhisperEngine {
    models_dir: PathBuf,
    context: Arc<RwLock<Option<WhisperContext>>>,
    loaded_model: Arc<RwLock<Option<String>>>,
}

impl WhisperEngine {
    pub fn new(models_dir: PathBuf) -> Self {
        // Suppress whisper.cpp's own very verbose logging; we log through
        // tracing at the call sites instead.
        std::env::set_var("GGML_METAL_LOG_LEVEL", "1");
        std::env::set_var("WHISPER_LOG_LEVEL", "1");

        Self {
            models_dir,
            context: Arc::new(RwLock::new(None)),
            loaded_model: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn current_model(&self) -> Option<String> {
        self.loaded_model.read().await.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.context.read().await.is_some()
    }

    pub async fn load_model(&self, model_name: &str) -> Result<()> {
        let model_path = self.model_path(model_name);
        if !model_path.exists() {
            return Err(anyhow!("model file not found: {}", model_path.display()));
        }

        let ctx = WhisperContext::new_with_params(
            &model_path.to_string_lossy(),
            WhisperContextParameters::default(),
        )
        .context("failed to load whisper model")?;

        *self.context.write().await = Some(ctx);
        *self.loaded_model.write().await = Some(model_name.to_string());

        tracing::info!(model = model_name, "transcription model loaded");
        Ok(())
    }

    pub async fn unload_model(&self) {
        *self.context.write().await = None;
        *self.loaded_model.write().await = None;
        tracing::info!("transcription model unloaded");
    }

    fn model_path(&self, model_name: &str) -> PathBuf {
        self.models_dir.join(format!("{model_name}.bin"))
    }

    /// Runs the decoder over `audio_data` (mono float32 @ 16 kHz). Polls
    /// `cancellation_check` between segments and raises a typed cancellation
    /// error rather than using exceptions for control flow.
    pub async fn transcribe(
        &self,
        audio_data: &[f32],
        options: &TranscribeOptions,
        mut cancellation_check: impl FnMut() -> bool,
    ) -> Result<Vec<TranscribedSegment>> {
        let guard = self.context.read().await;
        let ctx = guard
            .as_ref()
            .ok_or_else(|| anyhow!("no transcription model loaded"))?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: 1.0,
        });

        if let Some(language) = &options.language {
            params.set_language(Some(language.as_str()));
        }
        params.set_translate(options.translate);
        params.set_no_timestamps(false);
        params.set_token_timestamps(options.word_timestamps);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);
        params.set_suppress_non_speech_tokens(true);
        params.set_temperature(0.0);
        params.set_max_initial_ts(1.0);
        params.set_entropy_thold(2.4);
        params.set_logprob_thold(-1.0);
        params.set_no_speech_thold(0.55);
        params.set_single_segment(false);
        params.set_no_context(true);

        let mut state = ctx.create_state().context("failed to create whisper state")?;
        state
            .full(params, audio_data)
            .context("whisper decode failed")?;

        let num_segments = state
            .full_n_segments()
            .context("failed to read segment count")?;

        let mut results = Vec::with_capacity(num_segments as usize);

        for i in 0..num_segments {
            if cancellation_check() {
                return Err(TranscriptionCancelledError.into());
            }

            let raw_text = state
                .full_get_segment_text(i)
                .context("failed to read segment text")?;
            let start_time = state.full_get_segment_t0(i).context("failed to read segment start")? as f64 / 100.0;
            let end_time = state.full_get_segment_t1(i).context("failed to read segment end")? as f64 / 100.0;

            let text = postprocess(
                &raw_text,
                options.ensure_sentence_starting_uppercase,
                options.ensure_sentence_ends_with_period,
            );
            if text.is_empty() {
                continue;
            }

            let mut words = Vec::new();
            if options.word_timestamps {
                let num_tokens = state
                    .full_n_tokens(i)
                    .context("failed to read token count")?;
                for t in 0..num_tokens {
                    let token_text = state
                        .full_get_token_text(i, t)
                        .unwrap_or_default();
                    let token_data = state.full_get_token_data(i, t).ok();
                    if let Some(data) = token_data {
                        let trimmed = token_text.trim();
                        if trimmed.is_empty() || trimmed.starts_with('[') {
                            continue;
                        }
                        words.push(TranscribedWord {
                            word: trimmed.to_string(),
                            start_time: data.t0 as f64 / 100.0,
                            end_time: data.t1 as f64 / 100.0,
                            confidence: Some(data.p as f64),
                        });
                    }
                }
            }

            results.push(TranscribedSegment {
                start_time,
                end_time,
                text,
                words,
                speaker: None,
            });
        }

        Ok(results)
    }
}

/// Model discovery: scans `models_dir` for `*.bin` files.
pub fn discover_models(models_dir: &Path) -> Result<Vec<String>> {
    if !models_dir.exists() {
        return Ok(Vec::new());
    }

    let mut models = Vec::new();
    for entry in std::fs::read_dir(models_dir)? {
        let entry = entry?;
        if let Some(stem) = entry.path().file_stem() {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("bin") {
                models.push(stem.to_string_lossy().to_string());
            }
        }
    }
    models.sort();
    Ok(models)
}
