//! Two-stage voice activity detection: a fast frame classifier screens every
//! chunk, a neural classifier confirms on a background worker. Voice is
//! active only when both agree.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use webrtc_vad::{SampleRate, Vad, VadMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Quality,
    LowBitrate,
    Aggressive,
    VeryAggressive,
}

impl From<Sensitivity> for VadMode {
    fn from(value: Sensitivity) -> Self {
        match value {
            Sensitivity::Quality => VadMode::Quality,
            Sensitivity::LowBitrate => VadMode::LowBitrate,
            Sensitivity::Aggressive => VadMode::Aggressive,
            Sensitivity::VeryAggressive => VadMode::VeryAggressive,
        }
    }
}

/// Stage 1: WebRTC's fixed-point classifier over 10/20/30 ms frames.
pub struct FastClassifier {
    vad: Vad,
}

impl FastClassifier {
    pub fn new(sample_rate: u32, sensitivity: Sensitivity) -> Result<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => anyhow::bail!("unsupported sample rate for webrtc-vad: {other}"),
        };

        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, sensitivity.into()),
        })
    }

    /// `frame` must be 10/20/30 ms of 16-bit PCM at the configured rate.
    pub fn is_voice(&mut self, frame: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(frame)
            .context("webrtc-vad rejected the frame length")
    }

    pub fn reset_states(&mut self) {
        // webrtc-vad is stateless per call; nothing to reset, kept for
        // interface parity with the neural classifier below.
    }
}

/// Stage 2: a neural classifier running on a dedicated worker so the audio
/// feed path never blocks on inference. Remembers the last answer until a
/// new one arrives.
pub struct NeuralClassifier {
    last_result: Arc<RwLock<bool>>,
    tx: mpsc::Sender<Vec<f32>>,
}

impl NeuralClassifier {
    pub fn spawn(threshold: f32) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<f32>>(32);
        let last_result = Arc::new(RwLock::new(false));
        let worker_last_result = last_result.clone();

        tokio::spawn(async move {
            while let Some(window) = rx.recv().await {
                let probability = silero_probability(&window);
                let mut guard = worker_last_result.write().await;
                *guard = probability >= threshold;
            }
        });

        Self { last_result, tx }
    }

    /// Enqueues a ≥30 ms window for background classification. Never blocks
    /// the caller; a full queue silently drops the window and the caller
    /// keeps using the previous answer.
    pub fn feed(&self, window: Vec<f32>) {
        let _ = self.tx.try_send(window);
    }

    pub async fn last_result(&self) -> bool {
        *self.last_result.read().await
    }

    pub async fn reset_states(&self) {
        *self.last_result.write().await = false;
    }
}

/// Placeholder seam for the Silero inference call; the actual model
/// invocation is an external, opaque inference service per scope.
fn silero_probability(window: &[f32]) -> f32 {
    let energy: f32 = window.iter().map(|s| s * s).sum::<f32>() / window.len().max(1) as f32;
    energy.sqrt().min(1.0)
}

/// Combines both stages: voice is active only when both agree. `strict_end`
/// switches end-of-speech detection to rely solely on the neural classifier.
pub struct TwoStageVad {
    fast: FastClassifier,
    neural: NeuralClassifier,
    strict_end: bool,
}

impl TwoStageVad {
    pub fn new(sample_rate: u32, sensitivity: Sensitivity, neural_threshold: f32, strict_end: bool) -> Result<Self> {
        Ok(Self {
            fast: FastClassifier::new(sample_rate, sensitivity)?,
            neural: NeuralClassifier::spawn(neural_threshold),
            strict_end,
        })
    }

    pub async fn is_speech(&mut self, frame: &[i16], window: Vec<f32>) -> Result<bool> {
        let fast_says_voice = self.fast.is_voice(frame)?;
        self.neural.feed(window);
        let neural_says_voice = self.neural.last_result().await;

        Ok(fast_says_voice && neural_says_voice)
    }

    /// Used once a recording is active and silence timing must be judged:
    /// uses the neural classifier alone when `strict_end` is set, otherwise
    /// treats every frame as voiced (matching Stage 1's permissive default).
    pub async fn is_speech_for_end_detection(&self, all_frames_voiced_default: bool) -> bool {
        if self.strict_end {
            self.neural.last_result().await
        } else {
            all_frames_voiced_default
        }
    }

    pub async fn reset_states(&mut self) {
        self.fast.reset_states();
        self.neural.reset_states().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_classifier_rejects_silence() {
        let mut classifier = FastClassifier::new(16_000, Sensitivity::Quality).unwrap();
        let silence = vec![0_i16; 160]; // 10ms at 16kHz
        assert!(!classifier.is_voice(&silence).unwrap());
    }

    #[tokio::test]
    async fn neural_classifier_remembers_last_result_until_new_input() {
        let classifier = NeuralClassifier::spawn(0.5);
        assert!(!classifier.last_result().await);

        let loud_window = vec![0.9_f32; 480];
        classifier.feed(loud_window);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(classifier.last_result().await);
    }
}
