//! The streaming recorder state machine: `inactive -> listening -> recording
//! -> transcribing -> inactive`. Driven by fed audio chunks and the two-stage
//! VAD; observers are notified over a channel rather than a callback, per the
//! bounded-channel-plus-drain-task pattern used throughout this crate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Listening,
    Recording,
    Transcribing,
}

#[derive(Debug, Clone)]
pub enum RecorderEvent {
    StateChanged(RecorderState),
    ChunkRecorded { frame_count: usize },
}

pub struct RecorderConfig {
    pub sample_rate: u32,
    pub pre_roll_seconds: f32,
    pub post_speech_silence_duration: Duration,
    pub min_length_of_recording: Duration,
    pub max_silence_duration: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            pre_roll_seconds: 0.8,
            post_speech_silence_duration: Duration::from_millis(600),
            min_length_of_recording: Duration::from_millis(300),
            max_silence_duration: Duration::from_secs(10),
        }
    }
}

/// Bounded ring buffer of pre-roll audio, capturing speech onset before VAD
/// triggers.
struct PreRollBuffer {
    frames: VecDeque<Vec<f32>>,
    max_frames: usize,
}

impl PreRollBuffer {
    fn new(max_frames: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(max_frames),
            max_frames,
        }
    }

    fn push(&mut self, frame: Vec<f32>) {
        if self.frames.len() >= self.max_frames {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    fn drain(&mut self) -> Vec<Vec<f32>> {
        self.frames.drain(..).collect()
    }
}

pub struct Recorder {
    state: RecorderState,
    config: RecorderConfig,
    pre_roll: PreRollBuffer,
    frames: Vec<f32>,
    recording_started_at: Option<Instant>,
    silence_started_at: Option<Instant>,
    trimming_silence: bool,
    events: mpsc::Sender<RecorderEvent>,
}

impl Recorder {
    pub fn new(config: RecorderConfig, events: mpsc::Sender<RecorderEvent>) -> Self {
        let frame_duration_secs = 0.01; // 10ms frames from the fast VAD stage
        let max_frames = (config.pre_roll_seconds / frame_duration_secs) as usize;

        Self {
            state: RecorderState::Inactive,
            pre_roll: PreRollBuffer::new(max_frames.max(1)),
            frames: Vec::new(),
            recording_started_at: None,
            silence_started_at: None,
            trimming_silence: false,
            config,
            events,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Snapshot of the in-progress waveform without consuming it, for
    /// periodic partial transcription while still `Recording`.
    pub fn peek_waveform(&self) -> &[f32] {
        &self.frames
    }

    pub fn listen(&mut self) {
        self.set_state(RecorderState::Listening);
    }

    /// Feed one chunk with its VAD verdict. Drives the state transitions
    /// described in the recorder state machine.
    pub async fn feed_chunk(&mut self, chunk: Vec<f32>, is_speech: bool) {
        match self.state {
            RecorderState::Inactive => {}
            RecorderState::Listening => {
                self.pre_roll.push(chunk.clone());
                if is_speech {
                    let preroll_frames = self.pre_roll.drain();
                    for frame in preroll_frames {
                        self.frames.extend(frame);
                    }
                    self.frames.extend(chunk);
                    self.recording_started_at = Some(Instant::now());
                    self.silence_started_at = None;
                    self.trimming_silence = false;
                    self.set_state(RecorderState::Recording);
                }
            }
            RecorderState::Recording => {
                if is_speech {
                    self.silence_started_at = None;
                    self.trimming_silence = false;
                    self.frames.extend(chunk);
                } else {
                    let now = Instant::now();
                    let silence_start = *self.silence_started_at.get_or_insert(now);
                    let silence_elapsed = now.duration_since(silence_start);

                    if silence_elapsed > self.config.max_silence_duration {
                        // Extended silence trim: exclude this region from the
                        // frame list so the decoder doesn't hallucinate on it.
                        self.trimming_silence = true;
                    } else if !self.trimming_silence {
                        self.frames.extend(chunk);
                    }

                    let recording_elapsed = self
                        .recording_started_at
                        .map(|start| now.duration_since(start))
                        .unwrap_or_default();

                    if silence_elapsed >= self.config.post_speech_silence_duration
                        && recording_elapsed >= self.config.min_length_of_recording
                    {
                        self.set_state(RecorderState::Transcribing);
                    }
                }

                let _ = self.events.send(RecorderEvent::ChunkRecorded {
                    frame_count: self.frames.len(),
                }).await;
            }
            RecorderState::Transcribing => {}
        }
    }

    /// Takes the accumulated waveform, and always returns the recorder to
    /// `inactive` regardless of the caller's eventual transcription outcome.
    pub fn take_waveform(&mut self) -> Vec<f32> {
        let waveform = std::mem::take(&mut self.frames);
        self.recording_started_at = None;
        self.silence_started_at = None;
        self.trimming_silence = false;
        self.set_state(RecorderState::Inactive);
        waveform
    }

    fn set_state(&mut self, state: RecorderState) {
        self.state = state;
        let _ = self.events.try_send(RecorderEvent::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_from_listening_to_recording_on_speech() {
        let (tx, _rx) = mpsc::channel(32);
        let mut recorder = Recorder::new(RecorderConfig::default(), tx);
        recorder.listen();
        assert_eq!(recorder.state(), RecorderState::Listening);

        recorder.feed_chunk(vec![0.1; 160], true).await;
        assert_eq!(recorder.state(), RecorderState::Recording);
    }

    #[tokio::test]
    async fn stays_recording_through_brief_silence() {
        let (tx, _rx) = mpsc::channel(32);
        let mut config = RecorderConfig::default();
        config.post_speech_silence_duration = Duration::from_secs(5);
        config.min_length_of_recording = Duration::from_millis(0);
        let mut recorder = Recorder::new(config, tx);
        recorder.listen();
        recorder.feed_chunk(vec![0.1; 160], true).await;
        recorder.feed_chunk(vec![0.0; 160], false).await;

        assert_eq!(recorder.state(), RecorderState::Recording);
    }

    #[tokio::test]
    async fn take_waveform_always_returns_to_inactive() {
        let (tx, _rx) = mpsc::channel(32);
        let mut recorder = Recorder::new(RecorderConfig::default(), tx);
        recorder.listen();
        recorder.feed_chunk(vec![0.1; 160], true).await;
        let waveform = recorder.take_waveform();

        assert!(!waveform.is_empty());
        assert_eq!(recorder.state(), RecorderState::Inactive);
    }
}
