//! Explicit per-call transcription options. Passed into every transcribe
//! operation rather than mutated on the engine between calls, so a single
//! engine instance can safely serve concurrent request shapes.

#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub translate: bool,
    pub word_timestamps: bool,
    pub diarization: bool,
    pub num_speakers: Option<u32>,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub normalize_audio: bool,
    pub ensure_sentence_starting_uppercase: bool,
    pub ensure_sentence_ends_with_period: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: None,
            translate: false,
            word_timestamps: true,
            diarization: false,
            num_speakers: None,
            min_speakers: None,
            max_speakers: None,
            normalize_audio: true,
            ensure_sentence_starting_uppercase: true,
            ensure_sentence_ends_with_period: true,
        }
    }
}

impl TranscribeOptions {
    /// The "quick" endpoint's fast path: no timestamps, no diarization,
    /// regardless of what the caller otherwise requested.
    pub fn quick() -> Self {
        Self {
            word_timestamps: false,
            diarization: false,
            ..Self::default()
        }
    }

    /// Diarization needs word-level timing to align speakers, so it forces
    /// `word_timestamps` on regardless of the client's stated preference.
    pub fn with_diarization_requirements(mut self) -> Self {
        if self.diarization {
            self.word_timestamps = true;
        }
        self
    }
}
